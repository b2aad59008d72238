//! Surface that hands presented pictures to the terminal viewer.

use std::collections::HashMap;
use std::sync::Arc;

use image::RgbaImage;
use tokio::sync::watch;

use super::{ImageRef, Surface, TextureId, TextureParams};
use crate::error::RenderError;

/// Picture currently on screen
pub type Presented = Option<Arc<RgbaImage>>;

/// Keeps texture contents as RGBA images and publishes the drawn one on a
/// watch channel; the viewer re-encodes it for the terminal graphics protocol.
pub struct TerminalSurface {
    textures: HashMap<TextureId, Option<Arc<RgbaImage>>>,
    next_id: u32,
    bound: Option<TextureId>,
    presented: watch::Sender<Presented>,
}

impl TerminalSurface {
    pub fn new() -> (Self, watch::Receiver<Presented>) {
        let (presented, rx) = watch::channel(None);
        (
            Self {
                textures: HashMap::new(),
                next_id: 0,
                bound: None,
                presented,
            },
            rx,
        )
    }
}

impl Surface for TerminalSurface {
    fn create_texture(&mut self) -> Result<TextureId, RenderError> {
        let id = TextureId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.textures.insert(id, None);
        Ok(id)
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture);
    }

    fn upload(
        &mut self,
        texture: TextureId,
        image: ImageRef<'_>,
        _params: TextureParams,
    ) -> Result<(), RenderError> {
        let slot = self
            .textures
            .get_mut(&texture)
            .ok_or_else(|| RenderError::Upload(format!("unknown texture {:?}", texture)))?;
        let picture = RgbaImage::from_raw(image.width, image.height, image.pixels.to_vec())
            .ok_or_else(|| RenderError::Upload("pixel buffer does not match dimensions".to_string()))?;
        *slot = Some(Arc::new(picture));
        self.bound = Some(texture);
        Ok(())
    }

    // Scaling is done by the terminal image protocol
    fn generate_mipmaps(&mut self, _texture: TextureId) {}

    fn clear(&mut self) {}

    fn draw_fullscreen_quad(
        &mut self,
        texture: TextureId,
        _vertices: &[[f32; 2]; 6],
    ) -> Result<(), RenderError> {
        if self.bound != Some(texture) {
            return Err(RenderError::Draw(format!("texture {:?} is not bound", texture)));
        }
        let picture = self
            .textures
            .get(&texture)
            .cloned()
            .flatten()
            .ok_or_else(|| RenderError::Draw("texture has no contents".to_string()))?;
        // No viewer attached is not an error
        let _ = self.presented.send(Some(picture));
        Ok(())
    }

    fn unbind(&mut self) {
        self.bound = None;
    }

    // The viewer fits the picture to the terminal area
    fn viewport(&mut self, _width: u32, _height: u32) {}
}
