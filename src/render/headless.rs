use std::collections::HashSet;

use tracing::{debug, trace};

use super::{ImageRef, Surface, TextureId, TextureParams};
use crate::error::RenderError;

/// Surface without a display. Tracks texture lifetimes and what was drawn.
#[derive(Debug, Default)]
pub struct HeadlessSurface {
    live: HashSet<TextureId>,
    next_id: u32,
    bound: Option<(u32, u32)>,
    last_drawn: Option<(u32, u32)>,
    viewport: Option<(u32, u32)>,
    draws: u64,
}

#[cfg(test)]
impl HeadlessSurface {
    pub fn live_textures(&self) -> usize {
        self.live.len()
    }

    pub fn draws(&self) -> u64 {
        self.draws
    }

    /// Size of the last picture that reached the screen
    pub fn last_drawn(&self) -> Option<(u32, u32)> {
        self.last_drawn
    }

    pub fn viewport_size(&self) -> Option<(u32, u32)> {
        self.viewport
    }
}

impl Surface for HeadlessSurface {
    fn create_texture(&mut self) -> Result<TextureId, RenderError> {
        let id = TextureId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.live.insert(id);
        Ok(id)
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.live.remove(&texture);
    }

    fn upload(
        &mut self,
        texture: TextureId,
        image: ImageRef<'_>,
        _params: TextureParams,
    ) -> Result<(), RenderError> {
        if !self.live.contains(&texture) {
            return Err(RenderError::Upload(format!("unknown texture {:?}", texture)));
        }
        self.bound = Some((image.width, image.height));
        Ok(())
    }

    fn generate_mipmaps(&mut self, _texture: TextureId) {}

    fn clear(&mut self) {}

    fn draw_fullscreen_quad(
        &mut self,
        _texture: TextureId,
        _vertices: &[[f32; 2]; 6],
    ) -> Result<(), RenderError> {
        let size = self
            .bound
            .ok_or_else(|| RenderError::Draw("no texture bound".to_string()))?;
        if self.last_drawn != Some(size) {
            debug!(?size, viewport = ?self.viewport, "presented picture size changed");
        }
        self.last_drawn = Some(size);
        self.draws += 1;
        trace!(draws = self.draws, textures = self.live.len(), "picture presented");
        Ok(())
    }

    fn unbind(&mut self) {
        self.bound = None;
    }

    fn viewport(&mut self, width: u32, height: u32) {
        self.viewport = Some((width, height));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{DecodedFrame, RgbaFrame};
    use crate::render::RenderSink;

    #[test]
    fn test_draw_records_size_and_keeps_pool_bounded() {
        let mut sink = RenderSink::new(HeadlessSurface::default(), 5);
        sink.resize(800, 480);
        assert_eq!(sink.surface().viewport_size(), Some((800, 480)));
        sink.draw(DecodedFrame::Rgba(RgbaFrame {
            data: vec![0; 4 * 2 * 4],
            width: 4,
            height: 2,
        }))
        .unwrap();

        assert_eq!(sink.surface().last_drawn(), Some((4, 2)));
        assert_eq!(sink.surface().draws(), 1);
        assert_eq!(sink.surface().live_textures(), 1);

        sink.shutdown();
        assert_eq!(sink.surface().live_textures(), 0);
    }
}
