//! Render sink: pooled textures, upload, full-viewport quad, frame release.

pub mod headless;
pub mod terminal;

use tracing::{debug, warn};

use crate::decoder::DecodedFrame;
use crate::error::RenderError;

pub use headless::HeadlessSurface;
pub use terminal::TerminalSurface;

/// Two triangles covering clip space
pub const FULLSCREEN_QUAD: [[f32; 2]; 6] = [
    [-1.0, -1.0],
    [1.0, -1.0],
    [-1.0, 1.0],
    [-1.0, 1.0],
    [1.0, -1.0],
    [1.0, 1.0],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wrap {
    ClampToEdge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureParams {
    pub min_filter: Filter,
    pub wrap_s: Wrap,
    pub wrap_t: Wrap,
}

impl Default for TextureParams {
    fn default() -> Self {
        Self {
            min_filter: Filter::Linear,
            wrap_s: Wrap::ClampToEdge,
            wrap_t: Wrap::ClampToEdge,
        }
    }
}

/// Borrowed RGBA picture handed to [`Surface::upload`]
#[derive(Debug, Clone, Copy)]
pub struct ImageRef<'a> {
    pub pixels: &'a [u8],
    pub width: u32,
    pub height: u32,
}

/// The drawing target. Mirrors the small slice of a GPU API the sink needs.
pub trait Surface {
    fn create_texture(&mut self) -> Result<TextureId, RenderError>;

    fn delete_texture(&mut self, texture: TextureId);

    fn upload(
        &mut self,
        texture: TextureId,
        image: ImageRef<'_>,
        params: TextureParams,
    ) -> Result<(), RenderError>;

    fn generate_mipmaps(&mut self, texture: TextureId);

    fn clear(&mut self);

    fn draw_fullscreen_quad(
        &mut self,
        texture: TextureId,
        vertices: &[[f32; 2]; 6],
    ) -> Result<(), RenderError>;

    fn unbind(&mut self);

    fn viewport(&mut self, width: u32, height: u32);
}

/// Free textures kept for reuse, bounded by `capacity`
#[derive(Debug)]
pub struct TexturePool {
    free: Vec<TextureId>,
    capacity: usize,
}

impl TexturePool {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }

    pub fn acquire(&mut self, surface: &mut impl Surface) -> Result<TextureId, RenderError> {
        match self.free.pop() {
            Some(texture) => Ok(texture),
            None => surface.create_texture(),
        }
    }

    pub fn release(&mut self, surface: &mut impl Surface, texture: TextureId) {
        if self.free.len() < self.capacity {
            self.free.push(texture);
        } else {
            surface.delete_texture(texture);
        }
    }

    pub fn clear(&mut self, surface: &mut impl Surface) {
        for texture in self.free.drain(..) {
            surface.delete_texture(texture);
        }
    }
}

fn is_power_of_two(value: u32) -> bool {
    value != 0 && value & (value - 1) == 0
}

pub struct RenderSink<S: Surface> {
    surface: S,
    pool: TexturePool,
    drawn: u64,
}

impl<S: Surface> RenderSink<S> {
    pub fn new(surface: S, pool_capacity: usize) -> Self {
        Self {
            surface,
            pool: TexturePool::new(pool_capacity),
            drawn: 0,
        }
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn pool(&self) -> &TexturePool {
        &self.pool
    }

    pub fn drawn(&self) -> u64 {
        self.drawn
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.surface.viewport(width, height);
    }

    /// Draw a frame and release it. The frame is released exactly once
    /// whether or not drawing succeeds.
    pub fn draw(&mut self, frame: DecodedFrame) -> Result<(), RenderError> {
        let result = self.present(&frame);
        frame.close();
        match &result {
            Ok(()) => self.drawn += 1,
            Err(e) => warn!(error = %e, "failed to draw frame"),
        }
        result
    }

    fn present(&mut self, frame: &DecodedFrame) -> Result<(), RenderError> {
        let (width, height) = (frame.width(), frame.height());
        let pixels = frame.pixels();
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(RenderError::BadPixelBuffer {
                width,
                height,
                expected,
                actual: pixels.len(),
            });
        }

        let texture = self.pool.acquire(&mut self.surface)?;
        let result = self.upload_and_draw(texture, ImageRef { pixels, width, height });
        self.pool.release(&mut self.surface, texture);
        result
    }

    fn upload_and_draw(&mut self, texture: TextureId, image: ImageRef<'_>) -> Result<(), RenderError> {
        self.surface.upload(texture, image, TextureParams::default())?;
        if is_power_of_two(image.width) && is_power_of_two(image.height) {
            self.surface.generate_mipmaps(texture);
        }
        self.surface.clear();
        let drawn = self.surface.draw_fullscreen_quad(texture, &FULLSCREEN_QUAD);
        self.surface.unbind();
        debug!(width = image.width, height = image.height, "frame drawn");
        drawn
    }

    /// Delete pooled textures.
    pub fn shutdown(&mut self) {
        self.pool.clear(&mut self.surface);
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{Op, RecordingSurface};
    use super::*;
    use crate::decoder::testing::CountingFrame;
    use crate::decoder::RgbaFrame;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_draw_sequence_and_release() {
        let closed = Arc::new(AtomicUsize::new(0));
        let mut sink = RenderSink::new(RecordingSurface::default(), 5);

        sink.draw(CountingFrame::boxed(&closed, 6, 4)).unwrap();

        let tex = TextureId(0);
        assert_eq!(
            sink.surface().ops,
            vec![
                Op::Create(tex),
                Op::Upload(tex, 6, 4, TextureParams::default()),
                Op::Clear,
                Op::Draw(tex),
                Op::Unbind,
            ]
        );
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(sink.pool().len(), 1);
        assert_eq!(sink.drawn(), 1);
    }

    #[test]
    fn test_mipmaps_only_for_power_of_two() {
        let mut sink = RenderSink::new(RecordingSurface::default(), 5);
        sink.draw(DecodedFrame::Rgba(RgbaFrame {
            data: vec![0; 8 * 4 * 4],
            width: 8,
            height: 4,
        }))
        .unwrap();
        assert!(sink.surface().ops.contains(&Op::Mipmaps(TextureId(0))));

        let mut sink = RenderSink::new(RecordingSurface::default(), 5);
        sink.draw(DecodedFrame::Rgba(RgbaFrame {
            data: vec![0; 8 * 6 * 4],
            width: 8,
            height: 6,
        }))
        .unwrap();
        assert!(!sink
            .surface()
            .ops
            .iter()
            .any(|op| matches!(op, Op::Mipmaps(_))));
    }

    #[test]
    fn test_textures_are_reused() {
        let closed = Arc::new(AtomicUsize::new(0));
        let mut sink = RenderSink::new(RecordingSurface::default(), 5);
        for _ in 0..3 {
            sink.draw(CountingFrame::boxed(&closed, 2, 2)).unwrap();
        }
        let creates = sink
            .surface()
            .ops
            .iter()
            .filter(|op| matches!(op, Op::Create(_)))
            .count();
        assert_eq!(creates, 1);
        assert_eq!(closed.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_pool_deletes_beyond_capacity() {
        let mut surface = RecordingSurface::default();
        let mut pool = TexturePool::new(2);
        let textures: Vec<_> = (0..3).map(|_| pool.acquire(&mut surface).unwrap()).collect();
        for texture in textures {
            pool.release(&mut surface, texture);
        }
        assert_eq!(pool.len(), 2);
        assert_eq!(surface.ops.last(), Some(&Op::Delete(TextureId(2))));
    }

    #[test]
    fn test_failed_upload_still_releases_frame_and_texture() {
        let closed = Arc::new(AtomicUsize::new(0));
        let surface = RecordingSurface {
            fail_upload: true,
            ..Default::default()
        };
        let mut sink = RenderSink::new(surface, 5);

        assert!(sink.draw(CountingFrame::boxed(&closed, 2, 2)).is_err());
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(sink.pool().len(), 1);
        assert_eq!(sink.drawn(), 0);
    }

    #[test]
    fn test_bad_pixel_buffer_is_rejected() {
        let mut sink = RenderSink::new(RecordingSurface::default(), 5);
        let err = sink
            .draw(DecodedFrame::Rgba(RgbaFrame {
                data: vec![0; 3],
                width: 2,
                height: 2,
            }))
            .unwrap_err();
        assert!(matches!(err, RenderError::BadPixelBuffer { expected: 16, actual: 3, .. }));
        assert!(sink.surface().ops.is_empty());
    }

    #[test]
    fn test_resize_sets_viewport() {
        let mut sink = RenderSink::new(RecordingSurface::default(), 5);
        sink.resize(800, 480);
        assert_eq!(sink.surface().ops, vec![Op::Viewport(800, 480)]);
    }
}
