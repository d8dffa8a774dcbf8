use crate::coords::Rect;

use super::{BaseTexture, BaseTextureOptions, Texture};

/// Texture that can be rendered into.
///
/// The framebuffer is realized lazily by the texture system and rebuilt
/// whenever the texture is resized.
#[derive(Debug, Clone)]
pub struct RenderTexture {
    texture: Texture,
}

fn pixel_size(logical: f32, resolution: f32) -> u32 {
    (logical * resolution).ceil().max(1.0) as u32
}

impl RenderTexture {
    /// Color-only render texture of `width × height` logical units.
    pub fn new(width: f32, height: f32, resolution: f32) -> Self {
        let options = BaseTextureOptions { resolution, ..Default::default() };
        Self::with_options(width, height, options, true)
    }

    /// `stencil` attaches a stencil plane so masks work while rendering
    /// into the texture.
    pub fn with_options(width: f32, height: f32, options: BaseTextureOptions, stencil: bool) -> Self {
        let base = BaseTexture::render_target(
            pixel_size(width, options.resolution),
            pixel_size(height, options.resolution),
            stencil,
            options,
        );
        let texture = Texture::from_frame(&base, Rect::from_size(width, height), None, None);
        Self { texture }
    }

    /// View usable by sprites.
    #[inline]
    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    #[inline]
    pub fn base(&self) -> &BaseTexture {
        self.texture.base()
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.texture.frame().width()
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.texture.frame().height()
    }

    #[inline]
    pub fn resolution(&self) -> f32 {
        self.base().resolution()
    }

    pub fn has_stencil(&self) -> bool {
        matches!(*self.base().source(), super::TextureSource::RenderTarget { stencil: true })
    }

    /// Resizes the backing texture. Contents are discarded.
    pub fn resize(&mut self, width: f32, height: f32) {
        let resolution = self.resolution();
        self.base().resize(pixel_size(width, resolution), pixel_size(height, resolution));
        self.texture.set_frame(Rect::from_size(width, height));
    }

    pub fn destroy(self) {
        self.texture.base().destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_size_follows_resolution() {
        let rt = RenderTexture::new(10.5, 4.0, 2.0);
        assert_eq!(rt.base().pixel_width(), 21);
        assert_eq!(rt.base().pixel_height(), 8);
        assert_eq!(rt.width(), 10.5);
        assert!(rt.texture().is_valid());
    }

    #[test]
    fn resize_bumps_dirty_id() {
        let mut rt = RenderTexture::new(8.0, 8.0, 1.0);
        let before = rt.base().dirty_id();
        rt.resize(8.0, 8.0);
        assert_eq!(rt.base().dirty_id(), before);
        rt.resize(16.0, 4.0);
        assert!(rt.base().dirty_id() > before);
        assert_eq!(rt.texture().uvs(), &[0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0]);
    }
}
