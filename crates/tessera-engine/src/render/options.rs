use crate::coords::Matrix;
use crate::paint::Color;
use crate::texture::RenderTexture;

/// Construction-time renderer settings.
#[derive(Debug, Clone)]
pub struct RendererOptions {
    /// Logical screen width (scene units).
    pub width: f32,
    pub height: f32,
    /// Physical pixels per logical unit on the screen.
    pub resolution: f32,
    pub background: Color,
    /// Default for [`RenderOptions::clear`].
    pub clear_before_render: bool,
    /// Caps the units used by one batch below the backend limit.
    pub texture_units: Option<u32>,
    /// Vertices accumulated by the batch renderer before it flushes.
    pub max_batch_vertices: usize,
    /// Caps the stencil bits available to masks below the backend limit.
    pub stencil_bits: Option<u32>,
}

impl Default for RendererOptions {
    fn default() -> Self {
        Self {
            width: 800.0,
            height: 600.0,
            resolution: 1.0,
            background: Color::BLACK,
            clear_before_render: true,
            texture_units: None,
            max_batch_vertices: 16_384,
            stencil_bits: None,
        }
    }
}

impl RendererOptions {
    pub fn sized(width: f32, height: f32) -> Self {
        Self { width, height, ..Self::default() }
    }

    pub fn with_resolution(mut self, resolution: f32) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn with_background(mut self, background: Color) -> Self {
        self.background = background;
        self
    }

    pub fn with_texture_units(mut self, units: u32) -> Self {
        self.texture_units = Some(units);
        self
    }

    pub fn with_stencil_bits(mut self, bits: u32) -> Self {
        self.stencil_bits = Some(bits);
        self
    }

    /// Screen size in physical pixels.
    pub fn pixel_size(&self) -> (u32, u32) {
        (
            ((self.width * self.resolution).ceil() as u32).max(1),
            ((self.height * self.resolution).ceil() as u32).max(1),
        )
    }
}

/// Per-call options of [`Renderer::render`](super::Renderer::render).
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions<'a> {
    /// Draw into this texture instead of the screen.
    pub render_texture: Option<&'a RenderTexture>,
    /// Overrides [`RendererOptions::clear_before_render`].
    pub clear: Option<bool>,
    /// Applied on top of the root's transform for this call.
    pub transform: Option<Matrix>,
    /// Reuse world transforms computed by an earlier call.
    pub skip_update_transform: bool,
}

impl<'a> RenderOptions<'a> {
    pub fn to_texture(texture: &'a RenderTexture) -> Self {
        Self { render_texture: Some(texture), ..Self::default() }
    }

    pub fn with_clear(mut self, clear: bool) -> Self {
        self.clear = Some(clear);
        self
    }

    pub fn with_transform(mut self, transform: Matrix) -> Self {
        self.transform = Some(transform);
        self
    }
}
