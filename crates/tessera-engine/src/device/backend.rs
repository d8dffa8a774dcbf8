use std::any::Any;

use crate::paint::BlendFactors;
use crate::shader::{CompiledProgram, UniformInfo, UniformValue};

use super::BackendError;

// ── native handles ────────────────────────────────────────────────────────

/// Backend-side buffer name. Only meaningful for the context generation that
/// created it.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct NativeBuffer(pub u32);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct NativeTexture(pub u32);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct NativeProgram(pub u32);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct NativeFramebuffer(pub u32);

// ── descriptors ───────────────────────────────────────────────────────────

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
}

/// Upload frequency hint.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum BufferUsage {
    #[default]
    Static,
    Dynamic,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum ScaleMode {
    Nearest,
    #[default]
    Linear,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum WrapMode {
    #[default]
    Clamp,
    Repeat,
    MirroredRepeat,
}

/// RGBA8 texture allocation.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub scale_mode: ScaleMode,
    pub wrap_mode: WrapMode,
    /// Texture may be attached to a framebuffer.
    pub render_target: bool,
}

impl TextureDesc {
    /// Number of levels in a full chain down to 1×1.
    pub fn full_mip_chain(width: u32, height: u32) -> u32 {
        32 - width.max(height).max(1).leading_zeros()
    }
}

/// Integer pixel rectangle, top-left origin.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    #[inline]
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Intersection; disjoint inputs give a zero-sized rect at `self`'s origin.
    pub fn intersect(self, other: PixelRect) -> PixelRect {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = (self.x + self.width as i32).min(other.x + other.width as i32);
        let y1 = (self.y + self.height as i32).min(other.y + other.height as i32);
        if x1 <= x0 || y1 <= y0 {
            PixelRect::new(self.x, self.y, 0, 0)
        } else {
            PixelRect::new(x0, y0, (x1 - x0) as u32, (y1 - y0) as u32)
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum VertexFormat {
    Float32,
    Float32x2,
    Float32x3,
    Float32x4,
    /// Four normalized bytes, read as `vec4` in the shader.
    Unorm8x4,
}

impl VertexFormat {
    pub const fn size(self) -> u32 {
        match self {
            VertexFormat::Float32 => 4,
            VertexFormat::Float32x2 => 8,
            VertexFormat::Float32x3 => 12,
            VertexFormat::Float32x4 => 16,
            VertexFormat::Unorm8x4 => 4,
        }
    }

    /// Component count as seen by the shader.
    pub const fn components(self) -> u32 {
        match self {
            VertexFormat::Float32 => 1,
            VertexFormat::Float32x2 => 2,
            VertexFormat::Float32x3 => 3,
            VertexFormat::Float32x4 | VertexFormat::Unorm8x4 => 4,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

impl IndexFormat {
    pub const fn size(self) -> u32 {
        match self {
            IndexFormat::Uint16 => 2,
            IndexFormat::Uint32 => 4,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum Topology {
    #[default]
    Triangles,
    TriangleStrip,
}

/// One vertex attribute pointer, already resolved to a program location.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct VertexAttributeDesc {
    pub location: u32,
    pub buffer: NativeBuffer,
    pub format: VertexFormat,
    pub offset: u32,
    pub stride: u32,
    /// Advances per instance instead of per vertex.
    pub instanced: bool,
}

/// Complete input assembly state for a draw.
#[derive(Debug, Clone, Default, Eq, PartialEq, Hash)]
pub struct VertexArrayDesc {
    pub attributes: Vec<VertexAttributeDesc>,
    pub index: Option<(NativeBuffer, IndexFormat)>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum StencilFunc {
    #[default]
    Always,
    /// Passes where the stored value equals the reference.
    Equal,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum StencilOp {
    #[default]
    Keep,
    IncrementClamp,
    DecrementClamp,
}

/// Stencil test configuration. `pass_op` applies only to fragments that pass.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct StencilState {
    pub enabled: bool,
    pub func: StencilFunc,
    pub reference: u8,
    pub pass_op: StencilOp,
}

impl StencilState {
    pub const DISABLED: StencilState = StencilState {
        enabled: false,
        func: StencilFunc::Always,
        reference: 0,
        pass_op: StencilOp::Keep,
    };
}

// ── capabilities / counters ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BackendInfo {
    pub name: &'static str,
    /// Texture units usable by a single draw.
    pub max_texture_units: u32,
    pub stencil_bits: u32,
    pub max_texture_size: u32,
}

/// Monotonic counters, reset by the renderer at the start of every frame.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct BackendStats {
    pub draw_calls: u32,
    pub buffer_allocs: u32,
    pub buffer_writes: u32,
    pub texture_allocs: u32,
    pub texture_writes: u32,
    pub program_links: u32,
    pub uniform_writes: u32,
    pub blend_changes: u32,
    pub viewport_changes: u32,
    pub scissor_changes: u32,
    pub stencil_changes: u32,
    pub framebuffer_binds: u32,
}

// ── trait ─────────────────────────────────────────────────────────────────

/// Native rendering context.
///
/// Models a GL-style state machine: state setters persist until changed, and
/// `draw` consumes whatever is bound. Handles are invalidated wholesale when
/// the context is lost; `restore` yields a new generation in which no old
/// handle is valid.
pub trait Backend {
    fn info(&self) -> &BackendInfo;
    fn stats(&self) -> BackendStats;
    fn reset_stats(&mut self);

    // context lifecycle
    fn is_lost(&self) -> bool;
    fn generation(&self) -> u64;
    /// Re-acquires a lost context. Returns the new generation.
    fn restore(&mut self) -> Result<u64, BackendError>;

    // buffers
    fn create_buffer(
        &mut self,
        kind: BufferKind,
        usage: BufferUsage,
        capacity: usize,
    ) -> Result<NativeBuffer, BackendError>;
    fn write_buffer(
        &mut self,
        buffer: NativeBuffer,
        offset: usize,
        data: &[u8],
    ) -> Result<(), BackendError>;
    fn delete_buffer(&mut self, buffer: NativeBuffer);

    // textures
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<NativeTexture, BackendError>;
    /// Uploads a full mip level of tightly packed RGBA8 pixels.
    fn write_texture(
        &mut self,
        texture: NativeTexture,
        mip_level: u32,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<(), BackendError>;
    fn generate_mipmaps(&mut self, texture: NativeTexture) -> Result<(), BackendError>;
    fn delete_texture(&mut self, texture: NativeTexture);

    // programs
    fn create_program(&mut self, program: &CompiledProgram) -> Result<NativeProgram, BackendError>;
    fn delete_program(&mut self, program: NativeProgram);

    // framebuffers
    fn create_framebuffer(
        &mut self,
        color: NativeTexture,
        stencil: bool,
    ) -> Result<NativeFramebuffer, BackendError>;
    fn delete_framebuffer(&mut self, framebuffer: NativeFramebuffer);

    // screen
    fn resize_screen(&mut self, width: u32, height: u32);
    fn screen_size(&self) -> (u32, u32);

    // state
    /// `None` binds the screen back-buffer.
    fn bind_framebuffer(
        &mut self,
        framebuffer: Option<NativeFramebuffer>,
        mip_level: u32,
    ) -> Result<(), BackendError>;
    fn set_viewport(&mut self, rect: PixelRect);
    fn set_scissor(&mut self, rect: Option<PixelRect>);
    fn set_stencil(&mut self, state: StencilState);
    /// `None` disables blending (source overwrites destination).
    fn set_blend(&mut self, blend: Option<BlendFactors>);
    fn set_color_write(&mut self, enabled: bool);
    fn use_program(&mut self, program: NativeProgram) -> Result<(), BackendError>;
    fn set_uniform(
        &mut self,
        program: NativeProgram,
        info: &UniformInfo,
        value: &UniformValue,
    ) -> Result<(), BackendError>;
    fn bind_texture(&mut self, unit: u32, texture: Option<NativeTexture>)
        -> Result<(), BackendError>;
    fn bind_vertex_array(&mut self, layout: &VertexArrayDesc) -> Result<(), BackendError>;

    // commands
    /// Clears the whole bound target. `None` leaves that plane untouched.
    fn clear(&mut self, color: Option<[f32; 4]>, stencil: Option<u8>) -> Result<(), BackendError>;
    /// Indexed when the bound vertex array has an index buffer.
    fn draw(
        &mut self,
        topology: Topology,
        first: u32,
        count: u32,
        instances: u32,
    ) -> Result<(), BackendError>;
    /// Reads RGBA8 rows (top row first) from the bound target.
    fn read_pixels(&mut self, rect: PixelRect) -> Result<Vec<u8>, BackendError>;
    /// Submits recorded work and presents when the screen was drawn to.
    fn end_frame(&mut self) -> Result<(), BackendError>;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_mip_chain_counts_levels() {
        assert_eq!(TextureDesc::full_mip_chain(1, 1), 1);
        assert_eq!(TextureDesc::full_mip_chain(256, 64), 9);
        assert_eq!(TextureDesc::full_mip_chain(300, 10), 9);
    }

    #[test]
    fn pixel_rect_intersection() {
        let a = PixelRect::new(0, 0, 10, 10);
        assert_eq!(a.intersect(PixelRect::new(5, 5, 10, 10)), PixelRect::new(5, 5, 5, 5));
        assert!(a.intersect(PixelRect::new(20, 0, 5, 5)).is_empty());
    }
}
