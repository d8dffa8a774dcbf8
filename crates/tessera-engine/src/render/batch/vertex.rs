use bytemuck::{Pod, Zeroable};

use crate::device::{BufferUsage, VertexFormat};
use crate::geometry::{Buffer, Geometry};

/// Interleaved vertex of the batch program.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Pod, Zeroable)]
pub struct BatchVertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
    /// Premultiplied RGBA8.
    pub color: [u8; 4],
    /// Texture unit within the draw, as a float attribute.
    pub texture_id: f32,
}

pub const STRIDE: u32 = std::mem::size_of::<BatchVertex>() as u32;

/// Vertex/index buffers one flush writes into.
///
/// A frame that flushes several times cycles through a pool of these so a
/// flush never overwrites buffers an earlier draw of the frame still reads.
#[derive(Debug)]
pub(crate) struct BatchGeometry {
    pub vertices: Buffer,
    pub indices: Buffer,
    pub geometry: Geometry,
}

impl BatchGeometry {
    pub fn new() -> Self {
        let vertices = Buffer::vertex::<BatchVertex>(&[], BufferUsage::Dynamic);
        let indices = Buffer::index_u16(&[], BufferUsage::Dynamic);
        let geometry = Geometry::new()
            .add_attribute("aVertexPosition", &vertices, VertexFormat::Float32x2, STRIDE, 0)
            .add_attribute("aTextureCoord", &vertices, VertexFormat::Float32x2, STRIDE, 8)
            .add_attribute("aColor", &vertices, VertexFormat::Unorm8x4, STRIDE, 16)
            .add_attribute("aTextureId", &vertices, VertexFormat::Float32, STRIDE, 20)
            .add_index(&indices);
        Self { vertices, indices, geometry }
    }

    pub fn destroy(&self) {
        self.geometry.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_is_packed() {
        assert_eq!(STRIDE, 24);
        assert_eq!(std::mem::align_of::<BatchVertex>(), 4);
    }
}
