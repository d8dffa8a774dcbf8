use crate::device::{BufferKind, Topology, VertexFormat};
use crate::resource::ResourceId;

use super::Buffer;

/// Named vertex attribute reading from a [`Buffer`].
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: String,
    pub buffer: Buffer,
    pub format: VertexFormat,
    /// Byte offset of the first element.
    pub offset: u32,
    /// Byte distance between elements; 0 means tightly packed.
    pub stride: u32,
    pub instanced: bool,
}

impl Attribute {
    #[inline]
    pub fn effective_stride(&self) -> u32 {
        if self.stride == 0 { self.format.size() } else { self.stride }
    }
}

/// Set of attributes plus an optional index buffer.
///
/// The attribute layout has to match the program it is drawn with: every
/// attribute the program declares must be present here by name.
#[derive(Debug, Clone)]
pub struct Geometry {
    id: ResourceId,
    attributes: Vec<Attribute>,
    index: Option<Buffer>,
    pub topology: Topology,
    pub instance_count: u32,
}

impl Default for Geometry {
    fn default() -> Self {
        Self::new()
    }
}

impl Geometry {
    pub fn new() -> Self {
        Self {
            id: ResourceId::next(),
            attributes: Vec::new(),
            index: None,
            topology: Topology::Triangles,
            instance_count: 1,
        }
    }

    /// Adds (or replaces) an attribute.
    pub fn add_attribute(
        mut self,
        name: &str,
        buffer: &Buffer,
        format: VertexFormat,
        stride: u32,
        offset: u32,
    ) -> Self {
        self.set_attribute(Attribute {
            name: name.to_string(),
            buffer: buffer.clone(),
            format,
            offset,
            stride,
            instanced: false,
        });
        self
    }

    pub fn add_index(mut self, buffer: &Buffer) -> Self {
        debug_assert_eq!(buffer.kind(), BufferKind::Index);
        self.index = Some(buffer.clone());
        self
    }

    pub fn set_attribute(&mut self, attribute: Attribute) {
        match self.attributes.iter_mut().find(|a| a.name == attribute.name) {
            Some(slot) => *slot = attribute,
            None => self.attributes.push(attribute),
        }
    }

    #[inline]
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn index(&self) -> Option<&Buffer> {
        self.index.as_ref()
    }

    /// Distinct buffers referenced by this geometry, index buffer last.
    pub fn buffers(&self) -> Vec<Buffer> {
        let mut out: Vec<Buffer> = Vec::new();
        for a in &self.attributes {
            if !out.iter().any(|b| b.id() == a.buffer.id()) {
                out.push(a.buffer.clone());
            }
        }
        if let Some(i) = &self.index {
            out.push(i.clone());
        }
        out
    }

    /// Elements drawn per instance: index count, else vertices in the
    /// first per-vertex attribute.
    pub fn element_count(&self) -> u32 {
        if let Some(i) = &self.index {
            return i.index_count();
        }
        self.attributes
            .iter()
            .find(|a| !a.instanced)
            .map(|a| {
                let len = a.buffer.byte_len() as u32;
                len.saturating_sub(a.offset) / a.effective_stride()
            })
            .unwrap_or(0)
    }

    /// Destroys every buffer this geometry references.
    pub fn destroy(&self) {
        for b in self.buffers() {
            b.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::BufferUsage;

    #[test]
    fn interleaved_buffer_is_listed_once() {
        let vb = Buffer::vertex(&[0.0f32; 16], BufferUsage::Static);
        let ib = Buffer::index_u16(&[0, 1, 2, 0, 2, 3], BufferUsage::Static);
        let g = Geometry::new()
            .add_attribute("aVertexPosition", &vb, VertexFormat::Float32x2, 16, 0)
            .add_attribute("aTextureCoord", &vb, VertexFormat::Float32x2, 16, 8)
            .add_index(&ib);
        assert_eq!(g.buffers().len(), 2);
        assert_eq!(g.element_count(), 6);
    }

    #[test]
    fn non_indexed_count_uses_stride() {
        let vb = Buffer::vertex(&[0.0f32; 12], BufferUsage::Static);
        let g = Geometry::new().add_attribute("aVertexPosition", &vb, VertexFormat::Float32x2, 0, 0);
        assert_eq!(g.element_count(), 6);
    }
}
