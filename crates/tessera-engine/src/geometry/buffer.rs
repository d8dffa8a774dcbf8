use std::cell::{Cell, Ref, RefCell};
use std::rc::{Rc, Weak};

use bytemuck::Pod;

use crate::device::{BufferKind, BufferUsage, IndexFormat};
use crate::resource::{ResourceId, TrackedResource};

/// CPU-side vertex or index payload.
///
/// Updates only touch the CPU copy and bump `update_id`; the upload happens
/// when a geometry using the buffer is bound. Clones share one payload.
#[derive(Debug, Clone)]
pub struct Buffer {
    inner: Rc<BufferInner>,
}

#[derive(Debug)]
struct BufferInner {
    id: ResourceId,
    kind: BufferKind,
    usage: Cell<BufferUsage>,
    index_format: IndexFormat,
    data: RefCell<Vec<u8>>,
    update_id: Cell<u64>,
    destroyed: Cell<bool>,
}

impl TrackedResource for BufferInner {
    fn resource_id(&self) -> ResourceId {
        self.id
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }
}

impl Buffer {
    fn with_bytes(kind: BufferKind, usage: BufferUsage, index_format: IndexFormat, data: Vec<u8>) -> Self {
        Self {
            inner: Rc::new(BufferInner {
                id: ResourceId::next(),
                kind,
                usage: Cell::new(usage),
                index_format,
                data: RefCell::new(data),
                update_id: Cell::new(1),
                destroyed: Cell::new(false),
            }),
        }
    }

    pub fn vertex<T: Pod>(data: &[T], usage: BufferUsage) -> Self {
        Self::with_bytes(
            BufferKind::Vertex,
            usage,
            IndexFormat::Uint16,
            bytemuck::cast_slice(data).to_vec(),
        )
    }

    pub fn index_u16(data: &[u16], usage: BufferUsage) -> Self {
        Self::with_bytes(
            BufferKind::Index,
            usage,
            IndexFormat::Uint16,
            bytemuck::cast_slice(data).to_vec(),
        )
    }

    pub fn index_u32(data: &[u32], usage: BufferUsage) -> Self {
        Self::with_bytes(
            BufferKind::Index,
            usage,
            IndexFormat::Uint32,
            bytemuck::cast_slice(data).to_vec(),
        )
    }

    /// Replaces the payload.
    pub fn update<T: Pod>(&self, data: &[T]) {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let mut d = self.inner.data.borrow_mut();
        d.clear();
        d.extend_from_slice(bytes);
        drop(d);
        self.touch();
    }

    /// Edits the payload in place.
    pub fn update_with(&self, f: impl FnOnce(&mut Vec<u8>)) {
        f(&mut self.inner.data.borrow_mut());
        self.touch();
    }

    /// Marks the current payload as changed.
    pub fn touch(&self) {
        self.inner.update_id.set(self.inner.update_id.get() + 1);
    }

    pub fn set_usage(&self, usage: BufferUsage) {
        self.inner.usage.set(usage);
    }

    #[inline]
    pub fn id(&self) -> ResourceId {
        self.inner.id
    }

    #[inline]
    pub fn kind(&self) -> BufferKind {
        self.inner.kind
    }

    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.inner.usage.get()
    }

    #[inline]
    pub fn index_format(&self) -> IndexFormat {
        self.inner.index_format
    }

    #[inline]
    pub fn update_id(&self) -> u64 {
        self.inner.update_id.get()
    }

    pub fn data(&self) -> Ref<'_, [u8]> {
        Ref::map(self.inner.data.borrow(), |v| v.as_slice())
    }

    pub fn byte_len(&self) -> usize {
        self.inner.data.borrow().len()
    }

    /// Number of indices for an index buffer.
    pub fn index_count(&self) -> u32 {
        (self.byte_len() / self.inner.index_format.size() as usize) as u32
    }

    /// Releases the native buffer on the next garbage sweep. Any later bind
    /// is reported as use-after-destroy.
    pub fn destroy(&self) {
        self.inner.destroyed.set(true);
        self.inner.data.borrow_mut().clear();
    }

    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    pub(crate) fn tracker(&self) -> Weak<dyn TrackedResource> {
        Rc::downgrade(&self.inner) as Weak<dyn TrackedResource>
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_bumps_version() {
        let b = Buffer::vertex(&[0.0f32; 4], BufferUsage::Dynamic);
        let v = b.update_id();
        b.update(&[1.0f32; 8]);
        assert_eq!(b.update_id(), v + 1);
        assert_eq!(b.byte_len(), 32);
    }

    #[test]
    fn clones_share_payload() {
        let a = Buffer::index_u16(&[0, 1, 2], BufferUsage::Static);
        let b = a.clone();
        a.update(&[0u16, 1, 2, 2, 3, 0]);
        assert_eq!(b.index_count(), 6);
        assert_eq!(a.id(), b.id());
    }
}
