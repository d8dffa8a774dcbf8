use std::collections::HashMap;

use crate::device::{Backend, BufferUsage, NativeBuffer, VertexArrayDesc, VertexAttributeDesc};
use crate::render::RenderError;
use crate::resource::{NativeEntry, ResourceId, ResourceKind, ResourceRegistry};
use crate::shader::{CompiledProgram, ProgramKey};

use super::{Buffer, Geometry};

/// Smallest allocation for dynamic buffers, in bytes.
const MIN_DYNAMIC_CAPACITY: usize = 256;

/// Attribute index in the geometry → program location, plus the buffers
/// the geometry drew from when it was resolved.
#[derive(Debug)]
struct CachedLayout {
    buffers: Vec<ResourceId>,
    attributes: Vec<(usize, u32)>,
}

/// Uploads buffers and binds geometry/program attribute layouts.
#[derive(Default)]
pub struct GeometrySystem {
    layouts: HashMap<(ResourceId, ProgramKey), CachedLayout>,
    /// Last vertex array handed to the backend.
    bound: Option<VertexArrayDesc>,
    orphaned: u32,
}

impl GeometrySystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `geometry` for drawing with `program`.
    ///
    /// Buffers whose `update_id` changed since their last upload are
    /// re-uploaded first. The backend vertex array is only re-issued when
    /// the resolved layout (including native handles) differs from the one
    /// already bound.
    pub fn bind(
        &mut self,
        backend: &mut dyn Backend,
        registry: &mut ResourceRegistry,
        geometry: &Geometry,
        program: &CompiledProgram,
    ) -> Result<(), RenderError> {
        let key = (geometry.id(), program.key);
        if !self.layouts.contains_key(&key) {
            let attributes = resolve_layout(geometry, program)?;
            let buffers = geometry.buffers().iter().map(Buffer::id).collect();
            self.layouts.insert(key, CachedLayout { buffers, attributes });
        }

        let mut handles: Vec<(ResourceId, NativeBuffer)> = Vec::new();
        for buffer in geometry.buffers() {
            let handle = self.sync_buffer(backend, registry, &buffer)?;
            handles.push((buffer.id(), handle));
        }
        let handle_of = |id: ResourceId| handles.iter().find(|(b, _)| *b == id).map(|(_, h)| *h);

        let layout = &self.layouts[&key];
        let mut desc = VertexArrayDesc::default();
        for (index, location) in &layout.attributes {
            let attr = &geometry.attributes()[*index];
            let Some(buffer) = handle_of(attr.buffer.id()) else { continue };
            desc.attributes.push(VertexAttributeDesc {
                location: *location,
                buffer,
                format: attr.format,
                offset: attr.offset,
                stride: attr.effective_stride(),
                instanced: attr.instanced,
            });
        }
        if let Some(index) = geometry.index() {
            if let Some(h) = handle_of(index.id()) {
                desc.index = Some((h, index.index_format()));
            }
        }

        if self.bound.as_ref() != Some(&desc) {
            backend.bind_vertex_array(&desc)?;
            self.bound = Some(desc);
        }
        Ok(())
    }

    /// Makes the native copy of `buffer` current and returns its handle.
    ///
    /// Data that no longer fits the allocation orphans it: a fresh native
    /// buffer is created (power-of-two growth for dynamic buffers) instead of
    /// resizing the old one in place.
    pub fn sync_buffer(
        &mut self,
        backend: &mut dyn Backend,
        registry: &mut ResourceRegistry,
        buffer: &Buffer,
    ) -> Result<NativeBuffer, RenderError> {
        if buffer.is_destroyed() {
            log::error!("buffer {} bound after destroy()", buffer.id());
            return Err(RenderError::UseAfterDestroy { kind: ResourceKind::Buffer, id: buffer.id() });
        }

        let version = buffer.update_id();
        let data = buffer.data();
        let len = data.len();

        if let Some(entry) = registry.buffers.get_mut(buffer.id()) {
            if entry.version == version {
                return Ok(entry.handle);
            }
            if len <= entry.capacity {
                if len > 0 {
                    backend.write_buffer(entry.handle, 0, &data)?;
                }
                entry.version = version;
                return Ok(entry.handle);
            }
        }

        let capacity = match buffer.usage() {
            BufferUsage::Dynamic => len.next_power_of_two().max(MIN_DYNAMIC_CAPACITY),
            BufferUsage::Static => len.max(4),
        };
        let handle = backend.create_buffer(buffer.kind(), buffer.usage(), capacity)?;
        if len > 0 {
            backend.write_buffer(handle, 0, &data)?;
        }

        let generation = registry.generation();
        let mut entry = NativeEntry::new(handle, generation, Some(buffer.tracker()));
        entry.version = version;
        entry.capacity = capacity;
        if let Some(old) = registry.buffers.insert(buffer.id(), entry) {
            log::debug!("buffer {} orphaned: {} bytes no longer fit, reallocated {capacity}", buffer.id(), len);
            backend.delete_buffer(old);
            self.orphaned += 1;
            if self.bound.as_ref().is_some_and(|b| b.attributes.iter().any(|a| a.buffer == old)) {
                self.bound = None;
            }
        }
        Ok(handle)
    }

    /// Native reallocations since creation.
    pub fn orphan_count(&self) -> u32 {
        self.orphaned
    }

    /// Forgets the bound vertex array, e.g. after a context loss.
    pub fn reset(&mut self) {
        self.bound = None;
    }

    /// Drops layouts whose program or any buffer no longer has a native
    /// object, i.e. geometry that was collected or programs that were evicted.
    pub fn prune(&mut self, registry: &ResourceRegistry) {
        let before = self.layouts.len();
        self.layouts.retain(|(_, program), layout| {
            registry.programs.get(*program).is_some()
                && layout.buffers.iter().all(|b| registry.buffers.get(*b).is_some())
        });
        if self.layouts.len() < before {
            log::trace!("geometry: pruned {} layouts", before - self.layouts.len());
        }
    }

    /// Attribute layouts currently cached.
    pub fn cached_layouts(&self) -> usize {
        self.layouts.len()
    }
}

fn resolve_layout(geometry: &Geometry, program: &CompiledProgram) -> Result<Vec<(usize, u32)>, RenderError> {
    let mut out = Vec::with_capacity(program.info.attributes.len());
    for attr in &program.info.attributes {
        let Some(index) = geometry.attributes().iter().position(|a| a.name == attr.name) else {
            log::error!("program `{}` needs attribute `{}` the geometry lacks", program.name, attr.name);
            return Err(RenderError::AttributeMismatch {
                program: program.name.clone(),
                attribute: attr.name.clone(),
            });
        };
        let provided = geometry.attributes()[index].format.components();
        if provided != attr.components && attr.components != 0 {
            log::warn!(
                "attribute `{}`: geometry provides {provided} components, program `{}` reads {}",
                attr.name,
                program.name,
                attr.components
            );
        }
        out.push((index, attr.location));
    }
    Ok(out)
}
