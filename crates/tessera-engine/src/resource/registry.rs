use std::collections::HashMap;
use std::hash::Hash;
use std::rc::Weak;

use crate::device::{
    Backend, BackendError, NativeBuffer, NativeFramebuffer, NativeProgram, NativeTexture,
};
use crate::shader::ProgramKey;

use super::{ResourceId, TrackedResource};

/// Lifecycle of the native context as seen by the registry.
///
/// `Valid → Lost → Restoring → Valid`. Lost contexts keep every logical
/// resource; only the native side tables are emptied.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ContextState {
    Valid,
    Lost,
    Restoring,
}

/// Native realization of one logical resource.
#[derive(Debug)]
pub struct NativeEntry<H> {
    pub handle: H,
    /// Context generation the handle was created in.
    pub generation: u64,
    /// Logical version (update id / dirty id) last uploaded.
    pub version: u64,
    /// Allocated size in bytes (buffers) or texels (textures).
    pub capacity: usize,
    owner: Option<Weak<dyn TrackedResource>>,
}

impl<H> NativeEntry<H> {
    pub fn new(handle: H, generation: u64, owner: Option<Weak<dyn TrackedResource>>) -> Self {
        Self { handle, generation, version: 0, capacity: 0, owner }
    }

    /// Owner was dropped or explicitly destroyed.
    fn is_orphaned(&self) -> bool {
        match &self.owner {
            None => false,
            Some(weak) => match weak.upgrade() {
                None => true,
                Some(owner) => owner.is_destroyed(),
            },
        }
    }
}

/// Side table from logical key to native handle.
#[derive(Debug)]
pub struct NativeTable<K, H> {
    entries: HashMap<K, NativeEntry<H>>,
}

impl<K: Eq + Hash + Copy, H: Copy> Default for NativeTable<K, H> {
    fn default() -> Self {
        Self { entries: HashMap::new() }
    }
}

impl<K: Eq + Hash + Copy, H: Copy> NativeTable<K, H> {
    pub fn get(&self, key: K) -> Option<&NativeEntry<H>> {
        self.entries.get(&key)
    }

    pub fn get_mut(&mut self, key: K) -> Option<&mut NativeEntry<H>> {
        self.entries.get_mut(&key)
    }

    pub fn handle(&self, key: K) -> Option<H> {
        self.entries.get(&key).map(|e| e.handle)
    }

    /// Inserts an entry and returns the handle it replaced, if any.
    pub fn insert(&mut self, key: K, entry: NativeEntry<H>) -> Option<H> {
        self.entries.insert(key, entry).map(|e| e.handle)
    }

    pub fn remove(&mut self, key: K) -> Option<H> {
        self.entries.remove(&key).map(|e| e.handle)
    }

    pub fn contains_handle(&self, handle: H) -> bool
    where
        H: PartialEq,
    {
        self.entries.values().any(|e| e.handle == handle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn drain_orphans(&mut self) -> Vec<H> {
        let dead: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_orphaned())
            .map(|(k, _)| *k)
            .collect();
        dead.into_iter()
            .filter_map(|k| self.entries.remove(&k).map(|e| e.handle))
            .collect()
    }

    fn drain_all(&mut self) -> Vec<H> {
        self.entries.drain().map(|(_, e)| e.handle).collect()
    }
}

/// Tracks every native object realized for the current context generation.
///
/// Systems consult the tables before use and (re)create missing entries
/// from the logical resource, which is how recovery after a context loss
/// happens lazily.
#[derive(Debug)]
pub struct ResourceRegistry {
    state: ContextState,
    generation: u64,
    pub buffers: NativeTable<ResourceId, NativeBuffer>,
    pub textures: NativeTable<ResourceId, NativeTexture>,
    pub framebuffers: NativeTable<ResourceId, NativeFramebuffer>,
    pub programs: NativeTable<ProgramKey, NativeProgram>,
}

impl ResourceRegistry {
    pub fn new(generation: u64) -> Self {
        Self {
            state: ContextState::Valid,
            generation,
            buffers: NativeTable::default(),
            textures: NativeTable::default(),
            framebuffers: NativeTable::default(),
            programs: NativeTable::default(),
        }
    }

    #[inline]
    pub fn state(&self) -> ContextState {
        self.state
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.state == ContextState::Valid
    }

    /// Associates the registry with a context generation.
    pub fn bind(&mut self, generation: u64) {
        if generation != self.generation {
            log::debug!("registry: context generation {} -> {}", self.generation, generation);
        }
        self.generation = generation;
        self.state = ContextState::Valid;
    }

    /// Forgets every native handle. Logical resources are untouched.
    pub fn mark_lost(&mut self) {
        if self.state == ContextState::Valid {
            log::warn!(
                "registry: context generation {} lost ({} buffers, {} textures, {} programs invalidated)",
                self.generation,
                self.buffers.len(),
                self.textures.len(),
                self.programs.len()
            );
        }
        self.buffers.clear();
        self.textures.clear();
        self.framebuffers.clear();
        self.programs.clear();
        self.state = ContextState::Lost;
    }

    /// Brings the registry in line with the backend before a frame.
    ///
    /// Returns `Ok(false)` when the context is still lost and the frame must
    /// be dropped.
    pub fn prepare(&mut self, backend: &mut dyn Backend) -> Result<bool, BackendError> {
        if backend.is_lost() {
            self.mark_lost();
            self.state = ContextState::Restoring;
            match backend.restore() {
                Ok(generation) => self.bind(generation),
                Err(BackendError::ContextLost) => {
                    self.state = ContextState::Lost;
                    return Ok(false);
                }
                Err(e) => {
                    self.state = ContextState::Lost;
                    return Err(e);
                }
            }
        } else if backend.generation() != self.generation {
            self.mark_lost();
            self.bind(backend.generation());
        }
        Ok(true)
    }

    /// Deletes native objects whose logical owner is gone or destroyed.
    /// Returns the number of native objects released.
    pub fn collect_garbage(&mut self, backend: &mut dyn Backend) -> usize {
        if !self.is_valid() {
            return 0;
        }

        let framebuffers = self.framebuffers.drain_orphans();
        let textures = self.textures.drain_orphans();
        let buffers = self.buffers.drain_orphans();
        let n = framebuffers.len() + textures.len() + buffers.len();

        for fb in framebuffers {
            backend.delete_framebuffer(fb);
        }
        for t in textures {
            backend.delete_texture(t);
        }
        for b in buffers {
            backend.delete_buffer(b);
        }

        if n > 0 {
            log::debug!("registry: released {n} native objects");
        }
        n
    }

    /// Drops a single logical resource's native objects immediately.
    pub fn release(&mut self, id: ResourceId, backend: &mut dyn Backend) {
        if let Some(fb) = self.framebuffers.remove(id) {
            backend.delete_framebuffer(fb);
        }
        if let Some(t) = self.textures.remove(id) {
            backend.delete_texture(t);
        }
        if let Some(b) = self.buffers.remove(id) {
            backend.delete_buffer(b);
        }
    }

    /// Deletes everything, e.g. when the renderer is destroyed.
    pub fn release_all(&mut self, backend: &mut dyn Backend) {
        if self.is_valid() {
            for fb in self.framebuffers.drain_all() {
                backend.delete_framebuffer(fb);
            }
            for t in self.textures.drain_all() {
                backend.delete_texture(t);
            }
            for b in self.buffers.drain_all() {
                backend.delete_buffer(b);
            }
            for p in self.programs.drain_all() {
                backend.delete_program(p);
            }
        } else {
            self.mark_lost();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::device::{BufferKind, BufferUsage, SoftwareBackend};

    struct Owner {
        id: ResourceId,
        destroyed: Cell<bool>,
    }

    impl TrackedResource for Owner {
        fn resource_id(&self) -> ResourceId {
            self.id
        }
        fn is_destroyed(&self) -> bool {
            self.destroyed.get()
        }
    }

    fn owner() -> Rc<Owner> {
        Rc::new(Owner { id: ResourceId::next(), destroyed: Cell::new(false) })
    }

    fn track(reg: &mut ResourceRegistry, backend: &mut SoftwareBackend, o: &Rc<Owner>) {
        let handle = backend
            .create_buffer(BufferKind::Vertex, BufferUsage::Static, 16)
            .unwrap();
        let weak: Weak<dyn TrackedResource> = Rc::downgrade(o) as Weak<dyn TrackedResource>;
        let generation = reg.generation();
        reg.buffers.insert(o.id, NativeEntry::new(handle, generation, Some(weak)));
    }

    // ── garbage collection ────────────────────────────────────────────────

    #[test]
    fn dropped_owner_is_collected() {
        let mut backend = SoftwareBackend::new(4, 4);
        let mut reg = ResourceRegistry::new(backend.generation());
        let a = owner();
        let b = owner();
        track(&mut reg, &mut backend, &a);
        track(&mut reg, &mut backend, &b);

        drop(a);
        assert_eq!(reg.collect_garbage(&mut backend), 1);
        assert_eq!(reg.buffers.len(), 1);
        assert!(reg.buffers.get(b.id).is_some());
    }

    #[test]
    fn destroyed_owner_is_collected() {
        let mut backend = SoftwareBackend::new(4, 4);
        let mut reg = ResourceRegistry::new(backend.generation());
        let a = owner();
        track(&mut reg, &mut backend, &a);

        a.destroyed.set(true);
        assert_eq!(reg.collect_garbage(&mut backend), 1);
        assert!(reg.buffers.is_empty());
    }

    // ── context loss ──────────────────────────────────────────────────────

    #[test]
    fn loss_clears_tables_and_restore_bumps_generation() {
        let mut backend = SoftwareBackend::new(4, 4);
        let mut reg = ResourceRegistry::new(backend.generation());
        let a = owner();
        track(&mut reg, &mut backend, &a);
        let before = reg.generation();

        backend.lose_context();
        assert!(reg.prepare(&mut backend).unwrap());
        assert_eq!(reg.state(), ContextState::Valid);
        assert!(reg.generation() > before);
        assert!(reg.buffers.is_empty());
    }

    #[test]
    fn unrestorable_context_drops_frame() {
        let mut backend = SoftwareBackend::new(4, 4);
        let mut reg = ResourceRegistry::new(backend.generation());

        backend.set_restorable(false);
        backend.lose_context();
        assert!(!reg.prepare(&mut backend).unwrap());
        assert_eq!(reg.state(), ContextState::Lost);

        backend.set_restorable(true);
        assert!(reg.prepare(&mut backend).unwrap());
        assert!(reg.is_valid());
    }
}
