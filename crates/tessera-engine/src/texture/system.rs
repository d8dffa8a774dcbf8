use std::collections::HashMap;

use crate::device::{Backend, NativeFramebuffer, NativeTexture, TextureDesc};
use crate::render::RenderError;
use crate::resource::{NativeEntry, ResourceId, ResourceKind, ResourceRegistry};

use super::{BaseTexture, TextureSource};

/// Uploads base textures and tracks what is bound to each texture unit.
#[derive(Debug, Default)]
pub struct TextureSystem {
    units: Vec<Option<NativeTexture>>,
    descs: HashMap<ResourceId, TextureDesc>,
}

impl TextureSystem {
    pub fn new(max_units: u32) -> Self {
        Self { units: vec![None; max_units as usize], descs: HashMap::new() }
    }

    /// Makes the native copy of `base` current.
    ///
    /// Returns `Ok(None)` for textures that cannot be drawn yet (pending
    /// decode, zero size). Allocations are reused when only the pixels
    /// changed.
    pub fn sync(
        &mut self,
        backend: &mut dyn Backend,
        registry: &mut ResourceRegistry,
        base: &BaseTexture,
    ) -> Result<Option<NativeTexture>, RenderError> {
        if base.is_destroyed() {
            log::error!("texture {} bound after destroy()", base.id());
            return Err(RenderError::UseAfterDestroy { kind: ResourceKind::Texture, id: base.id() });
        }
        if !base.is_valid() {
            return Ok(None);
        }

        let version = base.dirty_id();
        let desc = describe(base);
        let mut reuse = None;
        if let Some(entry) = registry.textures.get(base.id()) {
            if entry.version == version {
                return Ok(Some(entry.handle));
            }
            if self.descs.get(&base.id()) == Some(&desc) {
                reuse = Some(entry.handle);
            }
        }

        let handle = match reuse {
            Some(h) => h,
            None => backend.create_texture(&desc)?,
        };
        if let TextureSource::Pixels(pixels) = &*base.source() {
            backend.write_texture(handle, 0, desc.width, desc.height, pixels)?;
            if desc.mip_levels > 1 {
                backend.generate_mipmaps(handle)?;
            }
        }

        let generation = registry.generation();
        let mut entry = NativeEntry::new(handle, generation, Some(base.tracker()));
        entry.version = version;
        entry.capacity = desc.width as usize * desc.height as usize;
        if let Some(old) = registry.textures.insert(base.id(), entry) {
            if old != handle {
                log::debug!("texture {} reallocated at {}x{}", base.id(), desc.width, desc.height);
                backend.delete_texture(old);
                self.forget_handle(old);
            }
        }
        self.descs.insert(base.id(), desc);
        Ok(Some(handle))
    }

    /// Binds `base` to `unit`, skipping the backend call when it is already
    /// there. Returns `false` when the texture is not drawable.
    pub fn bind(
        &mut self,
        backend: &mut dyn Backend,
        registry: &mut ResourceRegistry,
        base: &BaseTexture,
        unit: u32,
    ) -> Result<bool, RenderError> {
        let Some(handle) = self.sync(backend, registry, base)? else {
            return Ok(false);
        };
        let slot = unit as usize;
        if slot >= self.units.len() {
            self.units.resize(slot + 1, None);
        }
        if self.units[slot] != Some(handle) {
            backend.bind_texture(unit, Some(handle))?;
            self.units[slot] = Some(handle);
        }
        Ok(true)
    }

    /// Removes `base` from every unit. Used before rendering into it so the
    /// target is never sampled while written.
    pub fn unbind(
        &mut self,
        backend: &mut dyn Backend,
        registry: &ResourceRegistry,
        base: &BaseTexture,
    ) -> Result<(), RenderError> {
        let Some(handle) = registry.textures.handle(base.id()) else { return Ok(()) };
        for (unit, slot) in self.units.iter_mut().enumerate() {
            if *slot == Some(handle) {
                backend.bind_texture(unit as u32, None)?;
                *slot = None;
            }
        }
        Ok(())
    }

    /// Framebuffer rendering into `base`, rebuilt after a resize.
    pub fn framebuffer(
        &mut self,
        backend: &mut dyn Backend,
        registry: &mut ResourceRegistry,
        base: &BaseTexture,
    ) -> Result<Option<NativeFramebuffer>, RenderError> {
        let Some(color) = self.sync(backend, registry, base)? else {
            return Ok(None);
        };
        let version = base.dirty_id();
        if let Some(entry) = registry.framebuffers.get(base.id()) {
            if entry.version == version {
                return Ok(Some(entry.handle));
            }
        }

        let stencil = matches!(*base.source(), TextureSource::RenderTarget { stencil: true });
        let fb = backend.create_framebuffer(color, stencil)?;
        let generation = registry.generation();
        let mut entry = NativeEntry::new(fb, generation, Some(base.tracker()));
        entry.version = version;
        if let Some(old) = registry.framebuffers.insert(base.id(), entry) {
            backend.delete_framebuffer(old);
        }
        Ok(Some(fb))
    }

    /// Unit bindings currently assumed on the backend.
    pub fn bound(&self, unit: u32) -> Option<NativeTexture> {
        self.units.get(unit as usize).copied().flatten()
    }

    /// Forgets unit bindings, e.g. after a context loss.
    pub fn reset(&mut self) {
        self.units.iter_mut().for_each(|u| *u = None);
    }

    /// Drops bookkeeping for textures the registry no longer holds.
    pub fn prune(&mut self, registry: &ResourceRegistry) {
        self.descs.retain(|id, _| registry.textures.get(*id).is_some());
        for slot in self.units.iter_mut() {
            if slot.is_some_and(|h| !registry.textures.contains_handle(h)) {
                *slot = None;
            }
        }
    }

    fn forget_handle(&mut self, handle: NativeTexture) {
        for slot in self.units.iter_mut() {
            if *slot == Some(handle) {
                *slot = None;
            }
        }
    }
}

fn describe(base: &BaseTexture) -> TextureDesc {
    let options = base.options();
    let (width, height) = (base.pixel_width(), base.pixel_height());
    TextureDesc {
        width,
        height,
        mip_levels: if options.mipmap { TextureDesc::full_mip_chain(width, height) } else { 1 },
        scale_mode: options.scale_mode,
        wrap_mode: options.wrap_mode,
        render_target: base.is_render_target(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ScaleMode, SoftwareBackend};
    use crate::texture::{BaseTextureOptions, RenderTexture, Texture};

    fn setup() -> (SoftwareBackend, ResourceRegistry, TextureSystem) {
        let backend = SoftwareBackend::new(8, 8);
        let registry = ResourceRegistry::new(backend.generation());
        (backend, registry, TextureSystem::new(16))
    }

    fn red(w: u32, h: u32) -> BaseTexture {
        let px = [255, 0, 0, 255].repeat((w * h) as usize);
        BaseTexture::from_pixels(w, h, px, BaseTextureOptions::default())
    }

    #[test]
    fn upload_happens_once_per_dirty_id() {
        let (mut backend, mut reg, mut sys) = setup();
        let base = red(4, 4);

        sys.bind(&mut backend, &mut reg, &base, 0).unwrap();
        sys.bind(&mut backend, &mut reg, &base, 0).unwrap();
        assert_eq!(backend.stats().texture_writes, 1);
        assert_eq!(backend.stats().texture_allocs, 1);

        base.update();
        sys.bind(&mut backend, &mut reg, &base, 0).unwrap();
        assert_eq!(backend.stats().texture_writes, 2);
        assert_eq!(backend.stats().texture_allocs, 1);
    }

    #[test]
    fn pending_texture_is_skipped() {
        let (mut backend, mut reg, mut sys) = setup();
        let base = BaseTexture::pending(BaseTextureOptions::default());
        assert!(!sys.bind(&mut backend, &mut reg, &base, 0).unwrap());
        assert_eq!(backend.live_textures(), 0);
    }

    #[test]
    fn destroyed_texture_is_an_error() {
        let (mut backend, mut reg, mut sys) = setup();
        let base = red(2, 2);
        base.destroy();
        let err = sys.bind(&mut backend, &mut reg, &base, 0).unwrap_err();
        assert!(matches!(err, RenderError::UseAfterDestroy { kind: ResourceKind::Texture, .. }));
    }

    #[test]
    fn resize_reallocates() {
        let (mut backend, mut reg, mut sys) = setup();
        let base = red(2, 2);
        sys.sync(&mut backend, &mut reg, &base).unwrap();
        base.set_pixels(4, 2, vec![0; 32]);
        sys.sync(&mut backend, &mut reg, &base).unwrap();
        assert_eq!(backend.live_textures(), 1);
        assert_eq!(backend.stats().texture_allocs, 2);
    }

    #[test]
    fn sampling_change_reallocates() {
        let (mut backend, mut reg, mut sys) = setup();
        let base = red(2, 2);
        sys.sync(&mut backend, &mut reg, &base).unwrap();
        base.set_scale_mode(ScaleMode::Nearest);
        sys.sync(&mut backend, &mut reg, &base).unwrap();
        assert_eq!(backend.stats().texture_allocs, 2);
    }

    #[test]
    fn mipmapped_upload_fills_chain() {
        let (mut backend, mut reg, mut sys) = setup();
        let options = BaseTextureOptions { mipmap: true, ..Default::default() };
        let base = BaseTexture::from_pixels(4, 4, [0, 0, 255, 255].repeat(16), options);
        let handle = sys.sync(&mut backend, &mut reg, &base).unwrap().unwrap();
        assert_eq!(backend.texture_pixels(handle, 2).unwrap(), &[0, 0, 255, 255]);
    }

    #[test]
    fn context_loss_reuploads_from_source() {
        let (mut backend, mut reg, mut sys) = setup();
        let base = red(2, 2);
        sys.bind(&mut backend, &mut reg, &base, 0).unwrap();

        backend.lose_context();
        assert!(reg.prepare(&mut backend).unwrap());
        sys.reset();

        let handle = sys.sync(&mut backend, &mut reg, &base).unwrap().unwrap();
        assert_eq!(backend.texture_pixels(handle, 0).unwrap(), [255, 0, 0, 255].repeat(4).as_slice());
    }

    #[test]
    fn unbind_clears_every_unit_holding_the_texture() {
        let (mut backend, mut reg, mut sys) = setup();
        let rt = RenderTexture::new(4.0, 4.0, 1.0);
        sys.bind(&mut backend, &mut reg, rt.base(), 0).unwrap();
        sys.bind(&mut backend, &mut reg, rt.base(), 3).unwrap();

        sys.unbind(&mut backend, &reg, rt.base()).unwrap();
        assert_eq!(sys.bound(0), None);
        assert_eq!(sys.bound(3), None);
    }

    #[test]
    fn framebuffer_is_rebuilt_after_resize() {
        let (mut backend, mut reg, mut sys) = setup();
        let mut rt = RenderTexture::new(4.0, 4.0, 1.0);
        let a = sys.framebuffer(&mut backend, &mut reg, rt.base()).unwrap().unwrap();
        let again = sys.framebuffer(&mut backend, &mut reg, rt.base()).unwrap().unwrap();
        assert_eq!(a, again);

        rt.resize(8.0, 8.0);
        let b = sys.framebuffer(&mut backend, &mut reg, rt.base()).unwrap().unwrap();
        assert_ne!(a, b);
        assert_eq!(reg.framebuffers.len(), 1);
    }

    #[test]
    fn dropped_texture_is_collected() {
        let (mut backend, mut reg, mut sys) = setup();
        let t = Texture::from_base(red(2, 2));
        sys.sync(&mut backend, &mut reg, t.base()).unwrap();
        drop(t);
        reg.collect_garbage(&mut backend);
        sys.prune(&reg);
        assert_eq!(backend.live_textures(), 0);
    }
}
