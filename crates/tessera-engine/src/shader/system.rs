use std::collections::HashMap;
use std::rc::Rc;

use crate::device::{Backend, NativeProgram};
use crate::render::RenderError;
use crate::resource::{NativeEntry, ResourceRegistry};
use crate::texture::TextureSystem;

use super::program::ProgramWatch;
use super::{
    CompiledProgram, GroupEntry, Program, ProgramKey, ShaderCompiler, ShaderError, UniformGroup,
    UniformValue,
};

/// Prune calls a uniform group may go unused before its sync record is
/// dropped.
const IDLE_GROUP_FRAMES: u64 = 120;

/// Compiles programs once, keeps their native counterparts current and
/// uploads uniform groups.
///
/// A group is skipped entirely when the program already saw its current
/// `dirty_id`; inside a dirty group only values that differ from the last
/// upload reach the backend. Texture entries are bound on every call since
/// unit assignments are shared with other programs.
pub struct ShaderSystem {
    compiler: ShaderCompiler,
    compiled: HashMap<ProgramKey, Result<Rc<CompiledProgram>, ShaderError>>,
    /// Most recently compiled or bound source per key.
    owners: HashMap<ProgramKey, ProgramWatch>,
    /// `(program, group id)` → group `dirty_id` last synced and the prune
    /// frame it was last seen in.
    synced: HashMap<(ProgramKey, u64), (u64, u64)>,
    /// `(program, uniform location)` → value last uploaded.
    uploaded: HashMap<(ProgramKey, u32), UniformValue>,
    current: Option<NativeProgram>,
    generation: u64,
    frame: u64,
}

impl Default for ShaderSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl ShaderSystem {
    pub fn new() -> Self {
        Self {
            compiler: ShaderCompiler::new(),
            compiled: HashMap::new(),
            owners: HashMap::new(),
            synced: HashMap::new(),
            uploaded: HashMap::new(),
            current: None,
            generation: 0,
            frame: 0,
        }
    }

    /// Compiles `program`, or returns the cached outcome.
    ///
    /// Failures are cached too and logged only the first time, so a broken
    /// shader costs one diagnostic rather than one per frame.
    pub fn compile(&mut self, program: &Program) -> Result<Rc<CompiledProgram>, ShaderError> {
        if !self.owners.get(&program.key()).is_some_and(ProgramWatch::is_alive) {
            self.owners.insert(program.key(), program.watch());
        }
        if let Some(result) = self.compiled.get(&program.key()) {
            return result.clone();
        }
        let result = self.compiler.compile(program).map(Rc::new);
        match &result {
            Ok(c) => log::debug!(
                "program `{}` compiled: {} attributes, {} uniforms, {} textures",
                c.name,
                c.info.attributes.len(),
                c.info.uniforms.len(),
                c.info.textures.len()
            ),
            Err(e) => log::error!("{e}"),
        }
        self.compiled.insert(program.key(), result.clone());
        result
    }

    /// Native program for `compiled` in the current context generation.
    pub fn realize(
        &mut self,
        backend: &mut dyn Backend,
        registry: &mut ResourceRegistry,
        compiled: &CompiledProgram,
    ) -> Result<NativeProgram, RenderError> {
        self.check_generation(registry);
        if let Some(handle) = registry.programs.handle(compiled.key) {
            return Ok(handle);
        }
        let handle = backend.create_program(compiled)?;
        let generation = registry.generation();
        registry.programs.insert(compiled.key, NativeEntry::new(handle, generation, None));
        self.uploaded.retain(|(k, _), _| *k != compiled.key);
        self.synced.retain(|(k, _), _| *k != compiled.key);
        Ok(handle)
    }

    /// Makes `program` current and uploads `groups` in order.
    ///
    /// Texture entries take the unit equal to their index among the
    /// program's textures.
    pub fn bind(
        &mut self,
        backend: &mut dyn Backend,
        registry: &mut ResourceRegistry,
        textures: &mut TextureSystem,
        program: &Program,
        groups: &[&UniformGroup],
    ) -> Result<Rc<CompiledProgram>, RenderError> {
        let compiled = self.compile(program)?;
        let native = self.realize(backend, registry, &compiled)?;
        if self.current != Some(native) {
            backend.use_program(native)?;
            self.current = Some(native);
        }

        for group in groups {
            let fresh = self.synced.get(&(compiled.key, group.id())).map(|s| s.0) != Some(group.dirty_id());
            for (name, entry) in group.iter() {
                match entry {
                    GroupEntry::Texture(texture) => {
                        let Some(unit) = compiled.info.textures.iter().position(|t| t.name == name) else {
                            continue;
                        };
                        textures.bind(backend, registry, texture.base(), unit as u32)?;
                        self.upload(backend, native, &compiled, name, &UniformValue::Sampler(unit as u32))?;
                    }
                    GroupEntry::Value(value) if fresh => {
                        self.upload(backend, native, &compiled, name, value)?;
                    }
                    GroupEntry::Value(_) => {}
                }
            }
            self.synced.insert((compiled.key, group.id()), (group.dirty_id(), self.frame));
        }
        Ok(compiled)
    }

    fn upload(
        &mut self,
        backend: &mut dyn Backend,
        native: NativeProgram,
        compiled: &CompiledProgram,
        name: &str,
        value: &UniformValue,
    ) -> Result<(), RenderError> {
        let Some(info) = compiled.info.uniform(name) else {
            return Ok(());
        };
        if !value.matches(info.ty, info.size) {
            return Err(RenderError::UniformType {
                program: compiled.name.clone(),
                name: name.to_string(),
            });
        }
        let key = (compiled.key, info.location);
        if self.uploaded.get(&key) == Some(value) {
            return Ok(());
        }
        backend.set_uniform(native, info, value)?;
        self.uploaded.insert(key, value.clone());
        Ok(())
    }

    /// Program currently in use on the backend.
    pub fn current(&self) -> Option<NativeProgram> {
        self.current
    }

    /// Evicts programs no live [`Program`] refers to, deleting their native
    /// objects, and sync records of groups idle for a while. Returns the
    /// number of programs evicted.
    pub fn prune(&mut self, backend: &mut dyn Backend, registry: &mut ResourceRegistry) -> usize {
        self.frame += 1;
        let horizon = self.frame.saturating_sub(IDLE_GROUP_FRAMES);
        self.synced.retain(|_, (_, seen)| *seen >= horizon);

        let dead: Vec<ProgramKey> = self
            .owners
            .iter()
            .filter(|(_, watch)| !watch.is_alive())
            .map(|(key, _)| *key)
            .collect();
        for key in &dead {
            self.owners.remove(key);
            self.compiled.remove(key);
            self.synced.retain(|(k, _), _| k != key);
            self.uploaded.retain(|(k, _), _| k != key);
            if let Some(handle) = registry.programs.remove(*key) {
                if self.current == Some(handle) {
                    self.current = None;
                }
                backend.delete_program(handle);
            }
        }
        if !dead.is_empty() {
            log::debug!("shaders: evicted {} unused programs", dead.len());
        }
        dead.len()
    }

    /// Compiled outcomes currently cached, failures included.
    pub fn cached_programs(&self) -> usize {
        self.compiled.len()
    }

    /// Forgets backend-side state, e.g. after a context loss.
    pub fn reset(&mut self) {
        self.current = None;
        self.synced.clear();
        self.uploaded.clear();
    }

    fn check_generation(&mut self, registry: &ResourceRegistry) {
        if registry.generation() != self.generation {
            self.reset();
            self.generation = registry.generation();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::Matrix;
    use crate::device::SoftwareBackend;
    use crate::shader::builtin::mesh_program;
    use crate::texture::{BaseTexture, BaseTextureOptions, Texture};

    struct Fixture {
        backend: SoftwareBackend,
        registry: ResourceRegistry,
        textures: TextureSystem,
        shaders: ShaderSystem,
    }

    fn fixture() -> Fixture {
        let backend = SoftwareBackend::new(4, 4);
        let registry = ResourceRegistry::new(backend.generation());
        Fixture { backend, registry, textures: TextureSystem::new(16), shaders: ShaderSystem::new() }
    }

    impl Fixture {
        fn bind(
            &mut self,
            program: &Program,
            groups: &[&UniformGroup],
        ) -> Result<Rc<CompiledProgram>, RenderError> {
            self.shaders.bind(&mut self.backend, &mut self.registry, &mut self.textures, program, groups)
        }
    }

    fn mesh_uniforms() -> UniformGroup {
        UniformGroup::new()
            .with("translationMatrix", UniformValue::Mat3(Matrix::IDENTITY.to_mat3()))
            .with("uColor", UniformValue::Vec4([1.0; 4]))
    }

    #[test]
    fn clean_group_is_not_uploaded_again() {
        let mut f = fixture();
        let program = mesh_program(false);
        let group = mesh_uniforms();

        f.bind(&program, &[&group]).unwrap();
        let writes = f.backend.stats().uniform_writes;
        assert_eq!(writes, 2);

        f.bind(&program, &[&group]).unwrap();
        assert_eq!(f.backend.stats().uniform_writes, writes);
        assert_eq!(f.backend.stats().program_links, 1);
    }

    #[test]
    fn dirty_group_uploads_only_changed_values() {
        let mut f = fixture();
        let program = mesh_program(false);
        let mut group = mesh_uniforms();
        f.bind(&program, &[&group]).unwrap();

        group.set("uColor", UniformValue::Vec4([0.5; 4]));
        f.bind(&program, &[&group]).unwrap();
        assert_eq!(f.backend.stats().uniform_writes, 3);
    }

    #[test]
    fn wrong_value_type_is_rejected() {
        let mut f = fixture();
        let group = UniformGroup::new().with("uColor", UniformValue::Mat3([0.0; 9]));
        let err = f.bind(&mesh_program(false), &[&group]).unwrap_err();
        assert!(matches!(err, RenderError::UniformType { name, .. } if name == "uColor"));
    }

    #[test]
    fn failed_compile_is_cached() {
        let mut f = fixture();
        let broken = Program::new("broken", "#version 450\nvoid main() { oops }\n", "void main() {}");
        assert!(matches!(f.bind(&broken, &[]), Err(RenderError::Shader(ShaderError::Compile { .. }))));
        assert!(matches!(f.bind(&broken, &[]), Err(RenderError::Shader(ShaderError::Compile { .. }))));
        assert_eq!(f.backend.live_programs(), 0);
    }

    #[test]
    fn texture_entry_binds_its_unit() {
        let mut f = fixture();
        let base = BaseTexture::from_pixels(1, 1, vec![255; 4], BaseTextureOptions::default());
        let mut group = mesh_uniforms();
        group.set_texture("uSampler", Texture::from_base(base.clone()));

        f.bind(&mesh_program(false), &[&group]).unwrap();
        assert!(f.textures.bound(0).is_some());
        assert_eq!(f.registry.textures.handle(base.id()), f.textures.bound(0));
    }

    #[test]
    fn context_loss_recreates_program_and_uniforms() {
        let mut f = fixture();
        let program = mesh_program(false);
        let group = mesh_uniforms();
        f.bind(&program, &[&group]).unwrap();

        f.backend.lose_context();
        assert!(f.registry.prepare(&mut f.backend).unwrap());
        f.backend.reset_stats();

        f.bind(&program, &[&group]).unwrap();
        assert_eq!(f.backend.live_programs(), 1);
        assert_eq!(f.backend.stats().program_links, 1);
        assert_eq!(f.backend.stats().uniform_writes, 2);
    }

    #[test]
    fn dropped_program_is_evicted() {
        let mut f = fixture();
        let kept = mesh_program(false);
        let custom = mesh_program(true);
        let group = mesh_uniforms();
        f.bind(&kept, &[&group]).unwrap();
        f.bind(&custom, &[&group]).unwrap();
        assert_eq!(f.backend.live_programs(), 2);

        assert_eq!(f.shaders.prune(&mut f.backend, &mut f.registry), 0);
        drop(custom);
        assert_eq!(f.shaders.prune(&mut f.backend, &mut f.registry), 1);
        assert_eq!(f.shaders.cached_programs(), 1);
        assert_eq!(f.registry.programs.len(), 1);
        assert_eq!(f.backend.live_programs(), 1);
        assert_eq!(f.shaders.current(), None);

        f.bind(&kept, &[&group]).unwrap();
        assert_eq!(f.backend.stats().program_links, 2);
    }

    #[test]
    fn idle_group_records_expire() {
        let mut f = fixture();
        let program = mesh_program(false);
        let group = mesh_uniforms();
        f.bind(&program, &[&group]).unwrap();
        for _ in 0..=IDLE_GROUP_FRAMES {
            f.shaders.prune(&mut f.backend, &mut f.registry);
        }
        assert!(f.shaders.synced.is_empty());
        assert_eq!(f.shaders.cached_programs(), 1);
    }
}
