use crate::coords::{Matrix, Rect};
use crate::device::{Backend, BackendInfo};
use crate::geometry::GeometrySystem;
use crate::resource::{ResourceKind, ResourceRegistry};
use crate::shader::{ShaderSystem, UniformGroup, UniformValue};
use crate::texture::{RenderTexture, TextureSystem};

use super::error::RenderError;
use super::options::RendererOptions;
use super::projection::ProjectionSystem;
use super::state::StateSystem;
use super::target::{viewport_for, BoundTarget, RenderTargetSystem};
use super::FrameStats;

/// Shared state every render plugin draws through.
///
/// Fields are public so plugins can borrow the systems they need
/// independently (e.g. the backend mutably while reading `globals`).
pub struct RenderContext {
    pub backend: Box<dyn Backend>,
    pub registry: ResourceRegistry,
    pub geometry: GeometrySystem,
    pub shaders: ShaderSystem,
    pub textures: TextureSystem,
    pub state: StateSystem,
    pub target: RenderTargetSystem,
    pub projection: ProjectionSystem,
    /// `projectionMatrix` and the batch `tint`, shared by every program.
    pub globals: UniformGroup,
    pub stats: FrameStats,
    pub(crate) options: RendererOptions,
    max_texture_units: u32,
    stencil_bits: u32,
}

impl RenderContext {
    pub(crate) fn new(backend: Box<dyn Backend>, options: RendererOptions) -> Self {
        let info = backend.info();
        let max_texture_units = options
            .texture_units
            .map_or(info.max_texture_units, |u| u.clamp(1, info.max_texture_units));
        let stencil_bits = options.stencil_bits.map_or(info.stencil_bits, |b| b.min(info.stencil_bits));
        log::info!(
            "renderer on `{}`: {max_texture_units} texture units, {stencil_bits} stencil bits",
            info.name
        );

        let registry = ResourceRegistry::new(backend.generation());
        let globals = UniformGroup::new()
            .with("projectionMatrix", UniformValue::Mat3(Matrix::IDENTITY.to_mat3()))
            .with("tint", UniformValue::Vec4([1.0; 4]));

        Self {
            backend,
            registry,
            geometry: GeometrySystem::new(),
            shaders: ShaderSystem::new(),
            textures: TextureSystem::new(max_texture_units),
            state: StateSystem::new(),
            target: RenderTargetSystem::new(),
            projection: ProjectionSystem::new(),
            globals,
            stats: FrameStats::default(),
            options,
            max_texture_units,
            stencil_bits,
        }
    }

    pub fn info(&self) -> &BackendInfo {
        self.backend.info()
    }

    /// Texture units one draw may sample.
    #[inline]
    pub fn max_texture_units(&self) -> u32 {
        self.max_texture_units
    }

    #[inline]
    pub fn stencil_bits(&self) -> u32 {
        self.stencil_bits
    }

    pub fn options(&self) -> &RendererOptions {
        &self.options
    }

    /// Forgets all mirrored backend state. Called when the registry moved to
    /// a new context generation.
    pub(crate) fn reset_systems(&mut self) {
        self.geometry.reset();
        self.textures.reset();
        self.state.reset();
        self.target.reset();
        self.shaders.reset();
    }

    /// Binds `target` (the screen when `None`) and updates the projection.
    ///
    /// `source` defaults to `destination`, which defaults to the full target.
    /// Rebinding the current target with identical frames issues no backend
    /// calls. Returns `true` when anything changed.
    pub fn bind_render_target(
        &mut self,
        target: Option<&RenderTexture>,
        source: Option<Rect>,
        destination: Option<Rect>,
        mip_level: u32,
    ) -> Result<bool, RenderError> {
        let (texture, framebuffer, full, resolution) = match target {
            None => (
                None,
                None,
                Rect::from_size(self.options.width, self.options.height),
                self.options.resolution,
            ),
            Some(rt) => {
                let base = rt.base();
                if base.is_destroyed() {
                    return Err(RenderError::UseAfterDestroy { kind: ResourceKind::Framebuffer, id: base.id() });
                }
                self.textures.unbind(self.backend.as_mut(), &self.registry, base)?;
                let fb = self.textures.framebuffer(self.backend.as_mut(), &mut self.registry, base)?;
                (Some(base.id()), fb, Rect::from_size(rt.width(), rt.height()), rt.resolution())
            }
        };

        let destination = destination.unwrap_or(full);
        let source = source.unwrap_or(destination);
        let next = BoundTarget {
            texture,
            framebuffer,
            mip_level,
            source,
            destination,
            resolution,
            viewport: viewport_for(destination, resolution, mip_level),
        };

        let previous = self.target.current().copied();
        if previous == Some(next) {
            return Ok(false);
        }

        if previous.map(|p| (p.framebuffer, p.mip_level)) != Some((framebuffer, mip_level)) {
            self.backend.bind_framebuffer(framebuffer, mip_level)?;
        }
        if previous.map(|p| p.viewport) != Some(next.viewport) {
            self.backend.set_viewport(next.viewport);
        }
        if previous.map(|p| p.source) != Some(source) {
            let projection = self.projection.update(source);
            self.globals.set("projectionMatrix", UniformValue::Mat3(projection.to_mat3()));
        }
        self.target.set(next);
        Ok(true)
    }
}
