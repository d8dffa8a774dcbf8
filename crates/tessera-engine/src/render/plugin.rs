use std::fmt;

use crate::coords::Matrix;
use crate::scene::{Renderable, BATCH, MESH, PARTICLE};

use super::batch::BatchRenderer;
use super::context::RenderContext;
use super::error::RenderError;
use super::mesh::MeshRenderer;
use super::particle::ParticleRenderer;

/// One object handed to a plugin, with the scene state it is drawn with.
pub struct RenderObject<'a> {
    pub content: &'a mut dyn Renderable,
    pub world: &'a Matrix,
    pub world_id: u64,
    pub world_alpha: f32,
}

/// Draws one family of renderables.
///
/// The renderer keeps at most one plugin active: switching to another one
/// calls `stop` on the previous plugin (which must flush) before `start` on
/// the next. State shared with other plugins lives in the
/// [`RenderContext`]; plugins must not assume it survives a switch.
pub trait RenderPlugin {
    /// Called once per frame before anything is drawn.
    fn begin_frame(&mut self, _ctx: &mut RenderContext) {}

    fn start(&mut self, _ctx: &mut RenderContext) -> Result<(), RenderError> {
        Ok(())
    }

    fn render(&mut self, ctx: &mut RenderContext, object: RenderObject<'_>) -> Result<(), RenderError>;

    /// Issues everything accumulated so far.
    fn flush(&mut self, _ctx: &mut RenderContext) -> Result<(), RenderError> {
        Ok(())
    }

    fn stop(&mut self, ctx: &mut RenderContext) -> Result<(), RenderError> {
        self.flush(ctx)
    }

    /// Releases plugin-owned resources when the renderer is destroyed.
    fn destroy(&mut self, _ctx: &mut RenderContext) {}
}

/// Builds a plugin for a freshly created renderer.
pub type PluginFactory = Box<dyn Fn(&RenderContext) -> Box<dyn RenderPlugin>>;

/// Named plugin factories a renderer is constructed with.
///
/// Later registrations under the same name replace earlier ones.
#[derive(Default)]
pub struct PluginRegistry {
    factories: Vec<(String, PluginFactory)>,
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.factories.iter().map(|(name, _)| name)).finish()
    }
}

impl PluginRegistry {
    /// Registry without any plugin.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in batch, mesh and particle renderers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(BATCH, |ctx| Box::new(BatchRenderer::new(ctx)));
        registry.register(MESH, |_| Box::new(MeshRenderer::new()));
        registry.register(PARTICLE, |_| Box::new(ParticleRenderer::new()));
        registry
    }

    pub fn register(
        &mut self,
        name: &str,
        factory: impl Fn(&RenderContext) -> Box<dyn RenderPlugin> + 'static,
    ) -> &mut Self {
        self.factories.retain(|(n, _)| n != name);
        self.factories.push((name.to_string(), Box::new(factory)));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.iter().any(|(n, _)| n == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.iter().map(|(n, _)| n.as_str())
    }

    pub(crate) fn instantiate(&self, ctx: &RenderContext) -> Vec<(String, Box<dyn RenderPlugin>)> {
        self.factories.iter().map(|(name, factory)| (name.clone(), factory(ctx))).collect()
    }
}
