//! Scene rendering.
//!
//! The [`Renderer`] walks a [`Scene`](crate::scene::Scene) and hands each
//! drawable to the plugin named by its `plugin()`. Plugins draw through the
//! shared [`RenderContext`], which owns the backend and every render system:
//! - resource registry, geometry, shader and texture systems
//! - render target and projection
//! - fixed-function state (blend, stencil, scissor, color write)
//!
//! Convention:
//! - CPU geometry is in scene units (top-left origin, +Y down)
//! - the projection maps the bound target's source frame onto clip space

pub mod batch;
mod context;
mod error;
mod extract;
mod mask;
mod mesh;
mod options;
mod particle;
mod plugin;
mod projection;
mod renderer;
mod state;
mod target;

pub use batch::{BatchRenderer, BatchVertex};
pub use context::RenderContext;
pub use error::RenderError;
pub use extract::{DiffReport, ImageDiff, Pixels};
pub use mask::{MaskKind, MaskSystem};
pub use mesh::MeshRenderer;
pub use options::{RenderOptions, RendererOptions};
pub use particle::ParticleRenderer;
pub use plugin::{PluginFactory, PluginRegistry, RenderObject, RenderPlugin};
pub use projection::{projection_for, ProjectionSystem};
pub use renderer::{FrameStats, Renderer};
pub use state::StateSystem;
pub use target::{viewport_for, BoundTarget, RenderTargetSystem};
