//! Display tree consumed by the renderer.
//!
//! Responsibilities:
//! - hold nodes with transforms, alpha and optional drawable content
//! - compute world transforms top-down with id-based change tracking
//! - provide deterministic paint order (list order, or stable z-index sort)

mod graph;
mod graphics;
mod key;
mod mesh;
mod node;
mod particles;
mod renderable;
mod sprite;
mod transform;

pub use graph::{Scene, SceneError};
pub use graphics::Graphics;
pub use indextree::NodeId;
pub use key::SortKey;
pub use mesh::{Mesh, BATCHABLE_SIZE};
pub use node::{MaskSource, Node};
pub use particles::{Particle, ParticleContainer, MAX_PARTICLES};
pub use renderable::{BatchElement, Indices, Renderable, BATCH, MESH, PARTICLE};
pub use sprite::Sprite;
pub use transform::Transform;

pub(crate) use renderable::transform_points;
