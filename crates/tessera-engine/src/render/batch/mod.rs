//! Sprite batching.

mod renderer;
mod vertex;

pub use renderer::BatchRenderer;
pub use vertex::BatchVertex;
