//! Coordinate and geometry types shared by the scene graph and the render systems.
//!
//! Canonical CPU space:
//! - Scene units (logical pixels)
//! - Origin top-left
//! - +X right, +Y down
//!
//! Projection matrices map a render target's source frame into clip space.

mod matrix;
mod rect;
mod vec2;

pub use matrix::Matrix;
pub use rect::Rect;
pub use vec2::Vec2;
