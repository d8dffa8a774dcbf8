//! Color and compositing model shared by renderables and render systems.
//!
//! Scope:
//! - color representation (premultiplied alpha)
//! - blend modes and the factors backends apply

mod blend;
mod color;

pub use blend::{BlendFactor, BlendFactors, BlendMode};
pub use color::{premultiply_tint, Color};
