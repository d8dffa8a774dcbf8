//! Vertex/index storage with deferred, versioned uploads.

mod buffer;
mod geometry;
mod system;

pub use buffer::Buffer;
pub use geometry::{Attribute, Geometry};
pub use system::GeometrySystem;
