//! GPU resource registry.
//!
//! Maps logical resources (buffers, textures, programs, framebuffers) to the
//! native handles of the current context generation and survives context
//! loss by re-realizing them lazily.

mod id;
mod registry;

pub use id::{ResourceId, ResourceKind, TrackedResource};
pub use registry::{ContextState, NativeEntry, NativeTable, ResourceRegistry};
