use thiserror::Error;

use crate::device::BackendError;
use crate::resource::{ResourceId, ResourceKind};
use crate::shader::ShaderError;

/// Failure of a render system or of the renderer facade.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The renderer was destroyed and can no longer be used.
    #[error("renderer has been destroyed")]
    Destroyed,

    #[error("{kind} {id} used after destroy()")]
    UseAfterDestroy { kind: ResourceKind, id: ResourceId },

    #[error("geometry does not provide attribute `{attribute}` required by program `{program}`")]
    AttributeMismatch { program: String, attribute: String },

    #[error("value for uniform `{name}` of program `{program}` has the wrong type")]
    UniformType { program: String, name: String },

    #[error("mask depth {depth} exceeds the {max} levels the stencil buffer can represent")]
    MaskOverflow { depth: u32, max: u32 },

    #[error("pop_mask called with an empty mask stack")]
    MaskUnderflow,

    #[error("no render plugin registered as `{0}`")]
    UnknownPlugin(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Shader(#[from] ShaderError),
}

impl RenderError {
    /// Context loss surfaced through a render system.
    pub fn is_context_lost(&self) -> bool {
        matches!(self, RenderError::Backend(BackendError::ContextLost))
    }
}
