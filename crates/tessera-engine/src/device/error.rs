use thiserror::Error;

/// Failure reported by a [`Backend`](super::Backend).
#[derive(Debug, Error)]
pub enum BackendError {
    /// Every native handle is invalid until `restore` succeeds.
    #[error("rendering context lost")]
    ContextLost,

    #[error("unknown native {kind} handle {handle}")]
    UnknownHandle { kind: &'static str, handle: u32 },

    #[error("out of GPU memory")]
    OutOfMemory,

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("surface error: {0}")]
    Surface(String),
}

/// What the presenter did about a failed frame acquisition.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SurfaceErrorAction {
    /// Surface reconfigured; the next frame presents normally.
    Reconfigured,
    /// Nothing presented this frame.
    SkipFrame,
    /// Out of memory; rendering cannot continue.
    Fatal,
}
