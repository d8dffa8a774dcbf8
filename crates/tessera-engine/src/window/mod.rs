//! Window + runtime loop.
//!
//! Owns the `winit` event loop and one window, surface and renderer per
//! open window.

mod runtime;

pub use runtime::{Runtime, RuntimeConfig, RuntimeCtx};
