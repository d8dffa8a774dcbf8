//! Contract between the window runtime and applications.
//!
//! Applications implement [`App`] and receive a [`FrameCtx`] holding the
//! window's [`Renderer`](crate::render::Renderer) once per redraw.

mod app;
mod ctx;

pub use app::{App, AppControl};
pub use ctx::{FrameCtx, WindowCtx};
