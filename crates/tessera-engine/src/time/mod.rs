//! Frame timing, one [`FrameClock`] per window.

mod frame_clock;

pub use frame_clock::{FrameClock, FrameTime};
