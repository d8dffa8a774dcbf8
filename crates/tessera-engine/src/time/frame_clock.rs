use std::time::{Duration, Instant};

/// Timing of one frame.
#[derive(Debug, Copy, Clone)]
pub struct FrameTime {
    /// Clamped seconds since the previous tick.
    pub dt: f32,
    /// Seconds of clamped time accumulated since the clock started.
    pub elapsed: f64,
    pub now: Instant,
    pub frame_index: u64,
}

/// Per-window frame clock.
///
/// Deltas are clamped so a stalled or minimized window does not produce a
/// huge step for animations driven by `dt`.
#[derive(Debug, Clone)]
pub struct FrameClock {
    last: Instant,
    elapsed: f64,
    frame_index: u64,
    dt_min: Duration,
    dt_max: Duration,
    /// Exponential moving average of `dt`.
    smoothed_dt: f32,
}

/// Weight of the newest sample in the smoothed frame time.
const SMOOTHING: f32 = 0.1;

impl FrameClock {
    pub fn new() -> Self {
        Self::with_clamps(Duration::from_micros(100), Duration::from_millis(250))
    }

    pub fn with_clamps(dt_min: Duration, dt_max: Duration) -> Self {
        debug_assert!(dt_min <= dt_max);
        Self { last: Instant::now(), elapsed: 0.0, frame_index: 0, dt_min, dt_max, smoothed_dt: 0.0 }
    }

    /// Restarts delta measurement, e.g. after the window was hidden.
    pub fn reset(&mut self) {
        self.last = Instant::now();
    }

    pub fn tick(&mut self) -> FrameTime {
        let now = Instant::now();
        self.advance(now, now.saturating_duration_since(self.last))
    }

    fn advance(&mut self, now: Instant, raw: Duration) -> FrameTime {
        let dt = raw.clamp(self.dt_min, self.dt_max).as_secs_f32();
        self.last = now;
        self.elapsed += dt as f64;
        self.smoothed_dt = if self.frame_index == 0 { dt } else { self.smoothed_dt + (dt - self.smoothed_dt) * SMOOTHING };

        let ft = FrameTime { dt, elapsed: self.elapsed, now, frame_index: self.frame_index };
        self.frame_index = self.frame_index.wrapping_add(1);
        ft
    }

    /// Smoothed frames per second; 0 before the first tick.
    pub fn fps(&self) -> f32 {
        if self.smoothed_dt > 0.0 { 1.0 / self.smoothed_dt } else { 0.0 }
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deltas_are_clamped() {
        let mut clock = FrameClock::with_clamps(Duration::from_millis(1), Duration::from_millis(100));
        let now = Instant::now();
        assert!((clock.advance(now, Duration::ZERO).dt - 0.001).abs() < 1e-7);
        assert!((clock.advance(now, Duration::from_secs(5)).dt - 0.1).abs() < 1e-6);
    }

    #[test]
    fn elapsed_and_index_accumulate() {
        let mut clock = FrameClock::new();
        let now = Instant::now();
        clock.advance(now, Duration::from_millis(20));
        let ft = clock.advance(now, Duration::from_millis(30));
        assert_eq!(ft.frame_index, 1);
        assert!((ft.elapsed - 0.05).abs() < 1e-6);
    }

    #[test]
    fn fps_follows_steady_frame_time() {
        let mut clock = FrameClock::new();
        let now = Instant::now();
        assert_eq!(clock.fps(), 0.0);
        for _ in 0..50 {
            clock.advance(now, Duration::from_millis(20));
        }
        assert!((clock.fps() - 50.0).abs() < 0.5);
    }
}
