//! Wall-clock stage timing.

use std::time::{Duration, Instant};

/// Measures one stage; durations are reported in seconds rounded to the
/// millisecond.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn duration_s(&self) -> f64 {
        round_seconds(self.elapsed())
    }
}

/// Run `f` and return its output with the rounded duration in seconds.
pub fn timed<T>(f: impl FnOnce() -> T) -> (T, f64) {
    let timer = Timer::start();
    let out = f();
    (out, timer.duration_s())
}

pub fn round_seconds(duration: Duration) -> f64 {
    (duration.as_secs_f64() * 1000.0).round() / 1000.0
}
