//! Frame timing for the render loop.

use std::time::{Duration, Instant};

/// Interval over which [`FrameTimer::tick`] averages the frame rate.
const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Measures per-frame delta time and a rolling frames-per-second figure.
#[derive(Debug)]
pub struct FrameTimer {
    start: Instant,
    last_tick: Instant,
    window_start: Instant,
    window_frames: u32,
    total_frames: u64,
}

impl FrameTimer {
    /// Create a new timer, starting from now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
            window_start: now,
            window_frames: 0,
            total_frames: 0,
        }
    }

    /// Total time since the timer was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Number of frames recorded with [`tick`](Self::tick).
    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// Record one presented frame.
    ///
    /// Returns the delta since the previous tick, plus the average frame rate
    /// whenever a full report interval has elapsed.
    pub fn tick(&mut self) -> (Duration, Option<f64>) {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> (Duration, Option<f64>) {
        let delta = now - self.last_tick;
        self.last_tick = now;
        self.total_frames += 1;
        self.window_frames += 1;

        let window = now - self.window_start;
        if window < REPORT_INTERVAL {
            return (delta, None);
        }

        let fps = f64::from(self.window_frames) / window.as_secs_f64();
        self.window_start = now;
        self.window_frames = 0;
        (delta, Some(fps))
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new()
    }
}
