//! Frame rate measurement

use std::time::{Duration, Instant};

/// Frames-per-second counter over fixed one second windows.
///
/// The estimate is refreshed at the end of each window, so it stays stable
/// between updates.
#[derive(Debug, Clone)]
pub struct FpsCounter {
    window: Duration,
    window_start: Instant,
    frames: u32,
    fps: f64,
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl FpsCounter {
    /// Create a counter with a one second window
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(1))
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            window_start: Instant::now(),
            frames: 0,
            fps: 0.0,
        }
    }

    /// Count one frame
    pub fn tick(&mut self) -> f64 {
        self.tick_at(Instant::now())
    }

    /// Count one frame at `now`
    pub fn tick_at(&mut self, now: Instant) -> f64 {
        self.frames += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= self.window {
            self.fps = self.frames as f64 / elapsed.as_secs_f64();
            self.frames = 0;
            self.window_start = now;
        }
        self.fps
    }

    /// Last completed window's estimate
    pub fn fps(&self) -> f64 {
        self.fps
    }
}
