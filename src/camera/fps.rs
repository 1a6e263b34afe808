//! Frame-rate window and overlay text

use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(1);

/// One-second frame counter.
///
/// The displayed value only changes when a window rolls over, so it lags the
/// real rate by up to a second. Good enough for an on-screen label.
#[derive(Debug, Clone)]
pub struct FpsCounter {
    window_start: Instant,
    count: u32,
    fps: u32,
}

impl FpsCounter {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(now: Instant) -> Self {
        Self {
            window_start: now,
            count: 0,
            fps: 0,
        }
    }

    /// Count one frame at `now`. Returns `Some(fps)` when the window rolled.
    pub fn tick_at(&mut self, now: Instant) -> Option<u32> {
        if now.saturating_duration_since(self.window_start) >= WINDOW {
            self.fps = self.count;
            self.count = 0;
            self.window_start = now;
            Some(self.fps)
        } else {
            self.count += 1;
            None
        }
    }

    pub fn tick(&mut self) -> Option<u32> {
        self.tick_at(Instant::now())
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Text drawn onto both outputs of the primary camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayText {
    pub clock: String,
    pub fps: u32,
}

impl OverlayText {
    pub fn now(fps: u32) -> Self {
        Self {
            clock: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            fps,
        }
    }

    pub fn fps_label(&self) -> String {
        format!("FPS: {:.2}", self.fps as f64)
    }

    /// Both lines, clock first.
    pub fn render(&self) -> String {
        format!("{}\n{}", self.clock, self.fps_label())
    }
}
