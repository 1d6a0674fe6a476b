//! Frame timing

use std::time::{Duration, Instant};

/// High-precision timer for frame timing
pub struct Timer {
    last_frame: Instant,
    last_report: Instant,
    delta_time: f32,
    total_time: f32,
    frame_count: u64,
    frames_since_report: u64,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer {
    /// Create a new timer
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            last_frame: now,
            last_report: now,
            delta_time: 0.0,
            total_time: 0.0,
            frame_count: 0,
            frames_since_report: 0,
        }
    }

    /// Update the timer (should be called once per frame)
    pub fn update(&mut self) {
        let now = Instant::now();
        self.advance(now.duration_since(self.last_frame));
        self.last_frame = now;
    }

    fn advance(&mut self, elapsed: Duration) {
        self.delta_time = elapsed.as_secs_f32();
        self.total_time += self.delta_time;
        self.frame_count += 1;
        self.frames_since_report += 1;
    }

    /// Time since the last frame in seconds
    pub fn delta_time(&self) -> f32 {
        self.delta_time
    }

    /// Total elapsed time since timer creation
    pub fn total_time(&self) -> f32 {
        self.total_time
    }

    /// Number of frames counted so far
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Average FPS since timer creation
    pub fn average_fps(&self) -> f32 {
        if self.total_time > 0.0 {
            self.frame_count as f32 / self.total_time
        } else {
            0.0
        }
    }

    /// Returns the FPS over the last interval once `interval` has elapsed
    pub fn take_report(&mut self, interval: Duration) -> Option<f32> {
        let elapsed = self.last_report.elapsed();
        if elapsed < interval {
            return None;
        }
        let fps = self.frames_since_report as f32 / elapsed.as_secs_f32();
        self.frames_since_report = 0;
        self.last_report = Instant::now();
        Some(fps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_advance_accumulates_time_and_frames() {
        let mut timer = Timer::new();
        timer.advance(Duration::from_millis(250));
        timer.advance(Duration::from_millis(250));
        assert_eq!(timer.frame_count(), 2);
        assert_relative_eq!(timer.total_time(), 0.5, epsilon = 1e-5);
        assert_relative_eq!(timer.average_fps(), 4.0, epsilon = 1e-3);
    }

    #[test]
    fn test_report_waits_for_interval() {
        let mut timer = Timer::new();
        timer.advance(Duration::from_millis(16));
        assert!(timer.take_report(Duration::from_secs(3600)).is_none());
        assert!(timer.take_report(Duration::ZERO).is_some());
    }
}
