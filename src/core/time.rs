//! Frame timing utilities

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// FPS statistics for a time window
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FpsWindow {
    pub avg: f32,
    pub min: f32,
    pub max: f32,
}

/// Rolling FPS statistics over multiple time windows
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FpsStats {
    pub one_sec: FpsWindow,
    pub five_sec: FpsWindow,
    pub fifteen_sec: FpsWindow,
    pub current_fps: f32,
    pub frame_count: u64,
}

/// Longest window kept in the history
const HISTORY_WINDOW: Duration = Duration::from_secs(15);

/// Tracks frame timing and calculates FPS
///
/// Frames can be recorded against the wall clock with [`FrameTimer::tick`] or
/// with an explicit timestamp and duration via [`FrameTimer::record_frame`],
/// which is what the performance monitor and the tests use.
pub struct FrameTimer {
    last_frame: Option<Instant>,
    delta: Duration,
    frame_count: u64,
    fps_timer: Option<Instant>,
    fps: f32,
    fps_frame_count: u32,
    /// Ring buffer of (timestamp, frame_time_secs) for rolling stats
    frame_history: VecDeque<(Instant, f32)>,
    /// Timestamp of the most recent frame
    latest: Option<Instant>,
}

impl FrameTimer {
    /// Create a new frame timer
    pub fn new() -> Self {
        Self {
            last_frame: None,
            delta: Duration::ZERO,
            frame_count: 0,
            fps_timer: None,
            fps: 0.0,
            fps_frame_count: 0,
            frame_history: VecDeque::new(),
            latest: None,
        }
    }

    /// Call once per frame to update timing from the wall clock
    pub fn tick(&mut self) {
        let now = Instant::now();
        let delta = self.last_frame.map(|last| now - last).unwrap_or(Duration::ZERO);
        self.last_frame = Some(now);
        self.record_frame(delta, now);
    }

    /// Record a frame that took `delta` and ended at `now`
    pub fn record_frame(&mut self, delta: Duration, now: Instant) {
        self.delta = delta;
        self.frame_count += 1;
        self.fps_frame_count += 1;
        self.latest = Some(now);

        let frame_time = delta.as_secs_f32();
        self.frame_history.push_back((now, frame_time));

        // Prune frames older than the longest window
        while let Some(&(timestamp, _)) = self.frame_history.front() {
            if now.saturating_duration_since(timestamp) > HISTORY_WINDOW {
                self.frame_history.pop_front();
            } else {
                break;
            }
        }

        // Update FPS every second
        let fps_timer = *self.fps_timer.get_or_insert(now);
        let fps_elapsed = now.saturating_duration_since(fps_timer);
        if fps_elapsed >= Duration::from_secs(1) {
            self.fps = self.fps_frame_count as f32 / fps_elapsed.as_secs_f32();
            self.fps_frame_count = 0;
            self.fps_timer = Some(now);
        }
    }

    /// Get delta time in seconds
    pub fn delta_secs(&self) -> f32 {
        self.delta.as_secs_f32()
    }

    /// Get current FPS (updated every second)
    pub fn fps(&self) -> f32 {
        self.fps
    }

    /// Get total frame count
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Average frame time in milliseconds over the last `window`
    pub fn average_frame_ms(&self, window: Duration) -> f32 {
        let Some(now) = self.latest else {
            return 0.0;
        };
        let (count, total) = self
            .frame_history
            .iter()
            .filter(|(timestamp, _)| now.saturating_duration_since(*timestamp) <= window)
            .fold((0u32, 0.0f32), |(n, sum), &(_, t)| (n + 1, sum + t));
        if count == 0 {
            0.0
        } else {
            total / count as f32 * 1000.0
        }
    }

    /// Get rolling FPS statistics over 1s, 5s, and 15s windows
    pub fn fps_stats(&self) -> FpsStats {
        let Some(now) = self.latest else {
            return FpsStats::default();
        };

        FpsStats {
            one_sec: self.compute_window_stats(now, Duration::from_secs(1)),
            five_sec: self.compute_window_stats(now, Duration::from_secs(5)),
            fifteen_sec: self.compute_window_stats(now, HISTORY_WINDOW),
            current_fps: self.fps,
            frame_count: self.frame_count,
        }
    }

    /// Compute FPS statistics for a given time window
    fn compute_window_stats(&self, now: Instant, window: Duration) -> FpsWindow {
        let mut frame_count = 0;
        let mut total_time = 0.0f32;
        let mut min_fps = f32::INFINITY;
        let mut max_fps = 0.0f32;

        for &(timestamp, frame_time) in self.frame_history.iter() {
            if now.saturating_duration_since(timestamp) <= window {
                frame_count += 1;
                total_time += frame_time;

                let fps = if frame_time > 0.0 { 1.0 / frame_time } else { 0.0 };
                min_fps = min_fps.min(fps);
                max_fps = max_fps.max(fps);
            }
        }

        if frame_count == 0 {
            return FpsWindow::default();
        }

        FpsWindow {
            avg: if total_time > 0.0 { frame_count as f32 / total_time } else { 0.0 },
            min: min_fps,
            max: max_fps,
        }
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_timer() {
        let timer = FrameTimer::new();
        assert_eq!(timer.frame_count(), 0);
        assert_eq!(timer.average_frame_ms(Duration::from_secs(1)), 0.0);
        assert_eq!(timer.fps_stats().one_sec.avg, 0.0);
    }

    #[test]
    fn test_steady_sixty_fps() {
        let mut timer = FrameTimer::new();
        let start = Instant::now();
        let frame = Duration::from_micros(16_667);
        for i in 1..=120u32 {
            timer.record_frame(frame, start + frame * i);
        }

        let stats = timer.fps_stats();
        assert!((stats.one_sec.avg - 60.0).abs() < 1.0, "avg was {}", stats.one_sec.avg);
        assert!((timer.average_frame_ms(Duration::from_secs(1)) - 16.667).abs() < 0.1);
        assert!(timer.fps() > 55.0);
        assert_eq!(stats.frame_count, 120);
    }

    #[test]
    fn test_history_pruned_after_window() {
        let mut timer = FrameTimer::new();
        let start = Instant::now();
        timer.record_frame(Duration::from_millis(100), start);
        timer.record_frame(Duration::from_millis(10), start + Duration::from_secs(20));

        // Only the recent 10ms frame remains
        assert!((timer.average_frame_ms(Duration::from_secs(15)) - 10.0).abs() < 0.01);
    }
}
