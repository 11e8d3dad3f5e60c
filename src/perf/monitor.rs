//! Health sampling and adaptive optimization signals

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::events::{AlertKind, EventBus, Optimization, PerfEvent};
use crate::core::{Error, FpsStats, FrameTimer, Result};

const FPS_PENALTY: f32 = 50.0;
const MEMORY_PENALTY: f32 = 30.0;
const CULL_PENALTY: f32 = 20.0;

/// LOD scale factor requested when FPS is below target
const QUALITY_STEP: f32 = 0.8;
/// Budget fraction requested when memory is over budget
const CLEANUP_FRACTION: f32 = 0.7;
/// Culling aggressiveness step requested when the cull ratio is low
const CULLING_STEP: f32 = 0.1;

/// Performance monitor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerfConfig {
    pub sample_interval: Duration,
    pub target_fps: f32,
    pub max_memory_bytes: usize,
    /// Desired culled / total ratio
    pub target_cull_ratio: f32,
    /// Emit optimization events
    pub adaptive: bool,
    /// Minimum time between optimization rounds
    pub optimization_cooldown: Duration,
    pub alert_fps: f32,
    /// Fraction of `max_memory_bytes` that raises a memory alert
    pub alert_memory_fraction: f32,
}

impl Default for PerfConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(1),
            target_fps: 60.0,
            max_memory_bytes: 512 * 1024 * 1024,
            target_cull_ratio: 0.3,
            adaptive: true,
            optimization_cooldown: Duration::from_secs(5),
            alert_fps: 30.0,
            alert_memory_fraction: 0.9,
        }
    }
}

impl PerfConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_interval.is_zero() {
            return Err(Error::config("perf sample interval must be non-zero"));
        }
        if !(self.target_fps > 0.0) || !(self.alert_fps >= 0.0) {
            return Err(Error::config("perf FPS targets must be positive"));
        }
        if self.max_memory_bytes == 0 {
            return Err(Error::config("perf memory budget must be non-zero"));
        }
        if !(0.0..=1.0).contains(&self.target_cull_ratio) {
            return Err(Error::config(format!("target cull ratio {} outside [0, 1]", self.target_cull_ratio)));
        }
        if !(self.alert_memory_fraction > 0.0) {
            return Err(Error::config("alert memory fraction must be positive"));
        }
        Ok(())
    }
}

/// Counters read from the other components at sampling time
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PerfSignals {
    pub total_nodes: usize,
    pub visible_nodes: usize,
    /// Culled / total from the last culling pass
    pub cull_ratio: f32,
    pub memory_bytes: usize,
    pub loaded_chunks: usize,
    pub pending_loads: usize,
    pub loading_progress: f32,
}

/// Letter grade of a health score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    pub fn from_score(score: f32) -> Self {
        match score {
            s if s >= 90.0 => Self::A,
            s if s >= 80.0 => Self::B,
            s if s >= 70.0 => Self::C,
            s if s >= 60.0 => Self::D,
            _ => Self::F,
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// One health sample
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub fps: f32,
    pub frame_time_ms: f32,
    pub fps_stats: FpsStats,
    pub cull_ratio: f32,
    pub memory_bytes: usize,
    pub signals: PerfSignals,
    /// 0 to 100
    pub score: f32,
    pub grade: Grade,
    pub bottlenecks: Vec<String>,
    pub recommendations: Vec<String>,
    /// Optimization events emitted with this sample
    pub optimizations: Vec<Optimization>,
}

/// Samples frame timing and component counters, grades them, and signals
pub struct PerformanceMonitor {
    config: PerfConfig,
    timer: FrameTimer,
    events: EventBus,
    last_sample: Option<Instant>,
    last_optimization: Option<Instant>,
    low_fps_alert: bool,
    high_memory_alert: bool,
    last_report: Option<HealthReport>,
}

impl PerformanceMonitor {
    pub fn new(config: PerfConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            timer: FrameTimer::new(),
            events: EventBus::default(),
            last_sample: None,
            last_optimization: None,
            low_fps_alert: false,
            high_memory_alert: false,
            last_report: None,
        })
    }

    pub fn config(&self) -> &PerfConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PerfEvent> {
        self.events.subscribe()
    }

    pub fn set_adaptive(&mut self, adaptive: bool) {
        self.config.adaptive = adaptive;
    }

    /// Record a frame that took `delta` and ended at `now`
    pub fn record_frame(&mut self, delta: Duration, now: Instant) {
        self.timer.record_frame(delta, now);
    }

    pub fn fps_stats(&self) -> FpsStats {
        self.timer.fps_stats()
    }

    pub fn last_report(&self) -> Option<&HealthReport> {
        self.last_report.as_ref()
    }

    /// Sample if the interval has elapsed, publishing alerts and optimizations
    pub fn sample(&mut self, now: Instant, signals: PerfSignals) -> Option<HealthReport> {
        if let Some(last) = self.last_sample {
            if now.saturating_duration_since(last) < self.config.sample_interval {
                return None;
            }
        }
        self.last_sample = Some(now);

        let mut report = self.evaluate(signals);
        self.raise_alerts(&report);

        let cooled_down = self
            .last_optimization
            .is_none_or(|last| now.saturating_duration_since(last) >= self.config.optimization_cooldown);
        if self.config.adaptive && cooled_down {
            report.optimizations = self.plan_optimizations(&report);
            if !report.optimizations.is_empty() {
                self.last_optimization = Some(now);
                for optimization in &report.optimizations {
                    self.events.publish(PerfEvent::Optimization(*optimization));
                }
            }
        }

        log::debug!(
            "Health {:.0} ({}): {:.1} fps, cull ratio {:.2}, {} KiB",
            report.score,
            report.grade,
            report.fps,
            report.cull_ratio,
            report.memory_bytes / 1024
        );
        self.last_report = Some(report.clone());
        Some(report)
    }

    /// Score the current state without side effects
    pub fn evaluate(&self, signals: PerfSignals) -> HealthReport {
        let config = &self.config;
        let frame_time_ms = self.timer.average_frame_ms(Duration::from_secs(1));
        let fps = if frame_time_ms > 0.0 { 1000.0 / frame_time_ms } else { 0.0 };

        let mut bottlenecks = Vec::new();
        let mut recommendations = Vec::new();
        let mut score = 100.0;

        // No frames yet means nothing to judge
        if frame_time_ms > 0.0 && fps < config.target_fps {
            let shortfall = (config.target_fps - fps) / config.target_fps;
            score -= FPS_PENALTY * shortfall.min(1.0);
            bottlenecks.push(format!("Frame rate {:.1} below target {:.0}", fps, config.target_fps));
            recommendations.push("Reduce LOD distances or the number of visible nodes".to_string());
        }

        if signals.memory_bytes > config.max_memory_bytes {
            let overshoot = (signals.memory_bytes - config.max_memory_bytes) as f32 / config.max_memory_bytes as f32;
            score -= MEMORY_PENALTY * overshoot.min(1.0);
            bottlenecks.push(format!(
                "Memory {} MiB above budget {} MiB",
                signals.memory_bytes / (1024 * 1024),
                config.max_memory_bytes / (1024 * 1024)
            ));
            recommendations.push("Clean up the chunk cache or lower its budget".to_string());
        }

        if signals.total_nodes > 0 && signals.cull_ratio < config.target_cull_ratio && config.target_cull_ratio > 0.0 {
            let shortfall = (config.target_cull_ratio - signals.cull_ratio) / config.target_cull_ratio;
            score -= CULL_PENALTY * shortfall.min(1.0);
            bottlenecks.push(format!(
                "Culling ratio {:.2} below target {:.2}",
                signals.cull_ratio, config.target_cull_ratio
            ));
            recommendations.push("Tighten culling or reduce the view distance".to_string());
        }

        if signals.pending_loads > 0 && signals.loading_progress < 0.5 {
            bottlenecks.push(format!("Streaming behind, {:.0}% of nearby chunks loaded", signals.loading_progress * 100.0));
            recommendations.push("Raise load concurrency or shrink the streaming radii".to_string());
        }

        let score = score.clamp(0.0, 100.0);
        HealthReport {
            fps,
            frame_time_ms,
            fps_stats: self.timer.fps_stats(),
            cull_ratio: signals.cull_ratio,
            memory_bytes: signals.memory_bytes,
            signals,
            score,
            grade: Grade::from_score(score),
            bottlenecks,
            recommendations,
            optimizations: Vec::new(),
        }
    }

    fn plan_optimizations(&self, report: &HealthReport) -> Vec<Optimization> {
        let config = &self.config;
        let mut planned = Vec::new();
        if report.frame_time_ms > 0.0 && report.fps < config.target_fps {
            planned.push(Optimization::ReduceQuality { lod_scale: QUALITY_STEP });
        }
        if report.memory_bytes > config.max_memory_bytes {
            planned.push(Optimization::CleanupCache { target_fraction: CLEANUP_FRACTION });
        }
        if report.signals.total_nodes > 0 && report.cull_ratio < config.target_cull_ratio {
            planned.push(Optimization::IncreaseCulling { step: CULLING_STEP });
        }
        planned
    }

    /// Publish alerts on threshold crossings only
    fn raise_alerts(&mut self, report: &HealthReport) {
        let low_fps = report.frame_time_ms > 0.0 && report.fps < self.config.alert_fps;
        if low_fps && !self.low_fps_alert {
            let message = format!("FPS dropped to {:.1} (alert below {:.0})", report.fps, self.config.alert_fps);
            log::warn!("{}", message);
            self.events.publish(PerfEvent::Alert { kind: AlertKind::LowFps, message });
        }
        self.low_fps_alert = low_fps;

        let limit = self.config.max_memory_bytes as f64 * self.config.alert_memory_fraction as f64;
        let high_memory = report.memory_bytes as f64 > limit;
        if high_memory && !self.high_memory_alert {
            let message = format!("Memory at {} MiB (alert above {:.0} MiB)", report.memory_bytes / (1024 * 1024), limit / (1024.0 * 1024.0));
            log::warn!("{}", message);
            self.events.publish(PerfEvent::Alert { kind: AlertKind::HighMemory, message });
        }
        self.high_memory_alert = high_memory;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(monitor: &mut PerformanceMonitor, start: Instant, frame_ms: u64, frames: u64) -> Instant {
        let mut now = start;
        for _ in 0..frames {
            now += Duration::from_millis(frame_ms);
            monitor.record_frame(Duration::from_millis(frame_ms), now);
        }
        now
    }

    fn healthy_signals() -> PerfSignals {
        PerfSignals { total_nodes: 1000, visible_nodes: 500, cull_ratio: 0.5, memory_bytes: 1024, ..Default::default() }
    }

    #[test]
    fn test_grades() {
        assert_eq!(Grade::from_score(95.0), Grade::A);
        assert_eq!(Grade::from_score(90.0), Grade::A);
        assert_eq!(Grade::from_score(85.0), Grade::B);
        assert_eq!(Grade::from_score(70.0), Grade::C);
        assert_eq!(Grade::from_score(60.0), Grade::D);
        assert_eq!(Grade::from_score(59.9), Grade::F);
    }

    #[test]
    fn test_healthy_scores_full() {
        let mut monitor = PerformanceMonitor::new(PerfConfig::default()).unwrap();
        feed(&mut monitor, Instant::now(), 10, 100);
        let report = monitor.evaluate(healthy_signals());
        assert_eq!(report.score, 100.0);
        assert_eq!(report.grade, Grade::A);
        assert!(report.bottlenecks.is_empty());
    }

    #[test]
    fn test_penalties() {
        let mut monitor = PerformanceMonitor::new(PerfConfig::default()).unwrap();
        // 30 fps is half the target: 25 point penalty
        feed(&mut monitor, Instant::now(), 33, 60);
        let signals = PerfSignals {
            // Fully over budget: 30 points
            memory_bytes: 2 * 512 * 1024 * 1024,
            // No culling at all: 20 points
            cull_ratio: 0.0,
            ..healthy_signals()
        };
        let report = monitor.evaluate(signals);
        let expected_fps_penalty = 50.0 * (60.0 - report.fps) / 60.0;
        assert!((report.score - (100.0 - expected_fps_penalty - 30.0 - 20.0)).abs() < 0.01);
        assert_eq!(report.grade, Grade::F);
        assert_eq!(report.bottlenecks.len(), 3);
        assert_eq!(report.recommendations.len(), 3);
    }

    #[test]
    fn test_sample_interval_and_cooldown() {
        // Alerts off so only optimizations reach the channel
        let mut monitor = PerformanceMonitor::new(PerfConfig { alert_fps: 0.0, ..Default::default() }).unwrap();
        let mut events = monitor.subscribe();
        let start = Instant::now();
        let now = feed(&mut monitor, start, 40, 30);
        let slow = PerfSignals { cull_ratio: 0.0, ..healthy_signals() };

        let report = monitor.sample(now, slow).unwrap();
        assert_eq!(
            report.optimizations,
            vec![
                Optimization::ReduceQuality { lod_scale: QUALITY_STEP },
                Optimization::IncreaseCulling { step: CULLING_STEP },
            ]
        );
        assert!(matches!(events.try_recv().unwrap(), PerfEvent::Optimization(Optimization::ReduceQuality { .. })));
        assert!(matches!(events.try_recv().unwrap(), PerfEvent::Optimization(Optimization::IncreaseCulling { .. })));

        // Inside the sample interval
        assert!(monitor.sample(now + Duration::from_millis(500), slow).is_none());
        // Sampled again, but the optimization cooldown holds
        let report = monitor.sample(now + Duration::from_secs(2), slow).unwrap();
        assert!(report.optimizations.is_empty());
        let report = monitor.sample(now + Duration::from_secs(6), slow).unwrap();
        assert_eq!(report.optimizations.len(), 2);
    }

    #[test]
    fn test_alerts_fire_on_crossing() {
        let mut monitor = PerformanceMonitor::new(PerfConfig { adaptive: false, ..Default::default() }).unwrap();
        let mut events = monitor.subscribe();
        let start = Instant::now();
        let heavy = PerfSignals { memory_bytes: 500 * 1024 * 1024, ..healthy_signals() };

        let now = feed(&mut monitor, start, 50, 20);
        monitor.sample(now, heavy);
        let mut kinds = Vec::new();
        while let Ok(PerfEvent::Alert { kind, .. }) = events.try_recv() {
            kinds.push(kind);
        }
        assert_eq!(kinds, vec![AlertKind::LowFps, AlertKind::HighMemory]);

        // Still bad, no repeat
        monitor.sample(now + Duration::from_secs(1), heavy);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_rejects_invalid_config() {
        assert!(PerformanceMonitor::new(PerfConfig { sample_interval: Duration::ZERO, ..Default::default() }).is_err());
        assert!(PerformanceMonitor::new(PerfConfig { target_cull_ratio: 2.0, ..Default::default() }).is_err());
    }
}
