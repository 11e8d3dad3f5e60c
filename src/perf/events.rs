//! Optimization and alert events
//!
//! The monitor only publishes. Subscribers decide for themselves how to react
//! and must treat a repeated event as a no-op when it no longer applies.

use serde::Serialize;
use tokio::sync::broadcast;

/// Buffered events per subscriber before the oldest are dropped
pub const EVENT_CAPACITY: usize = 64;

/// Adaptive optimization requests
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Optimization {
    /// Multiply the LOD distance scale by `lod_scale` (in (0, 1])
    ReduceQuality { lod_scale: f32 },
    /// Evict cached chunks down to `target_fraction` of the budget
    CleanupCache { target_fraction: f32 },
    /// Make culling more aggressive by `step` (fraction)
    IncreaseCulling { step: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    LowFps,
    HighMemory,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PerfEvent {
    Optimization(Optimization),
    Alert { kind: AlertKind, message: String },
}

/// Broadcast channel for [`PerfEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PerfEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PerfEvent> {
        self.tx.subscribe()
    }

    /// Publish to every subscriber, returns how many received it
    pub fn publish(&self, event: PerfEvent) -> usize {
        log::debug!("Perf event: {:?}", event);
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
