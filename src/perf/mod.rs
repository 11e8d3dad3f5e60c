//! Performance monitoring and adaptive optimization events

pub mod events;
pub mod monitor;

pub use events::{AlertKind, EventBus, Optimization, PerfEvent};
pub use monitor::{Grade, HealthReport, PerfConfig, PerfSignals, PerformanceMonitor};
