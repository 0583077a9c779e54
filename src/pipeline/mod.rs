// src/pipeline/mod.rs

pub mod event_bus;
pub mod metrics;
pub mod monitor;

pub use event_bus::{EventBus, MonitorEvent};
pub use metrics::{MetricsSummary, MonitorMetrics};
pub use monitor::{FrameReport, TrafficMonitor};
