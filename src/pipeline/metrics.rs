// src/pipeline/metrics.rs
//
// Counters for the processing loop. Cheap to clone; every clone shares
// the same atomics so main can read them while the loop runs.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct MonitorMetrics {
    pub frames_processed: Arc<AtomicU64>,
    pub frames_with_detections: Arc<AtomicU64>,
    pub vehicles_started: Arc<AtomicU64>,
    pub speed_events: Arc<AtomicU64>,
    pub speeding_events: Arc<AtomicU64>,
    pub discarded_measurements: Arc<AtomicU64>,
    pub processing_faults: Arc<AtomicU64>,
    pub processing_time_us: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl Default for MonitorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorMetrics {
    pub fn new() -> Self {
        Self {
            frames_processed: Arc::new(AtomicU64::new(0)),
            frames_with_detections: Arc::new(AtomicU64::new(0)),
            vehicles_started: Arc::new(AtomicU64::new(0)),
            speed_events: Arc::new(AtomicU64::new(0)),
            speeding_events: Arc::new(AtomicU64::new(0)),
            discarded_measurements: Arc::new(AtomicU64::new(0)),
            processing_faults: Arc::new(AtomicU64::new(0)),
            processing_time_us: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_timing(&self, counter: &AtomicU64, duration_us: u64) {
        counter.store(duration_us, Ordering::Relaxed);
    }

    /// Processed frames per second since construction.
    pub fn fps(&self) -> f64 {
        let frames = self.frames_processed.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            fps: self.fps(),
            frames_with_detections: self.frames_with_detections.load(Ordering::Relaxed),
            vehicles_started: self.vehicles_started.load(Ordering::Relaxed),
            speed_events: self.speed_events.load(Ordering::Relaxed),
            speeding_events: self.speeding_events.load(Ordering::Relaxed),
            discarded_measurements: self.discarded_measurements.load(Ordering::Relaxed),
            processing_faults: self.processing_faults.load(Ordering::Relaxed),
            last_processing_us: self.processing_time_us.load(Ordering::Relaxed),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub frames_processed: u64,
    pub fps: f64,
    pub frames_with_detections: u64,
    pub vehicles_started: u64,
    pub speed_events: u64,
    pub speeding_events: u64,
    pub discarded_measurements: u64,
    pub processing_faults: u64,
    pub last_processing_us: u64,
    pub elapsed_secs: f64,
}
