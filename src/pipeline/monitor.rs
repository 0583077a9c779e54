// src/pipeline/monitor.rs
//
// The single sequential processing loop: latest frame → motion estimator →
// strongest detection → SpeedEngine → events. Estimator and engine are
// owned here and never touched from another thread.

use super::event_bus::{EventBus, MonitorEvent};
use super::metrics::{MetricsSummary, MonitorMetrics};
use crate::detection::MotionEstimator;
use crate::error::MonitorResult;
use crate::frame_source::FrameReader;
use crate::speed::{CrossingOutcome, SpeedEngine};
use crate::types::{Frame, MonitorConfig};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// What processing one frame produced.
#[derive(Debug, Clone)]
pub struct FrameReport {
    pub sequence: u64,
    pub detections: usize,
    /// `None` when the frame had no detection to feed the engine
    pub outcome: Option<CrossingOutcome>,
}

pub struct TrafficMonitor {
    config: MonitorConfig,
    reader: FrameReader,
    detector: Box<dyn MotionEstimator>,
    engine: SpeedEngine,
    events: EventBus,
    metrics: MonitorMetrics,
    shutdown: Arc<AtomicBool>,
    last_sequence: Option<u64>,
}

impl TrafficMonitor {
    pub fn new(
        reader: FrameReader,
        detector: Box<dyn MotionEstimator>,
        engine: SpeedEngine,
        config: &MonitorConfig,
    ) -> Self {
        Self {
            config: config.clone(),
            reader,
            detector,
            engine,
            events: EventBus::new(config.event_queue),
            metrics: MonitorMetrics::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
            last_sequence: None,
        }
    }

    /// Set to `true` to make `run` return after the current frame.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn metrics(&self) -> MonitorMetrics {
        self.metrics.clone()
    }

    pub fn engine(&self) -> &SpeedEngine {
        &self.engine
    }

    /// Events published since the last drain, oldest first.
    pub fn drain_events(&mut self) -> Vec<MonitorEvent> {
        self.events.drain()
    }

    /// Poll the frame source until shutdown. Every published event is
    /// handed to `on_event` right after the frame that produced it.
    pub fn run<F>(&mut self, mut on_event: F) -> MetricsSummary
    where
        F: FnMut(MonitorEvent),
    {
        let poll = Duration::from_millis(self.config.poll_interval_ms.max(1));
        self.warm_up(poll);
        info!("✓ Processing loop running");

        while !self.shutdown.load(Ordering::Relaxed) {
            let fresh = match (self.reader.latest_sequence(), self.last_sequence) {
                (Some(latest), Some(seen)) => latest != seen,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if !fresh {
                std::thread::sleep(poll);
                continue;
            }

            // The producer may have evicted everything in between; that is
            // the same as an empty buffer.
            let Some(frame) = self.reader.get_latest() else {
                std::thread::sleep(poll);
                continue;
            };

            match panic::catch_unwind(AssertUnwindSafe(|| self.process_frame(&frame))) {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    self.metrics.inc(&self.metrics.processing_faults);
                    warn!("Frame {} skipped: {}", frame.sequence, e);
                }
                Err(cause) => {
                    self.metrics.inc(&self.metrics.processing_faults);
                    error!(
                        "Frame {} skipped after a panic: {}",
                        frame.sequence,
                        panic_message(cause.as_ref())
                    );
                }
            }

            for event in self.events.drain() {
                on_event(event);
            }
        }

        if let Some(pending) = self.engine.pending() {
            info!(
                "Vehicle #{} still waiting for {} line at shutdown ({:.1}s)",
                pending.vehicle_number,
                pending.line.other().as_str(),
                self.reader.now() - pending.timestamp
            );
        }
        self.metrics.summary()
    }

    /// Give the camera time to settle; returns early on shutdown.
    fn warm_up(&self, poll: Duration) {
        if self.config.warmup_ms == 0 {
            return;
        }
        info!("Waiting {} ms for the camera to settle", self.config.warmup_ms);
        let deadline = Instant::now() + Duration::from_millis(self.config.warmup_ms);
        while Instant::now() < deadline && !self.shutdown.load(Ordering::Relaxed) {
            std::thread::sleep(poll);
        }
    }

    /// Run detection and speed measurement on one frame.
    pub fn process_frame(&mut self, frame: &Frame) -> MonitorResult<FrameReport> {
        let started = Instant::now();
        self.last_sequence = Some(frame.sequence);
        frame.check_layout()?;

        let output = self.detector.process(frame)?;
        self.metrics.inc(&self.metrics.frames_processed);

        let outcome = match output.strongest() {
            Some(detection) => {
                self.metrics.inc(&self.metrics.frames_with_detections);
                debug!(
                    "Frame {}: {} detections, strongest at ({}, {}) area {:.0}",
                    frame.sequence,
                    output.detections.len(),
                    detection.center.x,
                    detection.center.y,
                    detection.area
                );
                let outcome = self.engine.update(detection.center, frame.timestamp);
                self.record(&outcome, frame.timestamp);
                Some(outcome)
            }
            None => None,
        };

        self.metrics.set_timing(
            &self.metrics.processing_time_us,
            started.elapsed().as_micros() as u64,
        );

        Ok(FrameReport {
            sequence: frame.sequence,
            detections: output.detections.len(),
            outcome,
        })
    }

    fn record(&mut self, outcome: &CrossingOutcome, timestamp: f64) {
        match outcome {
            CrossingOutcome::Started {
                vehicle_number,
                line,
            } => {
                self.metrics.inc(&self.metrics.vehicles_started);
                self.events.publish(MonitorEvent::VehicleEntered {
                    vehicle_number: *vehicle_number,
                    line: *line,
                    timestamp,
                });
            }
            CrossingOutcome::Completed(event) => {
                self.metrics.inc(&self.metrics.speed_events);
                if event.is_speeding {
                    self.metrics.inc(&self.metrics.speeding_events);
                }
                self.events.publish(MonitorEvent::SpeedMeasured(event.clone()));
            }
            CrossingOutcome::Discarded {
                vehicle_number,
                anomaly,
            } => {
                self.metrics.inc(&self.metrics.discarded_measurements);
                self.events.publish(MonitorEvent::MeasurementDiscarded {
                    vehicle_number: *vehicle_number,
                    anomaly: *anomaly,
                    timestamp,
                });
            }
            CrossingOutcome::NoCrossing
            | CrossingOutcome::Debounced(_)
            | CrossingOutcome::SameLineIgnored(_) => {}
        }
    }
}

fn panic_message(cause: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = cause.downcast_ref::<&str>() {
        message
    } else if let Some(message) = cause.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
