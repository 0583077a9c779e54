// src/frame_source.rs
//
// Continuous frame acquisition.
//
// A background thread owns the camera, stamps every captured frame on a
// monotonic clock and pushes it into a bounded ring buffer. Readers get
// copies out through a cheap cloneable `FrameReader`. The ring buffer is
// the only state shared between the two threads and every access is a
// short critical section.
//
// Lifecycle:
//   start() -> camera.open() then spawn the loop (init failure surfaces)
//   stop()  -> clear the running flag, wait (bounded) for the loop to hand
//              the camera back, then release it. If the loop does not exit
//              in time the camera stays with the thread and is NOT released.

use crate::error::{MonitorError, MonitorResult};
use crate::frame_buffer::FrameRingBuffer;
use crate::types::{CameraConfig, Frame};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// An uncompressed RGB888 capture straight from the device.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
}

/// Hardware boundary. Implementations are moved onto the acquisition thread.
pub trait Camera: Send + 'static {
    /// Bring the device up at the configured resolution and rate.
    fn open(&mut self) -> MonitorResult<()>;

    /// Block until the next frame is available.
    fn capture(&mut self) -> MonitorResult<RawFrame>;

    /// Free the device. Only called once the acquisition loop has exited.
    fn release(&mut self);
}

// ============================================================================
// FRAME RATE
// ============================================================================

/// Rolling frame-rate estimate over the last `window` timestamps.
pub struct FpsEstimator {
    stamps: VecDeque<f64>,
    window: usize,
}

impl FpsEstimator {
    pub fn new(window: usize) -> Self {
        let window = window.max(2);
        Self {
            stamps: VecDeque::with_capacity(window),
            window,
        }
    }

    pub fn update(&mut self, timestamp: f64) -> f64 {
        self.stamps.push_back(timestamp);
        if self.stamps.len() > self.window {
            self.stamps.pop_front();
        }
        self.current()
    }

    pub fn current(&self) -> f64 {
        match (self.stamps.front(), self.stamps.back()) {
            (Some(first), Some(last)) if self.stamps.len() > 1 && last > first => {
                (self.stamps.len() - 1) as f64 / (last - first)
            }
            _ => 0.0,
        }
    }
}

// ============================================================================
// SHARED STATE
// ============================================================================

struct Shared {
    buffer: Mutex<FrameRingBuffer>,
    running: AtomicBool,
    fps_bits: AtomicU64,
    next_sequence: AtomicU64,
    epoch: Instant,
}

impl Shared {
    /// A panic while holding the lock must not stop acquisition.
    fn buffer(&self) -> MutexGuard<'_, FrameRingBuffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }
}

/// Read-only view of the buffered frames, safe to hand to another thread.
#[derive(Clone)]
pub struct FrameReader {
    shared: Arc<Shared>,
}

impl FrameReader {
    /// Most recently pushed frame, or `None` before the first capture.
    pub fn get_latest(&self) -> Option<Frame> {
        self.shared.buffer().latest()
    }

    pub fn latest_sequence(&self) -> Option<u64> {
        self.shared.buffer().latest_sequence()
    }

    /// Frames captured during the trailing `seconds`, oldest first.
    pub fn get_window(&self, seconds: f64) -> Vec<Frame> {
        let now = self.shared.now();
        self.shared.buffer().window(now, seconds)
    }

    /// Frames captured between `start` and `end` (source clock), oldest first.
    pub fn get_range(&self, start: f64, end: f64) -> Vec<Frame> {
        self.shared.buffer().range(start, end)
    }

    pub fn actual_fps(&self) -> f64 {
        f64::from_bits(self.shared.fps_bits.load(Ordering::Relaxed))
    }

    /// Current time on the clock frames are stamped with.
    pub fn now(&self) -> f64 {
        self.shared.now()
    }

    pub fn buffered(&self) -> usize {
        self.shared.buffer().len()
    }
}

// ============================================================================
// FRAME SOURCE
// ============================================================================

struct Acquisition {
    handle: JoinHandle<Box<dyn Camera>>,
    exited: mpsc::Receiver<()>,
}

pub struct FrameSource {
    shared: Arc<Shared>,
    camera: Option<Box<dyn Camera>>,
    acquisition: Option<Acquisition>,
    fps_window: usize,
    retry_delay: Duration,
    stop_timeout: Duration,
}

impl FrameSource {
    pub fn new(camera: Box<dyn Camera>, config: &CameraConfig) -> Self {
        let shared = Arc::new(Shared {
            buffer: Mutex::new(FrameRingBuffer::with_capacity(config.buffer_size)),
            running: AtomicBool::new(false),
            fps_bits: AtomicU64::new(0f64.to_bits()),
            next_sequence: AtomicU64::new(0),
            epoch: Instant::now(),
        });

        Self {
            shared,
            camera: Some(camera),
            acquisition: None,
            fps_window: config.fps_window,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            stop_timeout: Duration::from_millis(config.stop_timeout_ms),
        }
    }

    /// Open the camera and spawn the acquisition loop.
    pub fn start(&mut self) -> MonitorResult<()> {
        if self.acquisition.is_some() {
            debug!("Frame source already running");
            return Ok(());
        }

        let mut camera = self
            .camera
            .take()
            .ok_or_else(|| MonitorError::hardware("camera still held by a stalled capture loop"))?;

        if let Err(e) = camera.open() {
            error!("Camera initialization failed: {}", e);
            self.camera = Some(camera);
            return Err(e);
        }

        self.shared.running.store(true, Ordering::Release);

        let (exited_tx, exited_rx) = mpsc::channel();
        let shared = Arc::clone(&self.shared);
        let fps_window = self.fps_window;
        let retry_delay = self.retry_delay;

        let spawned = thread::Builder::new()
            .name("frame-acquisition".to_string())
            .spawn(move || {
                let camera = acquisition_loop(camera, &shared, fps_window, retry_delay);
                // Receiver may already be gone if stop() timed out.
                let _ = exited_tx.send(());
                camera
            });

        match spawned {
            Ok(handle) => {
                self.acquisition = Some(Acquisition {
                    handle,
                    exited: exited_rx,
                });
                info!("✓ Camera streaming started");
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                Err(MonitorError::hardware(format!(
                    "failed to spawn acquisition thread: {}",
                    e
                )))
            }
        }
    }

    /// Stop the loop and release the camera once the loop has exited.
    pub fn stop(&mut self) -> MonitorResult<()> {
        self.shared.running.store(false, Ordering::Release);

        let Some(acquisition) = self.acquisition.take() else {
            return Ok(());
        };

        match acquisition.exited.recv_timeout(self.stop_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
            Err(RecvTimeoutError::Timeout) => {
                error!(
                    "Acquisition thread did not exit within {:?}; camera left unreleased",
                    self.stop_timeout
                );
                return Err(MonitorError::hardware(
                    "acquisition thread did not stop in time",
                ));
            }
        }

        match acquisition.handle.join() {
            Ok(mut camera) => {
                camera.release();
                self.camera = Some(camera);
                info!("✓ Camera streaming stopped");
                Ok(())
            }
            Err(_) => Err(MonitorError::hardware(
                "acquisition thread panicked; camera lost",
            )),
        }
    }

    pub fn is_running(&self) -> bool {
        self.acquisition.is_some() && self.shared.running.load(Ordering::Acquire)
    }

    pub fn reader(&self) -> FrameReader {
        FrameReader {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn get_latest(&self) -> Option<Frame> {
        self.reader().get_latest()
    }

    pub fn get_window(&self, seconds: f64) -> Vec<Frame> {
        self.reader().get_window(seconds)
    }

    pub fn get_range(&self, start: f64, end: f64) -> Vec<Frame> {
        self.reader().get_range(start, end)
    }

    pub fn actual_fps(&self) -> f64 {
        self.reader().actual_fps()
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        if self.acquisition.is_some() {
            if let Err(e) = self.stop() {
                warn!("Frame source dropped while running: {}", e);
            }
        }
    }
}

fn acquisition_loop(
    mut camera: Box<dyn Camera>,
    shared: &Shared,
    fps_window: usize,
    retry_delay: Duration,
) -> Box<dyn Camera> {
    let mut fps = FpsEstimator::new(fps_window);
    let mut failures: u64 = 0;

    while shared.running.load(Ordering::Acquire) {
        match camera.capture() {
            Ok(raw) => {
                let timestamp = shared.now();
                let rate = fps.update(timestamp);
                shared.fps_bits.store(rate.to_bits(), Ordering::Relaxed);

                let frame = Frame {
                    data: raw.data,
                    width: raw.width,
                    height: raw.height,
                    timestamp,
                    sequence: shared.next_sequence.fetch_add(1, Ordering::Relaxed),
                };
                shared.buffer().push(frame);

                if failures > 0 {
                    info!("Camera capture recovered after {} failures", failures);
                    failures = 0;
                }
            }
            Err(e) => {
                failures += 1;
                warn!("Camera capture error (#{}): {}", failures, e);
                thread::sleep(retry_delay);
            }
        }
    }

    debug!("Acquisition loop exiting");
    camera
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counters {
        opened: AtomicUsize,
        captures: AtomicUsize,
        released: AtomicUsize,
    }

    /// Returns a 2x2 frame every 2ms; fails every third capture.
    struct FlakyCamera {
        counters: Arc<Counters>,
        fail_open: bool,
    }

    impl Camera for FlakyCamera {
        fn open(&mut self) -> MonitorResult<()> {
            if self.fail_open {
                return Err(MonitorError::hardware("no device"));
            }
            self.counters.opened.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn capture(&mut self) -> MonitorResult<RawFrame> {
            thread::sleep(Duration::from_millis(2));
            let n = self.counters.captures.fetch_add(1, Ordering::SeqCst);
            // A release before the loop exits would be a use-after-release.
            assert!(
                self.counters.released.load(Ordering::SeqCst)
                    < self.counters.opened.load(Ordering::SeqCst)
            );
            if n % 3 == 2 {
                return Err(MonitorError::hardware("transient"));
            }
            Ok(RawFrame {
                data: vec![n as u8; 12],
                width: 2,
                height: 2,
            })
        }

        fn release(&mut self) {
            self.counters.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn config() -> CameraConfig {
        CameraConfig {
            buffer_size: 8,
            fps_window: 5,
            retry_delay_ms: 1,
            stop_timeout_ms: 1000,
            ..CameraConfig::default()
        }
    }

    fn wait_for_frames(reader: &FrameReader, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while reader.buffered() < count && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_fps_estimator_rolling_window() {
        let mut est = FpsEstimator::new(4);
        assert_eq!(est.update(0.0), 0.0);
        for i in 1..10 {
            est.update(i as f64 * 0.1);
        }
        assert!((est.current() - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_open_failure_surfaces() {
        let counters = Arc::new(Counters::default());
        let camera = FlakyCamera {
            counters: Arc::clone(&counters),
            fail_open: true,
        };
        let mut source = FrameSource::new(Box::new(camera), &config());

        assert!(matches!(source.start(), Err(MonitorError::Hardware(_))));
        assert!(!source.is_running());
        assert!(source.get_latest().is_none());
    }

    #[test]
    fn test_capture_survives_transient_failures() {
        let counters = Arc::new(Counters::default());
        let camera = FlakyCamera {
            counters: Arc::clone(&counters),
            fail_open: false,
        };
        let mut source = FrameSource::new(Box::new(camera), &config());
        source.start().unwrap();

        let reader = source.reader();
        wait_for_frames(&reader, 8);
        // Failures were hit along the way yet the loop kept going.
        assert!(counters.captures.load(Ordering::SeqCst) >= 9);
        assert_eq!(reader.buffered(), 8);

        let window = reader.get_window(60.0);
        assert_eq!(window.len(), 8);
        assert!(window.windows(2).all(|w| w[0].sequence < w[1].sequence));
        assert_eq!(
            reader.get_latest().map(|f| f.sequence),
            window.last().map(|f| f.sequence)
        );

        source.stop().unwrap();
        assert_eq!(counters.released.load(Ordering::SeqCst), 1);
        assert!(!source.is_running());
    }

    #[test]
    fn test_restart_after_stop() {
        let counters = Arc::new(Counters::default());
        let camera = FlakyCamera {
            counters: Arc::clone(&counters),
            fail_open: false,
        };
        let mut source = FrameSource::new(Box::new(camera), &config());

        source.start().unwrap();
        source.stop().unwrap();
        source.start().unwrap();
        source.stop().unwrap();

        assert_eq!(counters.opened.load(Ordering::SeqCst), 2);
        assert_eq!(counters.released.load(Ordering::SeqCst), 2);
    }
}
