// src/types.rs

use crate::error::{MonitorError, MonitorResult};
use serde::{Deserialize, Serialize};

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: CameraConfig,
    pub calibration: CalibrationConfig,
    pub geometry: GeometryConfig,
    pub detection: DetectionConfig,
    pub speed: SpeedConfig,
    pub monitor: MonitorConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Capture device index (ignored when `video_path` is set)
    pub device: i32,
    /// Replay a recorded video instead of a live device
    pub video_path: Option<String>,
    pub width: usize,
    pub height: usize,
    pub fps: u32,
    /// Ring buffer capacity in frames
    pub buffer_size: usize,
    /// Number of recent timestamps used for the frame-rate estimate
    pub fps_window: usize,
    /// Back-off after a failed capture
    pub retry_delay_ms: u64,
    /// How long `stop()` waits for the acquisition thread
    pub stop_timeout_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: 0,
            video_path: None,
            width: 2304,
            height: 1296,
            fps: 30,
            buffer_size: 450,
            fps_window: 30,
            retry_delay_ms: 100,
            stop_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Whitespace-separated 3x3 pixel -> ground-plane matrix
    pub homography_path: String,
    /// Known correspondences checked once at startup
    pub reference_points: Vec<ReferencePoint>,
    /// Maximum reprojection error for a reference point, meters
    pub tolerance_m: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            homography_path: "config/homography_matrix.txt".to_string(),
            reference_points: Vec::new(),
            tolerance_m: 0.25,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReferencePoint {
    pub pixel: PixelPoint,
    pub world: WorldPoint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryConfig {
    pub start_line: LineConfig,
    pub end_line: LineConfig,
    pub predetection_zones: Vec<Vec<PixelPoint>>,
    /// Spans both trigger lines; drawn for context, never used for gating
    pub measurement_zone: Vec<PixelPoint>,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            start_line: LineConfig {
                point1: PixelPoint::new(300.0, 750.0),
                point2: PixelPoint::new(600.0, 1280.0),
                world_y: 0.0,
            },
            end_line: LineConfig {
                point1: PixelPoint::new(900.0, 570.0),
                point2: PixelPoint::new(1600.0, 850.0),
                world_y: 12.0,
            },
            predetection_zones: vec![
                vec![
                    PixelPoint::new(1653.0, 582.0),
                    PixelPoint::new(1480.0, 532.0),
                    PixelPoint::new(1146.0, 666.0),
                    PixelPoint::new(1386.0, 759.0),
                ],
                vec![
                    PixelPoint::new(304.0, 965.0),
                    PixelPoint::new(456.0, 915.0),
                    PixelPoint::new(503.0, 1190.0),
                    PixelPoint::new(371.0, 1235.0),
                ],
            ],
            measurement_zone: vec![
                PixelPoint::new(300.0, 750.0),
                PixelPoint::new(900.0, 570.0),
                PixelPoint::new(1600.0, 850.0),
                PixelPoint::new(600.0, 1280.0),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LineConfig {
    pub point1: PixelPoint,
    pub point2: PixelPoint,
    /// Ground-plane y of the line, meters along the road
    #[serde(default)]
    pub world_y: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub max_corners: usize,
    pub quality_level: f32,
    pub min_distance: f32,
    pub block_size: usize,
    /// Full side of the Lucas-Kanade patch (odd)
    pub window_size: usize,
    /// Extra pyramid levels above full resolution
    pub pyramid_levels: usize,
    pub max_iterations: usize,
    pub epsilon: f32,
    /// Minimum displacement, px/frame, for a point to count as moving
    pub motion_threshold: f32,
    pub disc_radius: usize,
    pub close_kernel: usize,
    pub open_kernel: usize,
    pub min_area: f64,
    pub max_area: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            max_corners: 200,
            quality_level: 0.01,
            min_distance: 10.0,
            block_size: 7,
            window_size: 15,
            pyramid_levels: 2,
            max_iterations: 10,
            epsilon: 0.03,
            motion_threshold: 2.0,
            disc_radius: 15,
            close_kernel: 21,
            open_kernel: 9,
            min_area: 3000.0,
            max_area: 40000.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedConfig {
    /// Pixel distance from a trigger line that counts as crossing it
    pub trigger_threshold_px: f64,
    pub crossing_cooldown_s: f64,
    /// Shorter passages are rejected as bogus
    pub min_duration_s: f64,
    pub speed_limit_kmh: f64,
    pub max_reasonable_kmh: f64,
    pub min_reasonable_kmh: f64,
}

impl Default for SpeedConfig {
    fn default() -> Self {
        Self {
            trigger_threshold_px: 40.0,
            crossing_cooldown_s: 0.3,
            min_duration_s: 0.1,
            speed_limit_kmh: 30.0,
            max_reasonable_kmh: 45.0,
            min_reasonable_kmh: 5.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Sleep between polls while no new frame is buffered
    pub poll_interval_ms: u64,
    /// Camera settle time before processing starts
    pub warmup_ms: u64,
    pub event_queue: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10,
            warmup_ms: 2000,
            event_queue: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ============================================================================
// POINTS
// ============================================================================

/// Image-space position. Serialized as `[x, y]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct PixelPoint {
    pub x: f64,
    pub y: f64,
}

impl PixelPoint {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl From<[f64; 2]> for PixelPoint {
    fn from([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }
}

impl From<PixelPoint> for [f64; 2] {
    fn from(p: PixelPoint) -> Self {
        [p.x, p.y]
    }
}

/// Ground-plane position in meters. Serialized as `[x, y]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct WorldPoint {
    pub x: f64,
    pub y: f64,
}

impl WorldPoint {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<[f64; 2]> for WorldPoint {
    fn from([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }
}

impl From<WorldPoint> for [f64; 2] {
    fn from(p: WorldPoint) -> Self {
        [p.x, p.y]
    }
}

// ============================================================================
// FRAMES AND DETECTIONS
// ============================================================================

/// One captured image. RGB888, row-major, `width * height * 3` bytes.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
    /// Seconds on the frame source's monotonic clock
    pub timestamp: f64,
    pub sequence: u64,
}

impl Frame {
    /// Byte length the stated dimensions call for, `None` on overflow.
    pub fn expected_len(&self) -> Option<usize> {
        self.width.checked_mul(self.height)?.checked_mul(3)
    }

    /// Reject empty frames and buffers that disagree with the dimensions.
    pub fn check_layout(&self) -> MonitorResult<()> {
        let Some(expected) = self.expected_len() else {
            return Err(MonitorError::frame(format!(
                "frame {} claims {}x{}, too large to address",
                self.sequence, self.width, self.height
            )));
        };
        if expected == 0 || self.data.len() != expected {
            return Err(MonitorError::frame(format!(
                "frame {} is {}x{} but carries {} bytes (expected {})",
                self.sequence,
                self.width,
                self.height,
                self.data.len(),
                expected
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl BoundingBox {
    /// Integer center, as used for zone and trigger-line tests.
    pub fn center(&self) -> PixelPoint {
        PixelPoint::new(
            (self.x + self.width / 2) as f64,
            (self.y + self.height / 2) as f64,
        )
    }
}

/// A moving blob found in a single frame. Carries no identity.
#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub center: PixelPoint,
    pub world: WorldPoint,
    /// Contour area in square pixels
    pub area: f64,
    /// Mean displacement inside the blob, px/frame
    pub motion_magnitude: f32,
}

// ============================================================================
// SPEED MEASUREMENT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerLineId {
    Start,
    End,
}

impl TriggerLineId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::End => "END",
        }
    }

    pub fn other(&self) -> Self {
        match self {
            Self::Start => Self::End,
            Self::End => Self::Start,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Start line first, then end line
    Forward,
    /// End line first, then start line
    Reverse,
}

impl Direction {
    pub fn from_first_line(first: TriggerLineId) -> Self {
        match first {
            TriggerLineId::Start => Self::Forward,
            TriggerLineId::End => Self::Reverse,
        }
    }

    pub fn arrow(&self) -> &'static str {
        match self {
            Self::Forward => "→",
            Self::Reverse => "←",
        }
    }
}

/// A completed two-line measurement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeedEvent {
    pub vehicle_number: u32,
    pub speed_kmh: f64,
    pub speed_ms: f64,
    pub distance_m: f64,
    pub elapsed_s: f64,
    pub direction: Direction,
    pub first_line: TriggerLineId,
    pub second_line: TriggerLineId,
    /// Timestamp of the finishing crossing
    pub timestamp: f64,
    pub is_speeding: bool,
}
