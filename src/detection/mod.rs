// src/detection/mod.rs

#[cfg(feature = "opencv")]
mod motion_detector;

#[cfg(feature = "opencv")]
pub use motion_detector::MotionDetector;

use crate::error::MonitorResult;
use crate::types::{Detection, Frame};

/// Turns consecutive frames into moving blobs. The processing loop owns
/// one and calls it from a single thread.
pub trait MotionEstimator: Send {
    fn process(&mut self, frame: &Frame) -> MonitorResult<MotionOutput>;
}

/// Binary motion mask, 0 or 255 per pixel, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotionMask {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
}

impl MotionMask {
    pub fn zeros(width: usize, height: usize) -> Self {
        Self {
            data: vec![0; width * height],
            width,
            height,
        }
    }

    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    pub fn count_nonzero(&self) -> usize {
        self.data.iter().filter(|&&v| v > 0).count()
    }
}

/// Detections for one frame plus the mask they came from.
#[derive(Debug, Clone)]
pub struct MotionOutput {
    pub detections: Vec<Detection>,
    pub mask: MotionMask,
}

impl MotionOutput {
    pub fn empty(width: usize, height: usize) -> Self {
        Self {
            detections: Vec::new(),
            mask: MotionMask::zeros(width, height),
        }
    }

    /// Largest blob, the one fed to the speed engine.
    pub fn strongest(&self) -> Option<&Detection> {
        self.detections
            .iter()
            .max_by(|a, b| a.area.total_cmp(&b.area))
    }
}
