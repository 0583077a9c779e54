// src/detection/motion_detector.rs
//
// Frame-to-frame motion blobs from sparse optical flow.
//
// Every call re-detects corners in the new frame and tracks them against the
// previous frame; no point identity survives more than one step. Moving
// points paint discs into a magnitude map which is thresholded, cleaned up
// morphologically and split into external contours. Only blobs centred in
// a pre-detection zone are reported.

use super::{MotionEstimator, MotionMask, MotionOutput};
use crate::error::{MonitorError, MonitorResult};
use crate::geometry::CoordinateMapper;
use crate::types::{BoundingBox, Detection, DetectionConfig, Frame};
use opencv::{
    core::{self, Mat, Point, Point2f, Scalar, Size, TermCriteria, Vector},
    imgproc,
    prelude::*,
    video,
};
use std::sync::Arc;
use tracing::{debug, trace};

/// Magnitude map scale, so px/frame reads like an 8-bit intensity.
const MAGNITUDE_SCALE: f32 = 10.0;

struct PreviousFrame {
    gray: Mat,
    width: usize,
    height: usize,
    corners: usize,
}

pub struct MotionDetector {
    config: DetectionConfig,
    close_kernel: Mat,
    open_kernel: Mat,
    criteria: TermCriteria,
    mapper: Arc<CoordinateMapper>,
    previous: Option<PreviousFrame>,
}

impl MotionDetector {
    pub fn new(config: &DetectionConfig, mapper: Arc<CoordinateMapper>) -> MonitorResult<Self> {
        let anchor = Point::new(-1, -1);
        let close = config.close_kernel as i32;
        let open = config.open_kernel as i32;

        Ok(Self {
            close_kernel: imgproc::get_structuring_element(
                imgproc::MORPH_ELLIPSE,
                Size::new(close, close),
                anchor,
            )?,
            open_kernel: imgproc::get_structuring_element(
                imgproc::MORPH_ELLIPSE,
                Size::new(open, open),
                anchor,
            )?,
            criteria: TermCriteria::new(
                core::TermCriteria_COUNT + core::TermCriteria_EPS,
                config.max_iterations as i32,
                config.epsilon as f64,
            )?,
            config: config.clone(),
            mapper,
            previous: None,
        })
    }

    /// True once a reference frame is stored and the next call can
    /// produce detections.
    pub fn is_warmed_up(&self) -> bool {
        self.previous.is_some()
    }

    /// Drop the reference frame; the next call is a warm-up again.
    pub fn reset(&mut self) {
        self.previous = None;
    }

    /// Corner count stored from the last processed frame.
    pub fn tracked_points(&self) -> usize {
        self.previous.as_ref().map_or(0, |p| p.corners)
    }

    pub fn process(&mut self, frame: &Frame) -> MonitorResult<MotionOutput> {
        frame.check_layout()?;
        let (Ok(rows), Ok(cols)) = (i32::try_from(frame.height), i32::try_from(frame.width))
        else {
            return Err(MonitorError::frame(format!(
                "frame {} is {}x{}, beyond what OpenCV can address",
                frame.sequence, frame.width, frame.height
            )));
        };
        let (width, height) = (frame.width, frame.height);

        let gray = rgb_to_gray(&frame.data, rows)?;
        let mut corners = Vector::<Point2f>::new();
        imgproc::good_features_to_track(
            &gray,
            &mut corners,
            self.config.max_corners as i32,
            self.config.quality_level as f64,
            self.config.min_distance as f64,
            &core::no_array(),
            self.config.block_size as i32,
            false,
            0.04,
        )?;

        let previous = match self.previous.take() {
            Some(prev) if prev.width == width && prev.height == height => prev,
            Some(_) => {
                debug!(
                    "Frame size changed to {}x{}, restarting motion warm-up",
                    width, height
                );
                self.store(gray, width, height, corners.len());
                return Ok(MotionOutput::empty(width, height));
            }
            None => {
                debug!(
                    "Motion warm-up frame {} ({} corners)",
                    frame.sequence,
                    corners.len()
                );
                self.store(gray, width, height, corners.len());
                return Ok(MotionOutput::empty(width, height));
            }
        };

        if corners.is_empty() {
            trace!("No corners in frame {}", frame.sequence);
            self.store(gray, width, height, 0);
            return Ok(MotionOutput::empty(width, height));
        }

        let mut tracked = Vector::<Point2f>::new();
        let mut status = Vector::<u8>::new();
        let mut errors = Vector::<f32>::new();
        let window = self.config.window_size as i32;
        video::calc_optical_flow_pyr_lk(
            &previous.gray,
            &gray,
            &corners,
            &mut tracked,
            &mut status,
            &mut errors,
            Size::new(window, window),
            self.config.pyramid_levels as i32,
            self.criteria,
            0,
            1e-4,
        )?;

        let mut magnitude =
            Mat::new_rows_cols_with_default(rows, cols, core::CV_32F, Scalar::all(0.0))?;
        let mut moving = 0usize;
        for ((start, end), found) in corners.iter().zip(tracked.iter()).zip(status.iter()) {
            if found == 0 {
                continue;
            }
            let m = (end.x - start.x).hypot(end.y - start.y);
            if m > self.config.motion_threshold {
                imgproc::circle(
                    &mut magnitude,
                    Point::new(end.x as i32, end.y as i32),
                    self.config.disc_radius as i32,
                    Scalar::all((m * MAGNITUDE_SCALE) as f64),
                    imgproc::FILLED,
                    imgproc::LINE_8,
                    0,
                )?;
                moving += 1;
            }
        }

        if moving == 0 {
            trace!(
                "Frame {}: {} corners, nothing moving",
                frame.sequence,
                corners.len()
            );
            self.store(gray, width, height, corners.len());
            return Ok(MotionOutput::empty(width, height));
        }

        let mask = self.clean_mask(&magnitude)?;
        let detections = self.extract_detections(&mask, &magnitude)?;

        trace!(
            "Frame {}: {} corners, {} moving, {} detections",
            frame.sequence,
            corners.len(),
            moving,
            detections.len()
        );

        let mask = MotionMask {
            data: mask.data_bytes()?.to_vec(),
            width,
            height,
        };
        self.store(gray, width, height, corners.len());
        Ok(MotionOutput { detections, mask })
    }

    fn store(&mut self, gray: Mat, width: usize, height: usize, corners: usize) {
        self.previous = Some(PreviousFrame {
            gray,
            width,
            height,
            corners,
        });
    }

    /// Threshold the magnitude map, then close gaps and drop specks.
    fn clean_mask(&self, magnitude: &Mat) -> MonitorResult<Mat> {
        let cutoff = (self.config.motion_threshold * MAGNITUDE_SCALE) as f64;
        let mut binary = Mat::default();
        imgproc::threshold(magnitude, &mut binary, cutoff, 255.0, imgproc::THRESH_BINARY)?;

        let mut raw = Mat::default();
        binary.convert_to(&mut raw, core::CV_8U, 1.0, 0.0)?;

        let anchor = Point::new(-1, -1);
        let border = imgproc::morphology_default_border_value()?;
        let mut closed = Mat::default();
        imgproc::morphology_ex(
            &raw,
            &mut closed,
            imgproc::MORPH_CLOSE,
            &self.close_kernel,
            anchor,
            1,
            core::BORDER_CONSTANT,
            border,
        )?;

        let mut opened = Mat::default();
        imgproc::morphology_ex(
            &closed,
            &mut opened,
            imgproc::MORPH_OPEN,
            &self.open_kernel,
            anchor,
            1,
            core::BORDER_CONSTANT,
            border,
        )?;
        Ok(opened)
    }

    fn extract_detections(&self, mask: &Mat, magnitude: &Mat) -> MonitorResult<Vec<Detection>> {
        let mut contours = Vector::<Vector<Point>>::new();
        imgproc::find_contours(
            mask,
            &mut contours,
            imgproc::RETR_EXTERNAL,
            imgproc::CHAIN_APPROX_SIMPLE,
            Point::new(0, 0),
        )?;

        let mut detections = Vec::new();
        for contour in contours.iter() {
            let area = imgproc::contour_area(&contour, false)?;
            if area < self.config.min_area || area > self.config.max_area {
                continue;
            }

            let rect = imgproc::bounding_rect(&contour)?;
            let bbox = BoundingBox {
                x: rect.x.max(0) as usize,
                y: rect.y.max(0) as usize,
                width: rect.width.max(0) as usize,
                height: rect.height.max(0) as usize,
            };
            let center = bbox.center();
            if !self.mapper.in_predetection_area(center) {
                trace!(
                    "Blob at ({}, {}) outside pre-detection zones",
                    center.x,
                    center.y
                );
                continue;
            }

            // Mean magnitude over the blob's own pixels
            let magnitude_roi = Mat::roi(magnitude, rect)?;
            let mask_roi = Mat::roi(mask, rect)?;
            let mean = core::mean(&magnitude_roi, &mask_roi)?;

            detections.push(Detection {
                bbox,
                center,
                world: self.mapper.pixel_to_world(center),
                area,
                motion_magnitude: mean[0] as f32 / MAGNITUDE_SCALE,
            });
        }
        Ok(detections)
    }
}

impl MotionEstimator for MotionDetector {
    fn process(&mut self, frame: &Frame) -> MonitorResult<MotionOutput> {
        MotionDetector::process(self, frame)
    }
}

/// Wrap the RGB buffer without copying and convert it to grayscale.
fn rgb_to_gray(rgb: &[u8], rows: i32) -> MonitorResult<Mat> {
    let flat = Mat::from_slice(rgb)?;
    let image = flat.reshape(3, rows)?;
    let mut gray = Mat::default();
    imgproc::cvt_color(&image, &mut gray, imgproc::COLOR_RGB2GRAY, 0)?;
    Ok(gray)
}
