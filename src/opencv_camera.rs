// src/opencv_camera.rs
//
// `Camera` over OpenCV VideoCapture: a live device by index, or a recorded
// video replayed in a loop.

use crate::error::{MonitorError, MonitorResult};
use crate::frame_source::{Camera, RawFrame};
use crate::types::CameraConfig;
use opencv::{
    core::Mat,
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTrait, VideoCaptureTraitConst},
};
use tracing::{info, warn};

pub struct OpenCvCamera {
    config: CameraConfig,
    cap: Option<VideoCapture>,
}

impl OpenCvCamera {
    pub fn new(config: &CameraConfig) -> Self {
        Self {
            config: config.clone(),
            cap: None,
        }
    }

    fn open_capture(&self) -> opencv::Result<VideoCapture> {
        let mut cap = match &self.config.video_path {
            Some(path) => {
                info!("Opening video: {}", path);
                VideoCapture::from_file(path, videoio::CAP_ANY)?
            }
            None => {
                info!("Opening camera device {}", self.config.device);
                let mut cap = VideoCapture::new(self.config.device, videoio::CAP_ANY)?;
                cap.set(videoio::CAP_PROP_FRAME_WIDTH, self.config.width as f64)?;
                cap.set(videoio::CAP_PROP_FRAME_HEIGHT, self.config.height as f64)?;
                cap.set(videoio::CAP_PROP_FPS, self.config.fps as f64)?;
                cap
            }
        };
        // Keep the driver queue short so captures are fresh.
        cap.set(videoio::CAP_PROP_BUFFERSIZE, 1.0)?;
        Ok(cap)
    }

    fn read_rgb(cap: &mut VideoCapture) -> opencv::Result<Option<RawFrame>> {
        let mut mat = Mat::default();
        if !VideoCaptureTrait::read(cap, &mut mat)? || mat.empty() {
            return Ok(None);
        }

        let mut rgb_mat = Mat::default();
        imgproc::cvt_color(&mat, &mut rgb_mat, imgproc::COLOR_BGR2RGB, 0)?;

        Ok(Some(RawFrame {
            data: rgb_mat.data_bytes()?.to_vec(),
            width: rgb_mat.cols() as usize,
            height: rgb_mat.rows() as usize,
        }))
    }
}

impl Camera for OpenCvCamera {
    fn open(&mut self) -> MonitorResult<()> {
        let cap = self
            .open_capture()
            .map_err(|e| MonitorError::hardware(format!("VideoCapture init failed: {}", e)))?;

        let opened = cap
            .is_opened()
            .map_err(|e| MonitorError::hardware(e.to_string()))?;
        if !opened {
            return Err(MonitorError::hardware(match &self.config.video_path {
                Some(path) => format!("cannot open video {}", path),
                None => format!("cannot open camera device {}", self.config.device),
            }));
        }

        let width = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_WIDTH).unwrap_or(0.0);
        let height =
            VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_HEIGHT).unwrap_or(0.0);
        let fps = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FPS).unwrap_or(0.0);
        info!(
            "✓ Capture ready: {}x{} @ {:.1} FPS",
            width as i32, height as i32, fps
        );
        if width as usize != self.config.width || height as usize != self.config.height {
            warn!(
                "Capture resolution differs from configured {}x{}",
                self.config.width, self.config.height
            );
        }

        self.cap = Some(cap);
        Ok(())
    }

    fn capture(&mut self) -> MonitorResult<RawFrame> {
        let replay = self.config.video_path.is_some();
        let cap = self
            .cap
            .as_mut()
            .ok_or_else(|| MonitorError::hardware("capture before open"))?;

        let to_hw = |e: opencv::Error| MonitorError::hardware(format!("capture failed: {}", e));

        if let Some(frame) = Self::read_rgb(cap).map_err(to_hw)? {
            return Ok(frame);
        }
        if !replay {
            return Err(MonitorError::hardware("camera returned no frame"));
        }

        info!("End of video, rewinding");
        cap.set(videoio::CAP_PROP_POS_FRAMES, 0.0).map_err(to_hw)?;
        Self::read_rgb(cap)
            .map_err(to_hw)?
            .ok_or_else(|| MonitorError::hardware("video has no frames"))
    }

    fn release(&mut self) {
        if let Some(mut cap) = self.cap.take() {
            if let Err(e) = cap.release() {
                warn!("Camera release failed: {}", e);
            }
            info!("✓ Camera released");
        }
    }
}
