// src/lib.rs

pub mod config;
pub mod detection;
pub mod error;
pub mod frame_buffer;
pub mod frame_source;
pub mod geometry;
#[cfg(feature = "opencv")]
pub mod opencv_camera;
pub mod pipeline;
pub mod speed;
pub mod types;

pub use error::{MonitorError, MonitorResult};
pub use types::Config;
