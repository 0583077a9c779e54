// src/geometry/mod.rs

pub mod homography;
pub mod mapper;
pub mod zones;

pub use homography::Homography;
pub use mapper::CoordinateMapper;
pub use zones::{point_line_distance, TriggerLine, Zone};
