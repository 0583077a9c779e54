// src/config.rs

use crate::error::{MonitorError, MonitorResult};
use crate::types::{Config, LineConfig, PixelPoint};
use std::fs;
use std::path::Path;

impl Config {
    pub fn load(path: impl AsRef<Path>) -> MonitorResult<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the pipeline meaningless.
    pub fn validate(&self) -> MonitorResult<()> {
        let cam = &self.camera;
        if cam.buffer_size == 0 {
            return Err(MonitorError::config("camera.buffer_size must be positive"));
        }
        if cam.fps == 0 {
            return Err(MonitorError::config("camera.fps must be positive"));
        }
        if cam.width == 0 || cam.height == 0 {
            return Err(MonitorError::config("camera resolution must be non-zero"));
        }

        let geo = &self.geometry;
        check_line("start_line", &geo.start_line)?;
        check_line("end_line", &geo.end_line)?;
        if geo.predetection_zones.is_empty() {
            return Err(MonitorError::calibration(
                "at least one pre-detection zone is required",
            ));
        }
        for (i, zone) in geo.predetection_zones.iter().enumerate() {
            check_polygon(&format!("predetection_zones[{}]", i), zone)?;
        }
        check_polygon("measurement_zone", &geo.measurement_zone)?;

        let det = &self.detection;
        if det.min_area > det.max_area {
            return Err(MonitorError::config(format!(
                "detection.min_area ({}) exceeds max_area ({})",
                det.min_area, det.max_area
            )));
        }
        if det.motion_threshold <= 0.0 {
            return Err(MonitorError::config(
                "detection.motion_threshold must be positive",
            ));
        }
        if det.window_size < 3 || det.block_size < 3 {
            return Err(MonitorError::config(
                "detection.window_size and block_size must be at least 3",
            ));
        }

        let speed = &self.speed;
        if speed.trigger_threshold_px <= 0.0 {
            return Err(MonitorError::config(
                "speed.trigger_threshold_px must be positive",
            ));
        }
        if speed.crossing_cooldown_s <= 0.0 {
            return Err(MonitorError::config(
                "speed.crossing_cooldown_s must be positive",
            ));
        }
        if speed.min_reasonable_kmh >= speed.max_reasonable_kmh {
            return Err(MonitorError::config(format!(
                "speed plausibility bounds inverted: min {} >= max {}",
                speed.min_reasonable_kmh, speed.max_reasonable_kmh
            )));
        }

        Ok(())
    }
}

fn check_line(name: &str, line: &LineConfig) -> MonitorResult<()> {
    let dx = line.point2.x - line.point1.x;
    let dy = line.point2.y - line.point1.y;
    if !(dx.is_finite() && dy.is_finite()) || dx.hypot(dy) < f64::EPSILON {
        return Err(MonitorError::calibration(format!(
            "{} endpoints must be distinct finite points",
            name
        )));
    }
    Ok(())
}

fn check_polygon(name: &str, vertices: &[PixelPoint]) -> MonitorResult<()> {
    if vertices.len() < 3 {
        return Err(MonitorError::calibration(format!(
            "{} needs at least 3 vertices, got {}",
            name,
            vertices.len()
        )));
    }
    if vertices.iter().any(|p| !(p.x.is_finite() && p.y.is_finite())) {
        return Err(MonitorError::calibration(format!(
            "{} contains a non-finite vertex",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_partial_file_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "speed:\n  speed_limit_kmh: 50\ncamera:\n  fps: 25").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.speed.speed_limit_kmh, 50.0);
        assert_eq!(config.speed.crossing_cooldown_s, 0.3);
        assert_eq!(config.camera.fps, 25);
        assert_eq!(config.camera.buffer_size, 450);
        assert_eq!(config.geometry.predetection_zones.len(), 2);
    }

    #[test]
    fn test_degenerate_line_is_calibration_error() {
        let mut config = Config::default();
        config.geometry.end_line.point2 = config.geometry.end_line.point1;
        assert!(matches!(
            config.validate(),
            Err(MonitorError::Calibration(_))
        ));
    }

    #[test]
    fn test_short_polygon_rejected() {
        let mut config = Config::default();
        config.geometry.predetection_zones[1].truncate(2);
        assert!(matches!(
            config.validate(),
            Err(MonitorError::Calibration(_))
        ));
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let mut config = Config::default();
        config.speed.min_reasonable_kmh = 60.0;
        assert!(matches!(config.validate(), Err(MonitorError::Config(_))));

        let mut config = Config::default();
        config.detection.min_area = 50_000.0;
        assert!(matches!(config.validate(), Err(MonitorError::Config(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = Config::load("/nonexistent/road-speed-monitor.yaml");
        assert!(matches!(result, Err(MonitorError::Io(_))));
    }
}
