// src/geometry/homography.rs
//
// Planar projective transform from image pixels to road-plane meters.
// The matrix is produced offline by the calibration tooling and stored
// as three whitespace-separated rows of text.

use crate::error::{MonitorError, MonitorResult};
use std::fs;
use std::path::Path;

/// Determinants below this are treated as a collapsed (unusable) mapping.
const MIN_DETERMINANT: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography {
    m: [[f64; 3]; 3],
}

impl Homography {
    pub fn new(m: [[f64; 3]; 3]) -> MonitorResult<Self> {
        if m.iter().flatten().any(|v| !v.is_finite()) {
            return Err(MonitorError::calibration(
                "homography contains non-finite values",
            ));
        }
        let h = Self { m };
        if h.determinant().abs() < MIN_DETERMINANT {
            return Err(MonitorError::calibration("homography is singular"));
        }
        Ok(h)
    }

    pub fn identity() -> Self {
        Self {
            m: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        }
    }

    /// Parse three rows of three numbers. Blank lines and `#` comments are
    /// skipped.
    pub fn parse(text: &str) -> MonitorResult<Self> {
        let mut rows: Vec<[f64; 3]> = Vec::with_capacity(3);

        for (line_no, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            let values = line
                .split_whitespace()
                .map(str::parse::<f64>)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| {
                    MonitorError::calibration(format!(
                        "homography line {}: {}",
                        line_no + 1,
                        e
                    ))
                })?;

            let row: [f64; 3] = values.as_slice().try_into().map_err(|_| {
                MonitorError::calibration(format!(
                    "homography line {}: expected 3 values, got {}",
                    line_no + 1,
                    values.len()
                ))
            })?;
            rows.push(row);
        }

        let m: [[f64; 3]; 3] = rows.as_slice().try_into().map_err(|_| {
            MonitorError::calibration(format!("homography needs 3 rows, got {}", rows.len()))
        })?;
        Self::new(m)
    }

    pub fn load(path: impl AsRef<Path>) -> MonitorResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            MonitorError::calibration(format!(
                "cannot read homography {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::parse(&text)
    }

    /// Apply the transform to a pixel. Points on the horizon line
    /// (w == 0) map to non-finite coordinates.
    pub fn project(&self, x: f64, y: f64) -> (f64, f64) {
        let m = &self.m;
        let w = m[2][0] * x + m[2][1] * y + m[2][2];
        let u = m[0][0] * x + m[0][1] * y + m[0][2];
        let v = m[1][0] * x + m[1][1] * y + m[1][2];
        (u / w, v / w)
    }

    pub fn matrix(&self) -> &[[f64; 3]; 3] {
        &self.m
    }

    fn determinant(&self) -> f64 {
        let m = &self.m;
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    }
}
