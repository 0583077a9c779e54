// src/geometry/zones.rs

use crate::types::{LineConfig, PixelPoint, TriggerLineId};

/// Tolerance for treating a point as lying on a polygon edge, pixels.
const EDGE_EPSILON: f64 = 1e-9;

/// A calibrated image-space timing line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerLine {
    pub id: TriggerLineId,
    pub point1: PixelPoint,
    pub point2: PixelPoint,
    /// Road-plane y the line was calibrated against
    pub world_y: f64,
}

impl TriggerLine {
    pub fn from_config(id: TriggerLineId, config: &LineConfig) -> Self {
        Self {
            id,
            point1: config.point1,
            point2: config.point2,
            world_y: config.world_y,
        }
    }

    pub fn distance_to(&self, point: PixelPoint) -> f64 {
        point_line_distance(point, self.point1, self.point2)
    }
}

/// Perpendicular distance from `point` to the infinite line through `p1`
/// and `p2`. Not clamped to the segment.
pub fn point_line_distance(point: PixelPoint, p1: PixelPoint, p2: PixelPoint) -> f64 {
    let a = p2.y - p1.y;
    let b = p1.x - p2.x;
    let c = p2.x * p1.y - p1.x * p2.y;
    let norm = a.hypot(b);
    if norm == 0.0 {
        return (point.x - p1.x).hypot(point.y - p1.y);
    }
    (a * point.x + b * point.y + c).abs() / norm
}

/// Closed polygon in pixel space. The last vertex connects to the first.
#[derive(Debug, Clone, PartialEq)]
pub struct Zone {
    vertices: Vec<PixelPoint>,
}

impl Zone {
    pub fn new(vertices: Vec<PixelPoint>) -> Self {
        Self { vertices }
    }

    pub fn vertices(&self) -> &[PixelPoint] {
        &self.vertices
    }

    /// Even-odd containment; points on an edge or vertex count as inside.
    pub fn contains(&self, point: PixelPoint) -> bool {
        let n = self.vertices.len();
        if n < 3 {
            return false;
        }

        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let a = self.vertices[j];
            let b = self.vertices[i];

            if on_segment(point, a, b) {
                return true;
            }

            if (b.y > point.y) != (a.y > point.y) {
                let x_cross = b.x + (point.y - b.y) * (a.x - b.x) / (a.y - b.y);
                if point.x < x_cross {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }
}

fn on_segment(p: PixelPoint, a: PixelPoint, b: PixelPoint) -> bool {
    let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
    if cross.abs() > EDGE_EPSILON * (1.0 + (b.x - a.x).abs() + (b.y - a.y).abs()) {
        return false;
    }
    p.x >= a.x.min(b.x) - EDGE_EPSILON
        && p.x <= a.x.max(b.x) + EDGE_EPSILON
        && p.y >= a.y.min(b.y) - EDGE_EPSILON
        && p.y <= a.y.max(b.y) + EDGE_EPSILON
}
