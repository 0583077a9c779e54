// src/geometry/mapper.rs
//
// Pixel <-> road-plane mapping plus the calibrated scene geometry:
// two trigger lines, the pre-detection zones a detection must start in,
// and the measurement zone (context only). Immutable once built, so one
// instance is shared by the detector and the speed engine.

use super::homography::Homography;
use super::zones::{point_line_distance, TriggerLine, Zone};
use crate::error::{MonitorError, MonitorResult};
use crate::types::{Config, GeometryConfig, PixelPoint, ReferencePoint, TriggerLineId, WorldPoint};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct CoordinateMapper {
    homography: Homography,
    start_line: TriggerLine,
    end_line: TriggerLine,
    predetection_zones: Vec<Zone>,
    measurement_zone: Zone,
}

impl CoordinateMapper {
    pub fn new(homography: Homography, geometry: &GeometryConfig) -> MonitorResult<Self> {
        if geometry.predetection_zones.is_empty() {
            return Err(MonitorError::calibration("no pre-detection zones configured"));
        }
        let zones_ok = geometry
            .predetection_zones
            .iter()
            .chain(std::iter::once(&geometry.measurement_zone))
            .all(|z| z.len() >= 3);
        if !zones_ok {
            return Err(MonitorError::calibration(
                "zone polygons need at least 3 vertices",
            ));
        }

        Ok(Self {
            homography,
            start_line: TriggerLine::from_config(TriggerLineId::Start, &geometry.start_line),
            end_line: TriggerLine::from_config(TriggerLineId::End, &geometry.end_line),
            predetection_zones: geometry
                .predetection_zones
                .iter()
                .map(|z| Zone::new(z.clone()))
                .collect(),
            measurement_zone: Zone::new(geometry.measurement_zone.clone()),
        })
    }

    /// Read the homography named in the config, build the mapper and check
    /// any configured reference points against it.
    pub fn load(config: &Config) -> MonitorResult<Self> {
        let homography = Homography::load(&config.calibration.homography_path)?;
        info!(
            "✓ Loaded homography matrix from {}",
            config.calibration.homography_path
        );

        let mapper = Self::new(homography, &config.geometry)?;

        if !config.calibration.reference_points.is_empty() {
            let worst = mapper.verify_reference_points(
                &config.calibration.reference_points,
                config.calibration.tolerance_m,
            )?;
            info!(
                "✓ {} calibration reference points within {:.3} m",
                config.calibration.reference_points.len(),
                worst
            );
        }

        info!(
            "✓ Trigger lines: START & END | Pre-detection: {} zones | Measurement: 1 zone",
            mapper.predetection_zones.len()
        );
        Ok(mapper)
    }

    pub fn pixel_to_world(&self, point: PixelPoint) -> WorldPoint {
        let (x, y) = self.homography.project(point.x, point.y);
        WorldPoint::new(x, y)
    }

    /// Euclidean distance in meters.
    pub fn distance(a: WorldPoint, b: WorldPoint) -> f64 {
        (b.x - a.x).hypot(b.y - a.y)
    }

    pub fn point_line_distance(point: PixelPoint, p1: PixelPoint, p2: PixelPoint) -> f64 {
        point_line_distance(point, p1, p2)
    }

    pub fn trigger_line(&self, id: TriggerLineId) -> &TriggerLine {
        match id {
            TriggerLineId::Start => &self.start_line,
            TriggerLineId::End => &self.end_line,
        }
    }

    pub fn is_near_line(&self, point: PixelPoint, line: TriggerLineId, threshold: f64) -> bool {
        self.trigger_line(line).distance_to(point) < threshold
    }

    /// The start line is checked first, so a point near both lines (close
    /// to where they would intersect) reports START.
    pub fn which_line_crossed(&self, point: PixelPoint, threshold: f64) -> Option<TriggerLineId> {
        [TriggerLineId::Start, TriggerLineId::End]
            .into_iter()
            .find(|&id| self.is_near_line(point, id, threshold))
    }

    pub fn point_in_zone(point: PixelPoint, zone: &Zone) -> bool {
        zone.contains(point)
    }

    pub fn in_predetection_area(&self, point: PixelPoint) -> bool {
        self.predetection_zones.iter().any(|z| z.contains(point))
    }

    pub fn in_measurement_zone(&self, point: PixelPoint) -> bool {
        self.measurement_zone.contains(point)
    }

    pub fn predetection_zones(&self) -> &[Zone] {
        &self.predetection_zones
    }

    pub fn measurement_zone(&self) -> &Zone {
        &self.measurement_zone
    }

    pub fn homography(&self) -> &Homography {
        &self.homography
    }

    /// Reproject known pixel/world pairs. Returns the worst error in meters,
    /// or a calibration error if any pair is off by more than `tolerance_m`.
    pub fn verify_reference_points(
        &self,
        points: &[ReferencePoint],
        tolerance_m: f64,
    ) -> MonitorResult<f64> {
        let mut worst = 0.0f64;
        for (i, rp) in points.iter().enumerate() {
            let mapped = self.pixel_to_world(rp.pixel);
            let err = Self::distance(mapped, rp.world);
            debug!(
                "Reference point {}: ({:.1}, {:.1})px -> ({:.3}, {:.3})m, err {:.3}m",
                i, rp.pixel.x, rp.pixel.y, mapped.x, mapped.y, err
            );
            if !err.is_finite() || err > tolerance_m {
                return Err(MonitorError::calibration(format!(
                    "reference point {} reprojects {:.3} m off (tolerance {:.3} m)",
                    i, err, tolerance_m
                )));
            }
            worst = worst.max(err);
        }
        Ok(worst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Maps the default start line to world y = 0 and the end line to y = 12
    /// along the road axis, with a mild perspective term.
    fn road_homography() -> Homography {
        Homography::new([[0.01, 0.0, -3.0], [0.0, -0.02, 15.0], [0.0, 0.0, 1.0]]).unwrap()
    }

    fn mapper() -> CoordinateMapper {
        CoordinateMapper::new(road_homography(), &GeometryConfig::default()).unwrap()
    }

    #[test]
    fn test_pixel_to_world_is_deterministic() {
        let m = mapper();
        let p = PixelPoint::new(812.5, 933.25);
        let a = m.pixel_to_world(p);
        let b = m.pixel_to_world(p);
        assert_eq!(a, b);
    }

    #[test]
    fn test_reference_points_reproduce() {
        let h = Homography::new([[0.02, 0.001, -4.0], [0.0005, 0.03, -9.0], [0.0, 0.0004, 1.0]])
            .unwrap();
        let m = CoordinateMapper::new(h, &GeometryConfig::default()).unwrap();

        // World coordinates computed by hand from the matrix above
        let refs = [
            ReferencePoint {
                pixel: PixelPoint::new(200.0, 300.0),
                world: WorldPoint::new(0.3 / 1.12, 0.1 / 1.12),
            },
            ReferencePoint {
                pixel: PixelPoint::new(1000.0, 500.0),
                world: WorldPoint::new(16.5 / 1.2, 6.5 / 1.2),
            },
        ];
        let worst = m.verify_reference_points(&refs, 1e-6).unwrap();
        assert!(worst < 1e-9);
    }

    #[test]
    fn test_reference_point_out_of_tolerance() {
        let m = mapper();
        let refs = [ReferencePoint {
            pixel: PixelPoint::new(300.0, 750.0),
            world: WorldPoint::new(5.0, 5.0),
        }];
        assert!(matches!(
            m.verify_reference_points(&refs, 0.25),
            Err(MonitorError::Calibration(_))
        ));
    }

    #[test]
    fn test_distance_meters() {
        let d = CoordinateMapper::distance(WorldPoint::new(0.0, 0.0), WorldPoint::new(3.0, 4.0));
        assert!((d - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_which_line_on_start_line() {
        let m = mapper();
        // Midpoint of (300,750)-(600,1280)
        let p = PixelPoint::new(450.0, 1015.0);
        assert_eq!(m.which_line_crossed(p, 40.0), Some(TriggerLineId::Start));
    }

    #[test]
    fn test_which_line_on_end_line() {
        let m = mapper();
        // Midpoint of (900,570)-(1600,850)
        let p = PixelPoint::new(1250.0, 710.0);
        assert_eq!(m.which_line_crossed(p, 40.0), Some(TriggerLineId::End));
    }

    #[test]
    fn test_which_line_none_beyond_threshold() {
        let m = mapper();
        let p = PixelPoint::new(800.0, 900.0);
        assert!(m.trigger_line(TriggerLineId::Start).distance_to(p) > 40.0);
        assert!(m.trigger_line(TriggerLineId::End).distance_to(p) > 40.0);
        assert_eq!(m.which_line_crossed(p, 40.0), None);
    }

    #[test]
    fn test_start_line_wins_near_intersection() {
        let geometry = GeometryConfig {
            start_line: crate::types::LineConfig {
                point1: PixelPoint::new(0.0, 0.0),
                point2: PixelPoint::new(100.0, 100.0),
                world_y: 0.0,
            },
            end_line: crate::types::LineConfig {
                point1: PixelPoint::new(0.0, 100.0),
                point2: PixelPoint::new(100.0, 0.0),
                world_y: 12.0,
            },
            ..GeometryConfig::default()
        };
        let m = CoordinateMapper::new(Homography::identity(), &geometry).unwrap();
        let p = PixelPoint::new(50.0, 52.0);
        assert!(m.is_near_line(p, TriggerLineId::End, 10.0));
        assert_eq!(m.which_line_crossed(p, 10.0), Some(TriggerLineId::Start));
    }

    #[test]
    fn test_is_near_line_strict_threshold() {
        let m = CoordinateMapper::new(Homography::identity(), &GeometryConfig::default()).unwrap();
        let line = *m.trigger_line(TriggerLineId::Start);
        // Shift the start-line midpoint 40px along the normal
        let (dx, dy) = (line.point2.x - line.point1.x, line.point2.y - line.point1.y);
        let len = dx.hypot(dy);
        let p = PixelPoint::new(450.0 + 40.0 * dy / len, 1015.0 - 40.0 * dx / len);
        assert!((line.distance_to(p) - 40.0).abs() < 1e-9);
        assert!(!m.is_near_line(p, TriggerLineId::Start, 40.0 - 1e-6));
        assert!(m.is_near_line(p, TriggerLineId::Start, 40.0 + 1e-6));
    }

    #[test]
    fn test_predetection_and_measurement_zones() {
        let m = mapper();
        // Inside the second default pre-detection polygon
        assert!(m.in_predetection_area(PixelPoint::new(420.0, 1050.0)));
        assert!(!m.in_predetection_area(PixelPoint::new(800.0, 900.0)));
        assert!(m.in_measurement_zone(PixelPoint::new(800.0, 900.0)));
        assert!(!m.in_measurement_zone(PixelPoint::new(100.0, 100.0)));
    }

    #[test]
    fn test_empty_zones_rejected() {
        let geometry = GeometryConfig {
            predetection_zones: Vec::new(),
            ..GeometryConfig::default()
        };
        assert!(CoordinateMapper::new(Homography::identity(), &geometry).is_err());
    }
}
