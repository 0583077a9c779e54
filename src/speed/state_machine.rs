// src/speed/state_machine.rs
//
// Two-line timing for one vehicle at a time.
//
//   IDLE ──crossing──▶ MEASURING ──other line──▶ IDLE (+ event or discard)
//
// A crossing is a detection centre within `trigger_threshold_px` of a
// trigger line. Accepted crossings closer together than the cooldown are
// ignored so one physical passage spanning several frames counts once.

use crate::geometry::CoordinateMapper;
use crate::types::{
    Direction, PixelPoint, SpeedConfig, SpeedEvent, TriggerLineId, WorldPoint,
};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

const MS_TO_KMH: f64 = 3.6;

/// Readings this close to the limit are not flagged.
const SPEEDING_TOLERANCE_KMH: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Measuring,
}

/// First crossing of the vehicle currently being timed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VehicleMeasurement {
    pub vehicle_number: u32,
    pub line: TriggerLineId,
    pub timestamp: f64,
    pub world: WorldPoint,
}

/// Why a finished measurement produced no event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MeasurementAnomaly {
    TooShort { elapsed_s: f64 },
    Implausible { speed_kmh: f64 },
    /// Projection produced NaN or infinity
    NonFinite,
}

impl fmt::Display for MeasurementAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort { elapsed_s } => write!(f, "passage too short ({:.3}s)", elapsed_s),
            Self::Implausible { speed_kmh } => write!(f, "unreasonable speed {:.1} km/h", speed_kmh),
            Self::NonFinite => write!(f, "non-finite distance or speed"),
        }
    }
}

/// What one `update` call did.
#[derive(Debug, Clone, PartialEq)]
pub enum CrossingOutcome {
    /// Centre is not near either trigger line
    NoCrossing,
    /// Crossing inside the cooldown window, ignored
    Debounced(TriggerLineId),
    Started {
        vehicle_number: u32,
        line: TriggerLineId,
    },
    /// Crossing of the line the measurement started on; no effect
    SameLineIgnored(TriggerLineId),
    Completed(SpeedEvent),
    Discarded {
        vehicle_number: u32,
        anomaly: MeasurementAnomaly,
    },
}

impl CrossingOutcome {
    pub fn into_event(self) -> Option<SpeedEvent> {
        match self {
            Self::Completed(event) => Some(event),
            _ => None,
        }
    }
}

pub struct SpeedEngine {
    config: SpeedConfig,
    mapper: Arc<CoordinateMapper>,
    state: EngineState,
    pending: Option<VehicleMeasurement>,
    vehicle_count: u32,
    last_crossing: Option<f64>,
}

impl SpeedEngine {
    pub fn new(config: &SpeedConfig, mapper: Arc<CoordinateMapper>) -> Self {
        Self {
            config: config.clone(),
            mapper,
            state: EngineState::Idle,
            pending: None,
            vehicle_count: 0,
            last_crossing: None,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Vehicles whose timing was started, including discarded ones.
    pub fn vehicle_count(&self) -> u32 {
        self.vehicle_count
    }

    pub fn pending(&self) -> Option<&VehicleMeasurement> {
        self.pending.as_ref()
    }

    /// Seconds the in-flight measurement has been waiting for its second
    /// line. There is no timeout; callers decide what a stall means.
    pub fn pending_age(&self, now: f64) -> Option<f64> {
        self.pending.map(|m| now - m.timestamp)
    }

    /// Drop any in-flight measurement. The vehicle counter is kept.
    pub fn reset(&mut self) {
        self.state = EngineState::Idle;
        self.pending = None;
    }

    /// Feed the strongest detection's centre for one frame.
    pub fn update(&mut self, center: PixelPoint, timestamp: f64) -> CrossingOutcome {
        let Some(line) = self
            .mapper
            .which_line_crossed(center, self.config.trigger_threshold_px)
        else {
            return CrossingOutcome::NoCrossing;
        };

        if let Some(last) = self.last_crossing {
            if timestamp - last < self.config.crossing_cooldown_s {
                debug!(
                    "{} crossing at {:.3}s within cooldown, ignored",
                    line.as_str(),
                    timestamp
                );
                return CrossingOutcome::Debounced(line);
            }
        }
        self.last_crossing = Some(timestamp);

        let world = self.mapper.pixel_to_world(center);

        match (self.state, self.pending) {
            (EngineState::Idle, _) | (EngineState::Measuring, None) => {
                self.start_measurement(line, timestamp, world)
            }
            (EngineState::Measuring, Some(first)) if first.line == line => {
                debug!(
                    "Vehicle #{} crossed {} again, still waiting for the other line",
                    first.vehicle_number,
                    line.as_str()
                );
                CrossingOutcome::SameLineIgnored(line)
            }
            (EngineState::Measuring, Some(first)) => {
                let outcome = self.finish_measurement(first, line, timestamp, world);
                self.reset();
                outcome
            }
        }
    }

    fn start_measurement(
        &mut self,
        line: TriggerLineId,
        timestamp: f64,
        world: WorldPoint,
    ) -> CrossingOutcome {
        self.vehicle_count += 1;
        self.state = EngineState::Measuring;
        self.pending = Some(VehicleMeasurement {
            vehicle_number: self.vehicle_count,
            line,
            timestamp,
            world,
        });

        info!("🏁 Vehicle #{} crossed {}", self.vehicle_count, line.as_str());
        CrossingOutcome::Started {
            vehicle_number: self.vehicle_count,
            line,
        }
    }

    fn finish_measurement(
        &self,
        first: VehicleMeasurement,
        line: TriggerLineId,
        timestamp: f64,
        world: WorldPoint,
    ) -> CrossingOutcome {
        let vehicle_number = first.vehicle_number;
        info!("🏁 Vehicle #{} crossed {}", vehicle_number, line.as_str());

        let elapsed_s = timestamp - first.timestamp;
        if elapsed_s <= self.config.min_duration_s {
            return self.discard(vehicle_number, MeasurementAnomaly::TooShort { elapsed_s });
        }

        let distance_m = CoordinateMapper::distance(first.world, world);
        let speed_ms = distance_m / elapsed_s;
        let speed_kmh = speed_ms * MS_TO_KMH;
        if !speed_kmh.is_finite() {
            return self.discard(vehicle_number, MeasurementAnomaly::NonFinite);
        }
        if speed_kmh > self.config.max_reasonable_kmh || speed_kmh < self.config.min_reasonable_kmh
        {
            return self.discard(vehicle_number, MeasurementAnomaly::Implausible { speed_kmh });
        }

        let direction = Direction::from_first_line(first.line);
        let is_speeding = speed_kmh > self.config.speed_limit_kmh + SPEEDING_TOLERANCE_KMH;

        info!("{}", "=".repeat(60));
        info!(
            "🚗 Vehicle #{}: {:.1} km/h {}",
            vehicle_number,
            speed_kmh,
            direction.arrow()
        );
        info!("   Route: {} → {}", first.line.as_str(), line.as_str());
        info!("   Time: {:.2}s", elapsed_s);
        info!("   Distance: {:.2}m", distance_m);
        if is_speeding {
            info!(
                "   ⚠️ SPEEDING! (limit: {} km/h)",
                self.config.speed_limit_kmh
            );
        }
        info!("{}", "=".repeat(60));

        CrossingOutcome::Completed(SpeedEvent {
            vehicle_number,
            speed_kmh,
            speed_ms,
            distance_m,
            elapsed_s,
            direction,
            first_line: first.line,
            second_line: line,
            timestamp,
            is_speeding,
        })
    }

    fn discard(&self, vehicle_number: u32, anomaly: MeasurementAnomaly) -> CrossingOutcome {
        info!("⚠️ Vehicle #{}: {} - ignored", vehicle_number, anomaly);
        CrossingOutcome::Discarded {
            vehicle_number,
            anomaly,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Homography;
    use crate::types::{GeometryConfig, LineConfig};

    // Start line along pixel row 100 (world y = 0), end line along row 700
    // (world y = 12). 50 px per meter.
    const ON_START: PixelPoint = PixelPoint::new(500.0, 100.0);
    const ON_END: PixelPoint = PixelPoint::new(500.0, 700.0);
    const NOWHERE: PixelPoint = PixelPoint::new(500.0, 400.0);

    fn mapper() -> Arc<CoordinateMapper> {
        let homography =
            Homography::new([[0.02, 0.0, 0.0], [0.0, 0.02, -2.0], [0.0, 0.0, 1.0]]).unwrap();
        let zone = vec![
            PixelPoint::new(0.0, 0.0),
            PixelPoint::new(1000.0, 0.0),
            PixelPoint::new(1000.0, 800.0),
            PixelPoint::new(0.0, 800.0),
        ];
        let geometry = GeometryConfig {
            start_line: LineConfig {
                point1: PixelPoint::new(0.0, 100.0),
                point2: PixelPoint::new(1000.0, 100.0),
                world_y: 0.0,
            },
            end_line: LineConfig {
                point1: PixelPoint::new(0.0, 700.0),
                point2: PixelPoint::new(1000.0, 700.0),
                world_y: 12.0,
            },
            predetection_zones: vec![zone.clone()],
            measurement_zone: zone,
        };
        Arc::new(CoordinateMapper::new(homography, &geometry).unwrap())
    }

    fn engine() -> SpeedEngine {
        SpeedEngine::new(&SpeedConfig::default(), mapper())
    }

    #[test]
    fn test_first_crossing_starts_measurement() {
        let mut engine = engine();
        assert_eq!(engine.state(), EngineState::Idle);

        let outcome = engine.update(ON_START, 0.0);
        assert_eq!(
            outcome,
            CrossingOutcome::Started {
                vehicle_number: 1,
                line: TriggerLineId::Start
            }
        );
        assert_eq!(engine.state(), EngineState::Measuring);
        assert_eq!(engine.vehicle_count(), 1);
        assert_eq!(engine.pending().map(|m| m.line), Some(TriggerLineId::Start));
    }

    #[test]
    fn test_forward_passage_at_limit() {
        let mut engine = engine();
        engine.update(ON_START, 0.0);

        let event = engine
            .update(ON_END, 1.44)
            .into_event()
            .expect("second line should complete the measurement");

        assert!((event.distance_m - 12.0).abs() < 1e-9);
        assert!((event.speed_kmh - 30.0).abs() < 0.5);
        assert!((event.speed_ms - 12.0 / 1.44).abs() < 1e-9);
        assert!((event.elapsed_s - 1.44).abs() < 1e-12);
        assert_eq!(event.direction, Direction::Forward);
        assert_eq!(event.first_line, TriggerLineId::Start);
        assert_eq!(event.second_line, TriggerLineId::End);
        assert_eq!(event.vehicle_number, 1);
        // Exactly at the limit is not speeding
        assert!(!event.is_speeding);
        assert_eq!(engine.state(), EngineState::Idle);
        assert!(engine.pending().is_none());
    }

    #[test]
    fn test_reverse_passage_flags_speeding() {
        let mut engine = engine();
        engine.update(ON_END, 10.0);

        // 12 m in 1.2 s = 36 km/h
        let event = engine.update(ON_START, 11.2).into_event().unwrap();
        assert_eq!(event.direction, Direction::Reverse);
        assert!((event.speed_kmh - 36.0).abs() < 1e-6);
        assert!(event.is_speeding);
    }

    #[test]
    fn test_no_crossing_away_from_lines() {
        let mut engine = engine();
        assert_eq!(engine.update(NOWHERE, 0.0), CrossingOutcome::NoCrossing);
        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(engine.vehicle_count(), 0);

        // Just inside / just outside the 40 px threshold
        let near = PixelPoint::new(500.0, 139.0);
        let far = PixelPoint::new(500.0, 140.0);
        assert_eq!(engine.update(far, 1.0), CrossingOutcome::NoCrossing);
        assert!(matches!(engine.update(near, 1.0), CrossingOutcome::Started { .. }));
    }

    #[test]
    fn test_cooldown_debounces_crossings() {
        let mut engine = engine();
        engine.update(ON_START, 0.0);

        // 299 ms later: swallowed by the cooldown
        assert_eq!(
            engine.update(ON_START, 0.299),
            CrossingOutcome::Debounced(TriggerLineId::Start)
        );
        // 301 ms after the accepted crossing: accepted, but same line
        assert_eq!(
            engine.update(ON_START, 0.301),
            CrossingOutcome::SameLineIgnored(TriggerLineId::Start)
        );
        assert_eq!(engine.vehicle_count(), 1);
        assert_eq!(engine.pending().map(|m| m.timestamp), Some(0.0));
    }

    #[test]
    fn test_cooldown_applies_to_the_other_line() {
        let mut engine = engine();
        engine.update(ON_START, 0.0);
        assert_eq!(
            engine.update(ON_END, 0.299),
            CrossingOutcome::Debounced(TriggerLineId::End)
        );
        assert_eq!(engine.state(), EngineState::Measuring);
    }

    #[test]
    fn test_cooldown_follows_a_finished_measurement() {
        let mut engine = engine();
        engine.update(ON_START, 0.0);
        assert!(engine.update(ON_END, 1.44).into_event().is_some());
        assert_eq!(
            engine.update(ON_END, 1.5),
            CrossingOutcome::Debounced(TriggerLineId::End)
        );
        assert!(matches!(
            engine.update(ON_END, 1.8),
            CrossingOutcome::Started {
                vehicle_number: 2,
                line: TriggerLineId::End
            }
        ));
    }

    #[test]
    fn test_implausible_speed_is_discarded() {
        let config = SpeedConfig {
            crossing_cooldown_s: 0.1,
            ..SpeedConfig::default()
        };
        let mut engine = SpeedEngine::new(&config, mapper());
        engine.update(ON_START, 0.0);

        // 12 m in 0.216 s = 200 km/h
        let outcome = engine.update(ON_END, 0.216);
        match outcome {
            CrossingOutcome::Discarded {
                vehicle_number,
                anomaly: MeasurementAnomaly::Implausible { speed_kmh },
            } => {
                assert_eq!(vehicle_number, 1);
                assert!((speed_kmh - 200.0).abs() < 0.01);
            }
            other => panic!("expected discard, got {:?}", other),
        }
        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(engine.vehicle_count(), 1);
        assert!(engine.pending().is_none());
    }

    #[test]
    fn test_too_slow_is_discarded() {
        let mut engine = engine();
        engine.update(ON_START, 0.0);
        // 12 m in 10 s = 4.32 km/h
        assert!(matches!(
            engine.update(ON_END, 10.0),
            CrossingOutcome::Discarded {
                anomaly: MeasurementAnomaly::Implausible { .. },
                ..
            }
        ));
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[test]
    fn test_too_short_passage_is_discarded() {
        let config = SpeedConfig {
            crossing_cooldown_s: 0.05,
            ..SpeedConfig::default()
        };
        let mut engine = SpeedEngine::new(&config, mapper());
        engine.update(ON_START, 0.0);

        let outcome = engine.update(ON_END, 0.08);
        assert!(matches!(
            outcome,
            CrossingOutcome::Discarded {
                anomaly: MeasurementAnomaly::TooShort { .. },
                ..
            }
        ));
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[test]
    fn test_measuring_stalls_without_second_line() {
        let mut engine = engine();
        engine.update(ON_START, 0.0);

        for i in 1..=600 {
            let t = i as f64 / 30.0;
            assert_eq!(engine.update(NOWHERE, t), CrossingOutcome::NoCrossing);
        }
        assert_eq!(engine.state(), EngineState::Measuring);
        let age = engine.pending_age(20.0).unwrap();
        assert!((age - 20.0).abs() < 1e-9);

        // A second vehicle is not tracked on its own
        assert_eq!(
            engine.update(ON_START, 25.0),
            CrossingOutcome::SameLineIgnored(TriggerLineId::Start)
        );
        assert_eq!(engine.vehicle_count(), 1);

        engine.reset();
        assert_eq!(engine.state(), EngineState::Idle);
        assert!(engine.pending_age(30.0).is_none());
        assert_eq!(engine.vehicle_count(), 1);
    }

    #[test]
    fn test_vehicle_numbers_increase() {
        let mut engine = engine();
        engine.update(ON_START, 0.0);
        engine.update(ON_END, 1.44);
        engine.update(ON_START, 5.0);
        let event = engine.update(ON_END, 6.44).into_event().unwrap();
        assert_eq!(event.vehicle_number, 2);
        assert_eq!(engine.vehicle_count(), 2);
    }
}
