// src/speed/mod.rs

mod state_machine;

pub use state_machine::{
    CrossingOutcome, EngineState, MeasurementAnomaly, SpeedEngine, VehicleMeasurement,
};
