// src/pipeline/event_bus.rs
//
// Bounded queue between the processing loop and whoever presents
// results. The loop publishes; presentation drains at its own pace.

use crate::speed::MeasurementAnomaly;
use crate::types::{SpeedEvent, TriggerLineId};
use std::collections::VecDeque;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    VehicleEntered {
        vehicle_number: u32,
        line: TriggerLineId,
        timestamp: f64,
    },

    SpeedMeasured(SpeedEvent),

    MeasurementDiscarded {
        vehicle_number: u32,
        anomaly: MeasurementAnomaly,
        timestamp: f64,
    },
}

pub struct EventBus {
    events: VecDeque<MonitorEvent>,
    max_pending: usize,
}

impl EventBus {
    pub fn new(max_pending: usize) -> Self {
        let max_pending = max_pending.max(1);
        Self {
            events: VecDeque::with_capacity(max_pending),
            max_pending,
        }
    }

    pub fn publish(&mut self, event: MonitorEvent) {
        if self.events.len() >= self.max_pending {
            warn!(
                "Event bus full ({} events), dropping oldest",
                self.max_pending
            );
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn drain(&mut self) -> Vec<MonitorEvent> {
        self.events.drain(..).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entered(n: u32) -> MonitorEvent {
        MonitorEvent::VehicleEntered {
            vehicle_number: n,
            line: TriggerLineId::Start,
            timestamp: n as f64,
        }
    }

    #[test]
    fn test_drain_returns_in_order_and_empties() {
        let mut bus = EventBus::new(8);
        bus.publish(entered(1));
        bus.publish(entered(2));
        assert_eq!(bus.pending_count(), 2);

        assert_eq!(bus.drain(), vec![entered(1), entered(2)]);
        assert_eq!(bus.pending_count(), 0);
    }

    #[test]
    fn test_full_bus_drops_oldest() {
        let mut bus = EventBus::new(2);
        for n in 1..=3 {
            bus.publish(entered(n));
        }
        assert_eq!(bus.drain(), vec![entered(2), entered(3)]);
    }
}
