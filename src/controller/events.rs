//! Edge-triggered event processor (spec §4.7 "Event processor rules").
//!
//! Pure functions over [`LastKnown`] and a fresh [`SystemStatus`]/history
//! entry — no I/O, so the threshold-crossing rules are unit-testable
//! directly.

use crate::ble::commands::history::HistoryEventKind;
use crate::ble::model::{DeliveryMode, SystemStatus};

const BATTERY_LOW_PCT: u8 = 20;
const BATTERY_EMPTY_PCT: u8 = 5;
const RESERVOIR_LOW_CENTI: u32 = 2000; // 20 U
const RESERVOIR_EMPTY_CENTI: u32 = 500; // 5 U
const CARTRIDGE_CHANGE_JUMP_CENTI: u32 = 5000; // 50 U

#[derive(Debug, Clone, PartialEq)]
pub enum PumpEvent {
    BatteryLow,
    BatteryEmpty,
    ReservoirLow,
    ReservoirEmpty,
    CartridgeChanged,
    DeliveryModeChanged {
        from: DeliveryMode,
        to: DeliveryMode,
    },
    DeliveryStopped,
    TbrStarted,
    TbrCompleted,
    BolusStarted,
    BolusCompleted { units: f64 },
    BolusCancelled { units: f64 },
    History(HistoryEventKind),
    PollingDegraded { consecutive_failures: u32 },
}

/// Last-observed state the event processor diffs against. Cleared on every
/// fresh connect (spec §4.7: "process reset") so the first poll after a
/// reconnect never emits spurious transitions.
#[derive(Debug, Default, Clone)]
pub struct LastKnown {
    pub battery: Option<u8>,
    pub insulin_centi: Option<u32>,
    pub delivery_mode: Option<DeliveryMode>,
    pub events_count: Option<i32>,
    pub alerts_count: Option<i32>,
    pub consecutive_poll_failures: u32,
}

impl LastKnown {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Diffs a fresh [`SystemStatus`] against `prev`, updates `prev` in place,
/// and returns the events the transition produced.
pub fn process_status(prev: &mut LastKnown, status: SystemStatus) -> Vec<PumpEvent> {
    let mut events = Vec::new();

    if let Some(prev_battery) = prev.battery {
        if prev_battery >= BATTERY_LOW_PCT && status.battery < BATTERY_LOW_PCT {
            events.push(PumpEvent::BatteryLow);
        }
        if prev_battery >= BATTERY_EMPTY_PCT && status.battery < BATTERY_EMPTY_PCT {
            events.push(PumpEvent::BatteryEmpty);
        }
    }

    if let Some(prev_insulin) = prev.insulin_centi {
        if status.insulin_centi > prev_insulin.saturating_add(CARTRIDGE_CHANGE_JUMP_CENTI) {
            events.push(PumpEvent::CartridgeChanged);
        } else {
            if prev_insulin >= RESERVOIR_LOW_CENTI && status.insulin_centi < RESERVOIR_LOW_CENTI {
                events.push(PumpEvent::ReservoirLow);
            }
            if prev_insulin >= RESERVOIR_EMPTY_CENTI && status.insulin_centi < RESERVOIR_EMPTY_CENTI {
                events.push(PumpEvent::ReservoirEmpty);
            }
        }
    }

    if let Some(prev_mode) = prev.delivery_mode {
        if prev_mode != status.delivery_mode {
            events.push(PumpEvent::DeliveryModeChanged {
                from: prev_mode,
                to: status.delivery_mode,
            });
            if status.delivery_mode == DeliveryMode::Stopped {
                events.push(PumpEvent::DeliveryStopped);
            }
            if prev_mode != DeliveryMode::Tbr && status.delivery_mode == DeliveryMode::Tbr {
                events.push(PumpEvent::TbrStarted);
            }
            if prev_mode == DeliveryMode::Tbr && status.delivery_mode == DeliveryMode::Basal {
                events.push(PumpEvent::TbrCompleted);
            }
        }
    }

    prev.battery = Some(status.battery);
    prev.insulin_centi = Some(status.insulin_centi);
    prev.delivery_mode = Some(status.delivery_mode);
    events
}

/// Translates a history-stream entry kind into a surfaced event. Bolus and
/// TBR codes fold onto the same variants the command-level correlation path
/// uses, so callers see one event shape regardless of source.
pub fn event_from_history(kind: HistoryEventKind) -> PumpEvent {
    use HistoryEventKind::*;
    match kind {
        FastBolusRunning { .. } => PumpEvent::BolusStarted,
        FastBolusCompleted { units } => PumpEvent::BolusCompleted { units },
        FastBolusCancelled { units } => PumpEvent::BolusCancelled { units },
        TbrRunning { .. } => PumpEvent::TbrStarted,
        TbrCompleted { .. } => PumpEvent::TbrCompleted,
        TbrCancelled { .. } => PumpEvent::TbrCompleted,
        BatteryAlert => PumpEvent::BatteryLow,
        ReservoirAlert => PumpEvent::ReservoirLow,
        OcclusionAlert | AutoStopAlert => PumpEvent::History(kind),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(mode: DeliveryMode, insulin_centi: u32, battery: u8) -> SystemStatus {
        SystemStatus {
            delivery_mode: mode,
            insulin_centi,
            battery,
        }
    }

    #[test]
    fn first_observation_emits_nothing() {
        let mut last = LastKnown::default();
        let events = process_status(&mut last, status(DeliveryMode::Basal, 200, 80));
        assert!(events.is_empty());
        assert_eq!(last.battery, Some(80));
    }

    #[test]
    fn battery_crossing_below_20_emits_once() {
        let mut last = LastKnown::default();
        process_status(&mut last, status(DeliveryMode::Basal, 200, 25));
        let events = process_status(&mut last, status(DeliveryMode::Basal, 200, 19));
        assert_eq!(events, vec![PumpEvent::BatteryLow]);

        // Staying below the threshold doesn't re-emit.
        let events = process_status(&mut last, status(DeliveryMode::Basal, 200, 18));
        assert!(events.is_empty());
    }

    #[test]
    fn battery_crossing_below_5_emits_empty() {
        let mut last = LastKnown::default();
        process_status(&mut last, status(DeliveryMode::Basal, 200, 10));
        let events = process_status(&mut last, status(DeliveryMode::Basal, 200, 4));
        assert_eq!(events, vec![PumpEvent::BatteryEmpty]);
    }

    #[test]
    fn reservoir_jump_is_cartridge_changed_not_a_low_crossing() {
        let mut last = LastKnown::default();
        process_status(&mut last, status(DeliveryMode::Basal, 100, 80));
        let events = process_status(&mut last, status(DeliveryMode::Basal, 30_000, 80));
        assert_eq!(events, vec![PumpEvent::CartridgeChanged]);
    }

    #[test]
    fn delivery_mode_change_to_stopped() {
        let mut last = LastKnown::default();
        process_status(&mut last, status(DeliveryMode::Basal, 200, 80));
        let events = process_status(&mut last, status(DeliveryMode::Stopped, 200, 80));
        assert_eq!(
            events,
            vec![
                PumpEvent::DeliveryModeChanged {
                    from: DeliveryMode::Basal,
                    to: DeliveryMode::Stopped
                },
                PumpEvent::DeliveryStopped
            ]
        );
    }

    #[test]
    fn tbr_start_and_completion_transitions() {
        let mut last = LastKnown::default();
        process_status(&mut last, status(DeliveryMode::Basal, 200, 80));
        let started = process_status(&mut last, status(DeliveryMode::Tbr, 200, 80));
        assert!(started.contains(&PumpEvent::TbrStarted));

        let completed = process_status(&mut last, status(DeliveryMode::Basal, 200, 80));
        assert!(completed.contains(&PumpEvent::TbrCompleted));
    }

    #[test]
    fn history_event_mapping_for_fast_bolus() {
        assert_eq!(
            event_from_history(HistoryEventKind::FastBolusCompleted { units: 2.5 }),
            PumpEvent::BolusCompleted { units: 2.5 }
        );
    }
}
