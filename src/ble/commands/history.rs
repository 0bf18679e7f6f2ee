//! History streams: Events, Alerts, System (spec §4.6 table, §4.7 event
//! processor rules). The System stream's UUIDs and layout are not fully
//! characterized in the source (spec §9); entries are read and left opaque.

use crate::ble::constants;
use crate::ble::model::HistoryEntry;
use crate::ble::protocol::PumpLink;
use crate::error::{PumpError, PumpResult};
use crate::glb;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryStream {
    Events,
    Alerts,
    System,
}

impl HistoryStream {
    fn count_uuid(self) -> String {
        match self {
            Self::Events => constants::events_count(),
            Self::Alerts => constants::alerts_count(),
            Self::System => constants::system_history_count(),
        }
    }

    fn index_uuid(self) -> String {
        match self {
            Self::Events => constants::events_index(),
            Self::Alerts => constants::alerts_index(),
            Self::System => constants::system_history_index(),
        }
    }

    fn value_uuid(self) -> String {
        match self {
            Self::Events => constants::events_value(),
            Self::Alerts => constants::alerts_value(),
            Self::System => constants::system_history_value(),
        }
    }
}

/// GLB-wrapped entry count for a stream.
pub async fn read_count(link: &PumpLink, stream: HistoryStream) -> PumpResult<i32> {
    let response = link
        .read_response(&stream.count_uuid(), false)
        .await?
        .ok_or_else(|| PumpError::Transport("history count read returned nothing".into()))?;
    glb::find_in(&response).ok_or(PumpError::GlbCorrupt)
}

async fn select_index(link: &PumpLink, stream: HistoryStream, index: i32) -> PumpResult<()> {
    link.send_command(&stream.index_uuid(), &glb::encode(index), false)
        .await
}

async fn read_entry(link: &PumpLink, stream: HistoryStream) -> PumpResult<HistoryEntry> {
    let response = link
        .read_response(&stream.value_uuid(), true)
        .await?
        .ok_or_else(|| PumpError::Transport("history value read returned nothing".into()))?;
    HistoryEntry::parse(&response)
}

/// Selects an entry by index, then reads it back.
pub async fn fetch_entry(
    link: &PumpLink,
    stream: HistoryStream,
    index: i32,
) -> PumpResult<HistoryEntry> {
    select_index(link, stream, index).await?;
    read_entry(link, stream).await
}

/// Well-known Events-stream event kinds (spec §4.7 event processor rules).
/// Unknown type codes map to `None` and are ignored by the event processor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HistoryEventKind {
    FastBolusRunning { units: f64 },
    FastBolusCompleted { units: f64 },
    FastBolusCancelled { units: f64 },
    TbrRunning { percent: u16, duration_min: u16 },
    TbrCompleted { percent: u16, duration_min: u16 },
    TbrCancelled { percent: u16, duration_min: u16 },
    BatteryAlert,
    ReservoirAlert,
    OcclusionAlert,
    AutoStopAlert,
}

pub fn classify(entry: &HistoryEntry) -> Option<HistoryEventKind> {
    use HistoryEventKind::*;
    match entry.entry_type {
        1 => Some(FastBolusRunning {
            units: entry.v1 as f64 / 100.0,
        }),
        2 => Some(FastBolusCompleted {
            units: entry.v1 as f64 / 100.0,
        }),
        3 => Some(FastBolusCancelled {
            units: entry.v1 as f64 / 100.0,
        }),
        9 => Some(TbrRunning {
            percent: entry.v1,
            duration_min: entry.v2,
        }),
        10 => Some(TbrCompleted {
            percent: entry.v1,
            duration_min: entry.v2,
        }),
        32 => Some(TbrCancelled {
            percent: entry.v1,
            duration_min: entry.v2,
        }),
        100 => Some(BatteryAlert),
        101 => Some(ReservoirAlert),
        104 => Some(OcclusionAlert),
        105 | 106 => Some(AutoStopAlert),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(entry_type: u8, v1: u16, v2: u16) -> HistoryEntry {
        HistoryEntry {
            pump_timestamp: 0,
            entry_type,
            v1,
            v2,
            v3: 0,
            sequence: 0,
            index: 0,
        }
    }

    #[test]
    fn fast_bolus_codes_map_to_units() {
        assert_eq!(
            classify(&entry(1, 250, 0)),
            Some(HistoryEventKind::FastBolusRunning { units: 2.5 })
        );
        assert_eq!(
            classify(&entry(2, 250, 0)),
            Some(HistoryEventKind::FastBolusCompleted { units: 2.5 })
        );
    }

    #[test]
    fn tbr_codes_map_to_percent_and_duration() {
        assert_eq!(
            classify(&entry(9, 50, 30)),
            Some(HistoryEventKind::TbrRunning {
                percent: 50,
                duration_min: 30
            })
        );
    }

    #[test]
    fn unknown_codes_are_ignored() {
        assert_eq!(classify(&entry(255, 0, 0)), None);
    }
}
