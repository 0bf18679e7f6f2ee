//! Decrypted payload shapes for the pump's characteristics (spec §3, §4.6).

use chrono::{DateTime, Utc};

use crate::error::PumpError;

/// Offset (seconds) of the pump's epoch (2000-01-01T00:00:00Z) from Unix time.
pub const PUMP_EPOCH_OFFSET_SECS: i64 = 946_684_800;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Stopped,
    Basal,
    Tbr,
    FastBolus,
    ExtendedBolus,
    BolusAndBasal,
    Priming,
    Paused,
    Unknown(u8),
}

impl From<u8> for DeliveryMode {
    fn from(raw: u8) -> Self {
        match raw {
            0 => Self::Stopped,
            1 => Self::Basal,
            2 => Self::Tbr,
            3 => Self::FastBolus,
            4 => Self::ExtendedBolus,
            5 => Self::BolusAndBasal,
            6 => Self::Priming,
            7 => Self::Paused,
            other => Self::Unknown(other),
        }
    }
}

/// System Status response (spec §4.6): 6-byte decrypted payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemStatus {
    pub delivery_mode: DeliveryMode,
    pub insulin_centi: u32,
    pub battery: u8,
}

impl SystemStatus {
    pub fn parse(payload: &[u8]) -> Result<Self, PumpError> {
        if payload.len() < 6 {
            return Err(PumpError::Other(anyhow::anyhow!(
                "system status payload too short: {} bytes",
                payload.len()
            )));
        }
        let insulin_centi = u32::from_le_bytes(payload[1..5].try_into().unwrap());
        Ok(Self {
            delivery_mode: DeliveryMode::from(payload[0]),
            insulin_centi,
            battery: payload[5],
        })
    }

    pub fn insulin_units(&self) -> f64 {
        self.insulin_centi as f64 / 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BolusNotificationState {
    Idle,
    Delivering,
    Cancelled,
    Completed,
    Unknown(u8),
}

impl BolusNotificationState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Idle | Self::Delivering)
    }
}

impl From<u8> for BolusNotificationState {
    fn from(raw: u8) -> Self {
        match raw {
            0 => Self::Idle,
            1 => Self::Delivering,
            3 => Self::Cancelled,
            4 => Self::Completed,
            other => Self::Unknown(other),
        }
    }
}

/// Bolus notification (spec §4.6): 10-byte plaintext, never encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BolusNotification {
    pub fast_status: BolusNotificationState,
    pub fast_seq: u32,
    pub slow_status: BolusNotificationState,
    pub slow_seq: u32,
}

impl BolusNotification {
    pub fn parse(payload: &[u8]) -> Result<Self, PumpError> {
        if payload.len() < 10 {
            return Err(PumpError::Other(anyhow::anyhow!(
                "bolus notification payload too short: {} bytes",
                payload.len()
            )));
        }
        Ok(Self {
            fast_status: payload[0].into(),
            fast_seq: u32::from_le_bytes(payload[1..5].try_into().unwrap()),
            slow_status: payload[5].into(),
            slow_seq: u32::from_le_bytes(payload[6..10].try_into().unwrap()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BolusBlock {
    pub status: u8,
    pub seq: u32,
    pub injected_centi: u32,
    pub total_centi: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlowBolusBlock {
    pub status: u8,
    pub seq: u32,
    pub injected_centi: u32,
    pub total_centi: u32,
    pub fast_part_injected_centi: u32,
    pub fast_part_total_centi: u32,
    pub actual_duration_min: u32,
    pub total_duration_min: u32,
}

/// Bolus Status response (spec §4.6): up to 42 bytes, fast block then an
/// optional slow (extended) block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BolusStatus {
    pub fast: BolusBlock,
    pub slow: Option<SlowBolusBlock>,
}

impl BolusStatus {
    pub fn parse(payload: &[u8]) -> Result<Self, PumpError> {
        if payload.len() < 13 {
            return Err(PumpError::Other(anyhow::anyhow!(
                "bolus status payload too short: {} bytes",
                payload.len()
            )));
        }
        let fast = BolusBlock {
            status: payload[0],
            seq: u32::from_le_bytes(payload[1..5].try_into().unwrap()),
            injected_centi: u32::from_le_bytes(payload[5..9].try_into().unwrap()),
            total_centi: u32::from_le_bytes(payload[9..13].try_into().unwrap()),
        };

        if payload.len() < 14 {
            return Ok(Self { fast, slow: None });
        }
        let slow_status = payload[13];
        if slow_status == 0 || payload.len() < 42 {
            return Ok(Self { fast, slow: None });
        }

        let w = |r: std::ops::Range<usize>| u32::from_le_bytes(payload[r].try_into().unwrap());
        let slow = SlowBolusBlock {
            status: slow_status,
            seq: w(14..18),
            injected_centi: w(18..22),
            total_centi: w(22..26),
            fast_part_injected_centi: w(26..30),
            fast_part_total_centi: w(30..34),
            actual_duration_min: w(34..38),
            total_duration_min: w(38..42),
        };
        Ok(Self {
            fast,
            slow: Some(slow),
        })
    }
}

/// History entry (spec §3): 17 bytes, timestamps in the pump's own epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryEntry {
    pub pump_timestamp: u32,
    pub entry_type: u8,
    pub v1: u16,
    pub v2: u16,
    pub v3: u16,
    pub sequence: u32,
    pub index: u16,
}

impl HistoryEntry {
    pub fn parse(payload: &[u8]) -> Result<Self, PumpError> {
        if payload.len() < 17 {
            return Err(PumpError::Other(anyhow::anyhow!(
                "history entry payload too short: {} bytes",
                payload.len()
            )));
        }
        Ok(Self {
            pump_timestamp: u32::from_le_bytes(payload[0..4].try_into().unwrap()),
            entry_type: payload[4],
            v1: u16::from_le_bytes(payload[5..7].try_into().unwrap()),
            v2: u16::from_le_bytes(payload[7..9].try_into().unwrap()),
            v3: u16::from_le_bytes(payload[9..11].try_into().unwrap()),
            sequence: u32::from_le_bytes(payload[11..15].try_into().unwrap()),
            index: u16::from_le_bytes(payload[15..17].try_into().unwrap()),
        })
    }

    /// The entry's timestamp converted to a UTC wall-clock time.
    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.pump_timestamp as i64 + PUMP_EPOCH_OFFSET_SECS, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_status_parses_fields() {
        let payload = [3u8, 0xC8, 0x00, 0x00, 0x00, 62];
        let s = SystemStatus::parse(&payload).unwrap();
        assert_eq!(s.delivery_mode, DeliveryMode::FastBolus);
        assert_eq!(s.insulin_centi, 200);
        assert_eq!(s.insulin_units(), 2.0);
        assert_eq!(s.battery, 62);
    }

    #[test]
    fn system_status_rejects_short_payload() {
        assert!(SystemStatus::parse(&[1, 2, 3]).is_err());
    }

    #[test]
    fn bolus_status_parses_fast_only() {
        let mut payload = vec![1u8, 1, 0, 0, 0, 50, 0, 0, 0, 200, 0, 0, 0];
        assert_eq!(payload.len(), 13);
        let s = BolusStatus::parse(&payload).unwrap();
        assert_eq!(s.fast.injected_centi, 50);
        assert_eq!(s.fast.total_centi, 200);
        assert!(s.slow.is_none());

        payload.push(0); // slow_status = 0 -> still no slow block
        let s = BolusStatus::parse(&payload).unwrap();
        assert!(s.slow.is_none());
    }

    #[test]
    fn bolus_status_parses_full_slow_block() {
        let mut payload = vec![0u8; 42];
        payload[0] = 1; // fast status
        payload[13] = 2; // slow status, non-zero
        let s = BolusStatus::parse(&payload).unwrap();
        assert!(s.slow.is_some());
    }

    #[test]
    fn bolus_notification_terminal_states() {
        assert!(!BolusNotificationState::Idle.is_terminal());
        assert!(!BolusNotificationState::Delivering.is_terminal());
        assert!(BolusNotificationState::Cancelled.is_terminal());
        assert!(BolusNotificationState::Completed.is_terminal());
    }

    #[test]
    fn history_entry_timestamp_shifts_by_pump_epoch() {
        let mut payload = vec![0u8; 17];
        payload[0..4].copy_from_slice(&0u32.to_le_bytes());
        payload[4] = 1;
        let entry = HistoryEntry::parse(&payload).unwrap();
        let ts = entry.timestamp_utc().unwrap();
        assert_eq!(ts.timestamp(), PUMP_EPOCH_OFFSET_SECS);
    }
}
