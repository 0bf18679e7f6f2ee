//! Bolus start/cancel/status/notification (spec §4.6 table).

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::ble::constants;
use crate::ble::model::{BolusNotification, BolusStatus};
use crate::ble::protocol::PumpLink;
use crate::error::{PumpError, PumpResult};

/// Fast bolus: `duration_min == 0`. Extended/combo otherwise.
pub const TYPE_FAST: u8 = 1;
pub const TYPE_EXTENDED: u8 = 2;

const MIN_TOTAL_CENTI: u32 = 1;
const MAX_TOTAL_CENTI: u32 = 2500;

/// How long [`await_terminal_notification`] waits before giving up
/// (spec §5: "waiting for a terminal bolus notification: 300 s").
pub const NOTIFICATION_TIMEOUT: Duration = Duration::from_secs(300);

fn centi(units: f64) -> u32 {
    (units * 100.0).round() as u32
}

/// Builds the 13-byte start-bolus payload (spec §8 scenario 4).
pub fn build_start_payload(total_units: f64, duration_min: u32, immediate_units: f64) -> [u8; 13] {
    let total_centi = centi(total_units).clamp(MIN_TOTAL_CENTI, MAX_TOTAL_CENTI);
    let immediate_centi = centi(immediate_units).clamp(0, total_centi);
    let kind = if duration_min == 0 {
        TYPE_FAST
    } else {
        TYPE_EXTENDED
    };

    let mut payload = [0u8; 13];
    payload[0..4].copy_from_slice(&total_centi.to_le_bytes());
    payload[4..8].copy_from_slice(&duration_min.to_le_bytes());
    payload[8..12].copy_from_slice(&immediate_centi.to_le_bytes());
    payload[12] = kind;
    payload
}

/// Builds the 13-byte cancel-bolus payload: all zero except the type byte.
pub fn build_cancel_payload(kind: u8) -> [u8; 13] {
    let mut payload = [0u8; 13];
    payload[12] = kind;
    payload
}

pub async fn start_bolus(
    link: &PumpLink,
    total_units: f64,
    duration_min: u32,
    immediate_units: f64,
) -> PumpResult<()> {
    let payload = build_start_payload(total_units, duration_min, immediate_units);
    link.send_command(&constants::bolus_start_stop(), &payload, true)
        .await
}

pub async fn cancel_bolus(link: &PumpLink, kind: u8) -> PumpResult<()> {
    let payload = build_cancel_payload(kind);
    link.send_command(&constants::bolus_start_stop(), &payload, true)
        .await
}

pub async fn read_bolus_status(link: &PumpLink) -> PumpResult<Option<BolusStatus>> {
    match link.read_response(&constants::bolus_status(), true).await? {
        Some(payload) => Ok(Some(BolusStatus::parse(&payload)?)),
        None => Ok(None),
    }
}

/// Awaits a terminal state (`Cancelled`/`Completed`) on the bolus
/// notification stream. The notification characteristic is plaintext over
/// BLE (spec §4.6: "NOT encrypted"), so this bypasses the cryptor entirely.
pub async fn await_terminal_notification(
    mut notifications: mpsc::Receiver<Vec<u8>>,
) -> PumpResult<BolusNotification> {
    timeout(NOTIFICATION_TIMEOUT, async {
        loop {
            let raw = notifications
                .recv()
                .await
                .ok_or_else(|| PumpError::Transport("bolus notification channel closed".into()))?;
            let body = crate::crc16::verify_and_strip(&raw).unwrap_or(&raw);
            let notification = BolusNotification::parse(body)?;
            if notification.fast_status.is_terminal() || notification.slow_status.is_terminal() {
                return Ok(notification);
            }
        }
    })
    .await
    .map_err(|_| PumpError::Timeout("bolus terminal notification".into()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_bolus_fixture_matches_spec_scenario_4() {
        let payload = build_start_payload(2.0, 0, 0.0);
        assert_eq!(
            payload,
            [0xC8, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01]
        );
    }

    #[test]
    fn start_bolus_clamps_total_and_immediate() {
        let payload = build_start_payload(1000.0, 0, 5000.0);
        let total = u32::from_le_bytes(payload[0..4].try_into().unwrap());
        let immediate = u32::from_le_bytes(payload[8..12].try_into().unwrap());
        assert_eq!(total, MAX_TOTAL_CENTI);
        assert_eq!(immediate, MAX_TOTAL_CENTI);
    }

    #[test]
    fn extended_bolus_selects_type_two() {
        let payload = build_start_payload(3.0, 120, 1.0);
        assert_eq!(payload[12], TYPE_EXTENDED);
    }

    #[test]
    fn cancel_payload_is_zero_except_type_byte() {
        let payload = build_cancel_payload(TYPE_FAST);
        assert_eq!(payload[0..12], [0u8; 12]);
        assert_eq!(payload[12], TYPE_FAST);
    }
}
