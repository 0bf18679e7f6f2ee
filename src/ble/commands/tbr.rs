//! Temporary basal rate start/cancel (spec §4.6 table, §8 scenario 5).

use crate::ble::constants;
use crate::ble::protocol::PumpLink;
use crate::error::PumpResult;
use crate::glb;

/// Builds the 16-byte start-TBR payload: `GLB(percent) ‖ GLB(duration_min)`.
/// No CRC trailer — this command is GLB-wrapped only.
pub fn build_payload(percent: u32, duration_min: u32) -> [u8; 16] {
    let mut payload = [0u8; 16];
    payload[0..8].copy_from_slice(&glb::encode(percent as i32));
    payload[8..16].copy_from_slice(&glb::encode(duration_min as i32));
    payload
}

pub async fn start_tbr(link: &PumpLink, percent: u32, duration_min: u32) -> PumpResult<()> {
    let percent = percent.clamp(0, 200);
    let payload = build_payload(percent, duration_min);
    link.send_command(&constants::tbr_start_stop(), &payload, false)
        .await
}

/// Equivalent to `start_tbr(100, 0)` (spec §4.6 table).
pub async fn cancel_tbr(link: &PumpLink) -> PumpResult<()> {
    start_tbr(link, 100, 0).await
}
