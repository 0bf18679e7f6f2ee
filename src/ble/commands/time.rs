//! Date/time sync (spec §4.6 table): date must be written before time.

use chrono::{Datelike, Timelike};

use crate::ble::constants;
use crate::ble::protocol::PumpLink;
use crate::error::PumpResult;

pub fn build_date_payload(year: u16, month: u8, day: u8) -> [u8; 4] {
    let mut payload = [0u8; 4];
    payload[0..2].copy_from_slice(&year.to_le_bytes());
    payload[2] = month;
    payload[3] = day;
    payload
}

pub fn build_time_payload(hour: u8, minute: u8, second: u8) -> [u8; 3] {
    [hour, minute, second]
}

pub async fn sync_date(link: &PumpLink, year: u16, month: u8, day: u8) -> PumpResult<()> {
    let payload = build_date_payload(year, month, day);
    link.send_command(&constants::system_date(), &payload, true)
        .await
}

pub async fn sync_time(link: &PumpLink, hour: u8, minute: u8, second: u8) -> PumpResult<()> {
    let payload = build_time_payload(hour, minute, second);
    link.send_command(&constants::system_time(), &payload, true)
        .await
}

/// Writes date then time, as the pump requires (spec §4.6: "write date first").
pub async fn sync_datetime(link: &PumpLink, now: chrono::DateTime<chrono::Utc>) -> PumpResult<()> {
    sync_date(link, now.year() as u16, now.month() as u8, now.day() as u8).await?;
    sync_time(link, now.hour() as u8, now.minute() as u8, now.second() as u8).await
}
