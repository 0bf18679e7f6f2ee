//! Standard Bluetooth device-info characteristics (spec §6, supplementary):
//! plain reads, no framing or encryption involved.

use crate::ble::constants;
use crate::ble::protocol::PumpLink;
use crate::error::PumpResult;

pub async fn read_serial(link: &PumpLink) -> PumpResult<String> {
    read_utf8(link, constants::DEVICE_SERIAL).await
}

pub async fn read_firmware_version(link: &PumpLink) -> PumpResult<String> {
    read_utf8(link, constants::DEVICE_FIRMWARE).await
}

pub async fn read_manufacturer(link: &PumpLink) -> PumpResult<String> {
    read_utf8(link, constants::DEVICE_MANUFACTURER).await
}

pub async fn read_model(link: &PumpLink) -> PumpResult<String> {
    read_utf8(link, constants::DEVICE_MODEL).await
}

async fn read_utf8(link: &PumpLink, uuid: &str) -> PumpResult<String> {
    let bytes = link.read_plain(uuid).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
