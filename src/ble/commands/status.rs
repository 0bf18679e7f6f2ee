//! System Status (spec §4.6 table, first row) — also the command that
//! establishes/resyncs the session counters on every connect.

use crate::ble::constants;
use crate::ble::model::SystemStatus;
use crate::ble::protocol::PumpLink;
use crate::error::PumpResult;

pub async fn read_system_status(link: &PumpLink) -> PumpResult<Option<SystemStatus>> {
    link.read_system_status().await
}

pub async fn read_security_status(link: &PumpLink) -> PumpResult<Option<Vec<u8>>> {
    // spec §9: left as a raw passthrough, not interpreted by the core.
    link.read_response(&constants::security_status(), true).await
}

pub async fn read_master_version(link: &PumpLink) -> PumpResult<Vec<u8>> {
    link.read_plain(&constants::master_version()).await
}
