//! Abstract BLE facade consumed by the protocol layer (spec §4.6).
//!
//! The real GATT client, scanner, and bonding flow are explicitly out of
//! scope (spec §1) — this trait is the seam a platform adapter plugs into.
//! Implementors must preserve write ordering within one connection.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::PumpResult;

#[async_trait]
pub trait BleTransport: Send + Sync {
    /// Connect directly to a known MAC address (no scan).
    async fn connect(&self, mac: &str) -> PumpResult<()>;

    async fn disconnect(&self) -> PumpResult<()>;

    /// Read the current value of a characteristic.
    async fn read(&self, uuid: &str) -> PumpResult<Vec<u8>>;

    /// Write with acknowledgment (write-with-response).
    async fn write_default(&self, uuid: &str, data: &[u8]) -> PumpResult<()>;

    /// Write without waiting for acknowledgment.
    async fn write_no_response(&self, uuid: &str, data: &[u8]) -> PumpResult<()>;

    /// Subscribe to notifications on a characteristic; each received value is
    /// delivered on the returned channel until the connection drops.
    async fn subscribe(&self, uuid: &str) -> PumpResult<mpsc::Receiver<Vec<u8>>>;
}
