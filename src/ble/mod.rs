//! BLE protocol layer (spec §4.6, component C6): authentication, multi-frame
//! read/write, and the encrypted command/response pipelines for every
//! characteristic. The OS-level GATT client/scanner/bonding flow is out of
//! scope (spec §1) — [`transport::BleTransport`] is the seam a platform
//! adapter implements.

pub mod auth;
pub mod commands;
pub mod constants;
pub mod model;
pub mod protocol;
pub mod transport;

#[cfg(any(test, feature = "test-support"))]
pub mod mock;

pub use protocol::PumpLink;
pub use transport::BleTransport;
