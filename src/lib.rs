//! Protocol engine for BLE communication with a YpsoPump insulin pump.
//!
//! Layout mirrors the seven components this crate is built from: CRC16 and
//! GLB self-check codecs ([`crc16`], [`glb`]), multi-frame [`framing`],
//! the cryptographic primitives and session cryptor ([`crypto`],
//! [`session`]), the BLE protocol layer ([`ble`]), and the command
//! controller ([`controller`]) that ties them together into a
//! connect-on-demand command surface. [`config`], [`error`], [`identity`],
//! [`relay`], [`storage`], and [`retry`] are the ambient plumbing every
//! other module is built on.

pub mod ble;
pub mod config;
pub mod controller;
pub mod crc16;
pub mod crypto;
pub mod error;
pub mod framing;
pub mod glb;
pub mod identity;
pub mod relay;
pub mod retry;
pub mod session;
pub mod storage;
