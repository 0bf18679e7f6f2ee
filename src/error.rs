//! Error taxonomy for the protocol engine (spec §7).
//!
//! Variants map 1:1 to the kinds enumerated in the spec rather than to
//! implementation details — callers match on these to decide retry vs.
//! surface-to-user vs. key-renewal behavior.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PumpError {
    /// BLE read/write/connect failure. Retried by the critical-retry wrapper
    /// for commands where replay is safe.
    #[error("transport error: {0}")]
    Transport(String),

    /// Authentication write was rejected by the pump.
    #[error("authentication failed: {0}")]
    AuthFailure(String),

    /// Assembled frame set was inconsistent (a frame went missing).
    #[error("framing error: {0}")]
    Framing(String),

    /// AEAD tag mismatch or envelope too short — the session key is dead.
    #[error("decrypt failed")]
    DecryptFailed,

    /// Response CRC mismatch on a CRC-bearing payload.
    #[error("CRC check failed")]
    CrcInvalid,

    /// GLB self-check (value ^ complement != 0xFFFFFFFF) failed.
    #[error("GLB value corrupt")]
    GlbCorrupt,

    /// No persisted shared key — controller must transition to NeedsKeyExchange.
    #[error("no shared key in persistence")]
    KeyMissing,

    /// Relay returned a non-success status or a malformed body.
    #[error("relay failure: {0}")]
    RelayFailure(String),

    /// Post-renewal status read failed to decrypt; new key was discarded.
    #[error("key validation failed after renewal")]
    KeyValidationFailed,

    /// A bounded wait elapsed without success or failure being observed.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The relay is not configured; renewal cannot proceed.
    #[error("relay URL not configured — key exchange unavailable")]
    RelayNotConfigured,

    /// A single renewal attempt was already made and failed; the command fails.
    #[error("key renewal already attempted for this command")]
    RenewalExhausted,

    /// Another operation is already in flight (should not surface in normal
    /// operation — the controller mutex prevents this, but `try_lock`-style
    /// callers may see it).
    #[error("a pump command is already in progress")]
    Busy,

    /// The caller cancelled the in-flight command.
    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type PumpResult<T> = Result<T, PumpError>;
