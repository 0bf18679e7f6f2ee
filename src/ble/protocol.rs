//! BLE protocol layer (spec §4.6, component C6): authentication, the
//! encrypted write/read pipelines, and the per-command contracts built on
//! top of them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::crc16;
use crate::error::{PumpError, PumpResult};
use crate::framing;
use crate::session::PumpCryptor;

use super::auth;
use super::constants;
use super::model::SystemStatus;
use super::transport::BleTransport;

/// Sequences authentication and the encrypted command/response pipelines
/// over a single [`BleTransport`] connection.
///
/// Holds no connection-lifecycle state of its own — the controller (C7) owns
/// connect/disconnect timing; this type is re-usable across episodes.
pub struct PumpLink {
    transport: Arc<dyn BleTransport>,
    cryptor: Mutex<Option<Arc<PumpCryptor>>>,
    counters_synced: Mutex<bool>,
    last_decrypt_failed: Mutex<bool>,
    /// Settle time the pump needs after an authentication write before any
    /// further operation (spec §4.6: "wait ~200 ms"); configurable so tests
    /// can shrink it instead of waiting on real-world timings.
    auth_settle: Duration,
}

impl PumpLink {
    pub fn new(transport: Arc<dyn BleTransport>, auth_settle_ms: u64) -> Self {
        Self {
            transport,
            cryptor: Mutex::new(None),
            counters_synced: Mutex::new(false),
            last_decrypt_failed: Mutex::new(false),
            auth_settle: Duration::from_millis(auth_settle_ms),
        }
    }

    /// Install a freshly loaded or renewed cryptor; counters are presumed
    /// unsynced until the next successful encrypted read.
    pub async fn install_cryptor(&self, cryptor: Arc<PumpCryptor>) {
        *self.cryptor.lock().await = Some(cryptor);
        *self.counters_synced.lock().await = false;
    }

    pub async fn mark_counters_unsynced(&self) {
        *self.counters_synced.lock().await = false;
    }

    pub async fn last_decrypt_failed(&self) -> bool {
        *self.last_decrypt_failed.lock().await
    }

    async fn cryptor(&self) -> PumpResult<Arc<PumpCryptor>> {
        self.cryptor
            .lock()
            .await
            .clone()
            .ok_or(PumpError::KeyMissing)
    }

    pub async fn connect(&self, mac: &str) -> PumpResult<()> {
        self.transport.connect(mac).await
    }

    pub async fn disconnect(&self) -> PumpResult<()> {
        self.transport.disconnect().await
    }

    /// Multi-frame write of already-opaque bytes (no session encryption) —
    /// used only for the key-write characteristic during renewal, where the
    /// payload was encrypted by the relay, not by our own cryptor.
    pub async fn write_framed_plain(&self, uuid: &str, data: &[u8]) -> PumpResult<()> {
        let frames = framing::chunk(data)?;
        for frame in &frames {
            self.transport.write_default(uuid, frame).await?;
        }
        Ok(())
    }

    /// Plaintext authentication (spec §4.6): write the MD5 password, then
    /// wait out the pump's settle window.
    pub async fn authenticate(&self, mac_bytes: &[u8; 6]) -> PumpResult<()> {
        let password = auth::auth_password(mac_bytes);
        self.transport
            .write_default(&constants::auth_password(), &password)
            .await?;
        tokio::time::sleep(self.auth_settle).await;
        Ok(())
    }

    async fn ensure_counters_synced(&self) -> PumpResult<()> {
        if *self.counters_synced.lock().await {
            return Ok(());
        }
        let status = self
            .read_response(&constants::system_status(), true)
            .await?;
        if status.is_none() {
            if self.last_decrypt_failed().await {
                return Err(PumpError::DecryptFailed);
            }
            return Err(PumpError::Transport(
                "system status read failed while syncing counters".into(),
            ));
        }
        *self.counters_synced.lock().await = true;
        Ok(())
    }

    /// Encrypted write pipeline (spec §4.6 `send_command`).
    pub async fn send_command(&self, uuid: &str, payload: &[u8], add_crc: bool) -> PumpResult<()> {
        self.ensure_counters_synced().await?;

        let body = if add_crc {
            crc16::append_crc(payload)
        } else {
            payload.to_vec()
        };

        let cryptor = self.cryptor().await?;
        let envelope = cryptor.encrypt(&body).await?;
        let frames = framing::chunk(&envelope)?;

        for frame in &frames {
            self.transport.write_default(uuid, frame).await?;
        }
        Ok(())
    }

    /// Encrypted read pipeline (spec §4.6 `read_response`). Returns `None`
    /// on a short first frame, a missing continuation frame, or a decrypt
    /// failure — callers check [`PumpLink::last_decrypt_failed`] to tell the
    /// last case apart from "nothing there".
    pub async fn read_response(&self, uuid: &str, has_crc: bool) -> PumpResult<Option<Vec<u8>>> {
        *self.last_decrypt_failed.lock().await = false;

        let first = self.transport.read(uuid).await?;
        if first.len() <= 1 {
            return Ok(None);
        }

        let total = framing::total_frames(first[0]);
        let mut frames = vec![first];
        for _ in 1..total {
            let frame = self.transport.read(&constants::extended_read()).await?;
            if frame.len() <= 1 {
                return Err(PumpError::Framing(
                    "extended-read continuation frame missing".into(),
                ));
            }
            frames.push(frame);
        }

        let assembled = framing::assemble(&frames);
        let cryptor = self.cryptor().await?;
        let plaintext = match cryptor.decrypt(&assembled).await {
            Ok(p) => p,
            Err(PumpError::DecryptFailed) => {
                *self.last_decrypt_failed.lock().await = true;
                return Ok(None);
            }
            Err(other) => return Err(other),
        };

        if has_crc {
            if let Some(stripped) = crc16::verify_and_strip(&plaintext) {
                return Ok(Some(stripped.to_vec()));
            }
            return Ok(Some(plaintext));
        }
        Ok(Some(plaintext))
    }

    /// A plain (unencrypted, single-value) characteristic read — device
    /// info and the master-version characteristic (spec §6).
    pub async fn read_plain(&self, uuid: &str) -> PumpResult<Vec<u8>> {
        self.transport.read(uuid).await
    }

    /// System Status read (spec §4.6 table): the one command whose decrypt
    /// also serves as the counter-resync mechanism.
    pub async fn read_system_status(&self) -> PumpResult<Option<SystemStatus>> {
        match self
            .read_response(&constants::system_status(), true)
            .await?
        {
            Some(payload) => Ok(Some(SystemStatus::parse(&payload)?)),
            None => Ok(None),
        }
    }
}
