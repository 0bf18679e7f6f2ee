//! Command controller (spec §4.7, component C7): the connect-on-demand
//! episode, key-renewal wrapper, critical-retry wrapper, status polling, and
//! the public command surface built on top of the BLE protocol layer (C6).

pub mod events;
pub mod key_exchange;
pub mod polling;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use crate::ble::commands::{bolus, device, history, settings, status, tbr, time};
use crate::ble::constants;
use crate::ble::model::{BolusStatus, SystemStatus};
use crate::ble::protocol::PumpLink;
use crate::ble::transport::BleTransport;
use crate::config::Timings;
use crate::error::{PumpError, PumpResult};
use crate::identity;
use crate::relay::KeyExchangeRelay;
use crate::session::PumpCryptor;
use crate::storage::PersistenceStore;

pub use events::{LastKnown, PumpEvent};
pub use settings::BasalProgram;

/// A boxed, `'static` future — body closures return this so they can capture
/// an owned `Arc<PumpLink>` instead of a borrow, sidestepping HRTB lifetime
/// gymnastics for a plain `Fn(Arc<PumpLink>, SystemStatus) -> Fut` bound. The
/// `SystemStatus` is the one every episode already fetches for its forced
/// resync (spec §4.7's `return user_block(status)`), handed to the body
/// instead of being thrown away.
type EpisodeFuture<T> = Pin<Box<dyn Future<Output = PumpResult<T>> + Send>>;

const BROADCAST_CAPACITY: usize = 16;

/// Delay after `disconnect()` before the mutex is released (spec §4.7
/// episode `finally`: "disconnect_and_wait(); sleep 300 ms").
const POST_DISCONNECT_SETTLE: Duration = Duration::from_millis(300);

/// Delay the key-death wrapper waits before and after a renewal attempt
/// (spec §4.7: "on KeyDead, wait 1 s ... wait 1 s, retry the episode").
const KEY_DEATH_SETTLE: Duration = Duration::from_secs(1);

/// Number of transient-failure retries inside one episode's forced status
/// resync (spec §5: "3 attempts x 500 ms inter-attempt" — 1 initial + 2 more).
const STATUS_RESYNC_RETRIES: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
    NeedsKeyExchange,
    Error(String),
}

/// High-level command surface over one paired pump. Owns the episode mutex,
/// the renewal flag, and the event processor's last-known state.
pub struct PumpController {
    link: Arc<PumpLink>,
    store: Arc<dyn PersistenceStore>,
    relay: Option<Arc<dyn KeyExchangeRelay>>,
    serial: u64,
    mac: String,
    mac_bytes: [u8; 6],
    timings: Timings,

    episode_lock: Mutex<()>,
    renewal_in_progress: AtomicBool,
    last_known: Mutex<LastKnown>,

    connection_state_tx: broadcast::Sender<ConnectionState>,
    pump_status_tx: broadcast::Sender<SystemStatus>,
    pump_events_tx: broadcast::Sender<PumpEvent>,
}

impl PumpController {
    pub fn new(
        transport: Arc<dyn BleTransport>,
        store: Arc<dyn PersistenceStore>,
        relay: Option<Arc<dyn KeyExchangeRelay>>,
        serial: u64,
        timings: Timings,
    ) -> Self {
        let mac_bytes = constants::mac_bytes_from_serial(serial);
        let mac = constants::mac_from_serial(serial);
        let (connection_state_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (pump_status_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (pump_events_tx, _) = broadcast::channel(BROADCAST_CAPACITY);

        Self {
            link: Arc::new(PumpLink::new(transport, timings.auth_settle_ms)),
            store,
            relay,
            serial,
            mac,
            mac_bytes,
            timings,
            episode_lock: Mutex::new(()),
            renewal_in_progress: AtomicBool::new(false),
            last_known: Mutex::new(LastKnown::default()),
            connection_state_tx,
            pump_status_tx,
            pump_events_tx,
        }
    }

    pub fn subscribe_connection_state(&self) -> broadcast::Receiver<ConnectionState> {
        self.connection_state_tx.subscribe()
    }

    pub fn subscribe_pump_status(&self) -> broadcast::Receiver<SystemStatus> {
        self.pump_status_tx.subscribe()
    }

    pub fn subscribe_pump_events(&self) -> broadcast::Receiver<PumpEvent> {
        self.pump_events_tx.subscribe()
    }

    pub fn renewal_in_progress(&self) -> bool {
        self.renewal_in_progress.load(Ordering::Relaxed)
    }

    fn announce(&self, state: ConnectionState) {
        let _ = self.connection_state_tx.send(state);
    }

    // ---- episode plumbing -------------------------------------------------

    /// One connect-on-demand episode (spec §4.7 pseudocode): connect,
    /// authenticate, load the cryptor, force a counter-resync status read,
    /// then run `body`. Always disconnects in its `finally`, even when an
    /// earlier step failed.
    async fn run_episode<T, F>(&self, body: &F) -> PumpResult<T>
    where
        F: Fn(Arc<PumpLink>, SystemStatus) -> EpisodeFuture<T>,
    {
        self.announce(ConnectionState::Connecting);
        let result = self.run_episode_inner(body).await;

        if let Err(e) = self.link.disconnect().await {
            warn!(err = %e, "disconnect after episode failed (ignored)");
        }
        tokio::time::sleep(POST_DISCONNECT_SETTLE).await;

        match &result {
            Ok(_) => self.announce(ConnectionState::Ready),
            Err(PumpError::DecryptFailed) => self.announce(ConnectionState::NeedsKeyExchange),
            Err(e) => self.announce(ConnectionState::Error(e.to_string())),
        }
        result
    }

    async fn run_episode_inner<T, F>(&self, body: &F) -> PumpResult<T>
    where
        F: Fn(Arc<PumpLink>, SystemStatus) -> EpisodeFuture<T>,
    {
        self.link.connect(&self.mac).await?;
        self.link.authenticate(&self.mac_bytes).await?;

        let cryptor = PumpCryptor::from_persistence(self.store.clone())
            .await?
            .ok_or(PumpError::KeyMissing)?;
        self.link.install_cryptor(Arc::new(cryptor)).await;

        let status = self.resync_status().await?;
        self.apply_status(status).await;

        body(self.link.clone(), status).await
    }

    /// Forced resync read with the transient-failure retry window (spec §4.7,
    /// §5). A decrypt failure at any point is reported as-is — the caller
    /// (`execute_with_renewal`) treats `DecryptFailed` as the KeyDead signal.
    async fn resync_status(&self) -> PumpResult<SystemStatus> {
        if let Some(status) = self.link.read_system_status().await? {
            return Ok(status);
        }
        if self.link.last_decrypt_failed().await {
            return Err(PumpError::DecryptFailed);
        }

        for _ in 0..STATUS_RESYNC_RETRIES {
            tokio::time::sleep(Duration::from_millis(self.timings.status_retry_delay_ms)).await;
            if let Some(status) = self.link.read_system_status().await? {
                return Ok(status);
            }
            if self.link.last_decrypt_failed().await {
                return Err(PumpError::DecryptFailed);
            }
        }
        Err(PumpError::Transport(
            "system status read failed after retries".into(),
        ))
    }

    async fn apply_status(&self, status: SystemStatus) {
        let mut last_known = self.last_known.lock().await;
        let events = events::process_status(&mut last_known, status);
        drop(last_known);

        let _ = self.pump_status_tx.send(status);
        for event in events {
            let _ = self.pump_events_tx.send(event);
        }
    }

    /// Episode + key-death renewal wrapper. The episode mutex is held across
    /// both the initial attempt and the post-renewal retry, so at most one
    /// user command is ever in flight (spec §4.7).
    async fn execute_with_renewal<T, F>(&self, body: &F) -> PumpResult<T>
    where
        F: Fn(Arc<PumpLink>, SystemStatus) -> EpisodeFuture<T>,
    {
        let _guard = self.episode_lock.lock().await;

        match self.run_episode(body).await {
            Err(PumpError::DecryptFailed) => {
                warn!("session key appears dead — attempting one relay-mediated renewal");
                tokio::time::sleep(KEY_DEATH_SETTLE).await;
                self.renewal_in_progress.store(true, Ordering::Relaxed);
                let renewed = self.renew_key().await;
                tokio::time::sleep(KEY_DEATH_SETTLE).await;
                self.renewal_in_progress.store(false, Ordering::Relaxed);

                match renewed {
                    Ok(()) => self.run_episode(body).await,
                    Err(e) => {
                        warn!(err = %e, "key renewal failed — command fails");
                        self.announce(ConnectionState::NeedsKeyExchange);
                        Err(PumpError::RenewalExhausted)
                    }
                }
            }
            other => other,
        }
    }

    async fn renew_key(&self) -> PumpResult<()> {
        let relay = self.relay.as_ref().ok_or(PumpError::RelayNotConfigured)?;
        let device_keys = key_exchange::load_or_create_device_keys(&self.store).await?;
        let device_id = identity::device_id(&self.store).await?;

        key_exchange::renew_key_via_relay(
            &self.link,
            &self.store,
            relay.as_ref(),
            &device_keys,
            &device_id,
            self.serial,
            &self.mac,
            &self.mac_bytes,
        )
        .await?;

        self.last_known.lock().await.reset();
        info!("key renewal succeeded");
        Ok(())
    }

    /// Critical-retry wrapper for bolus/TBR/time/cancel commands (spec
    /// §4.7): up to `timings.critical_retry_attempts` attempts, linear
    /// backoff `base * attempt`. Only `Transport`/`AuthFailure` are retried —
    /// every other outcome (including `Cancelled`) is returned immediately.
    async fn execute_critical<T, F>(&self, body: F) -> PumpResult<T>
    where
        F: Fn(Arc<PumpLink>, SystemStatus) -> EpisodeFuture<T>,
    {
        let attempts = self.timings.critical_retry_attempts;
        let base = Duration::from_millis(self.timings.critical_retry_base_ms);
        let mut last_err = None;

        for attempt in 1..=attempts {
            match self.execute_with_renewal(&body).await {
                Ok(value) => return Ok(value),
                Err(PumpError::Cancelled) => return Err(PumpError::Cancelled),
                Err(e @ (PumpError::Transport(_) | PumpError::AuthFailure(_))) if attempt < attempts => {
                    let delay = base * attempt;
                    warn!(
                        attempt,
                        max = attempts,
                        delay_ms = delay.as_millis(),
                        err = %e,
                        "critical command attempt failed — retrying"
                    );
                    tokio::time::sleep(delay).await;
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.expect("loop always returns before exhausting without an error"))
    }

    // ---- public command surface -------------------------------------------

    pub async fn read_status(&self) -> PumpResult<SystemStatus> {
        self.execute_with_renewal(
            &|_link: Arc<PumpLink>, status: SystemStatus| -> EpisodeFuture<SystemStatus> {
                Box::pin(async move { Ok(status) })
            },
        )
        .await
    }

    pub async fn start_bolus(
        &self,
        total_units: f64,
        duration_min: u32,
        immediate_units: f64,
    ) -> PumpResult<()> {
        self.execute_critical(move |link: Arc<PumpLink>, _status: SystemStatus| -> EpisodeFuture<()> {
            Box::pin(async move { bolus::start_bolus(&link, total_units, duration_min, immediate_units).await })
        })
        .await
    }

    pub async fn cancel_bolus(&self, kind: u8) -> PumpResult<()> {
        self.execute_critical(move |link: Arc<PumpLink>, _status: SystemStatus| -> EpisodeFuture<()> {
            Box::pin(async move { bolus::cancel_bolus(&link, kind).await })
        })
        .await
    }

    pub async fn read_bolus_status(&self) -> PumpResult<Option<BolusStatus>> {
        self.execute_with_renewal(
            &|link: Arc<PumpLink>, _status: SystemStatus| -> EpisodeFuture<Option<BolusStatus>> {
                Box::pin(async move { bolus::read_bolus_status(&link).await })
            },
        )
        .await
    }

    pub async fn start_tbr(&self, percent: u32, duration_min: u32) -> PumpResult<()> {
        self.execute_critical(move |link: Arc<PumpLink>, _status: SystemStatus| -> EpisodeFuture<()> {
            Box::pin(async move { tbr::start_tbr(&link, percent, duration_min).await })
        })
        .await
    }

    pub async fn cancel_tbr(&self) -> PumpResult<()> {
        self.execute_critical(|link: Arc<PumpLink>, _status: SystemStatus| -> EpisodeFuture<()> {
            Box::pin(async move { tbr::cancel_tbr(&link).await })
        })
        .await
    }

    pub async fn sync_datetime(&self, now: chrono::DateTime<chrono::Utc>) -> PumpResult<()> {
        self.execute_critical(move |link: Arc<PumpLink>, _status: SystemStatus| -> EpisodeFuture<()> {
            Box::pin(async move { time::sync_datetime(&link, now).await })
        })
        .await
    }

    pub async fn read_setting(&self, index: i32) -> PumpResult<i32> {
        self.execute_with_renewal(&move |link: Arc<PumpLink>, _status: SystemStatus| -> EpisodeFuture<i32> {
            Box::pin(async move { settings::read_setting(&link, index).await })
        })
        .await
    }

    pub async fn write_setting(&self, index: i32, value: i32) -> PumpResult<()> {
        self.execute_critical(move |link: Arc<PumpLink>, _status: SystemStatus| -> EpisodeFuture<()> {
            Box::pin(async move { settings::write_setting(&link, index, value).await })
        })
        .await
    }

    pub async fn read_active_program(&self) -> PumpResult<i32> {
        self.execute_with_renewal(&|link: Arc<PumpLink>, _status: SystemStatus| -> EpisodeFuture<i32> {
            Box::pin(async move { settings::read_active_program(&link).await })
        })
        .await
    }

    pub async fn set_active_program(&self, program: BasalProgram) -> PumpResult<()> {
        self.execute_critical(move |link: Arc<PumpLink>, _status: SystemStatus| -> EpisodeFuture<()> {
            Box::pin(async move { settings::set_active_program(&link, program).await })
        })
        .await
    }

    pub async fn read_basal_rate(&self, program: BasalProgram, hour: u8) -> PumpResult<f64> {
        self.execute_with_renewal(&move |link: Arc<PumpLink>, _status: SystemStatus| -> EpisodeFuture<f64> {
            Box::pin(async move { settings::read_basal_rate(&link, program, hour).await })
        })
        .await
    }

    pub async fn history_count(&self, stream: history::HistoryStream) -> PumpResult<i32> {
        self.execute_with_renewal(&move |link: Arc<PumpLink>, _status: SystemStatus| -> EpisodeFuture<i32> {
            Box::pin(async move { history::read_count(&link, stream).await })
        })
        .await
    }

    pub async fn history_entry(
        &self,
        stream: history::HistoryStream,
        index: i32,
    ) -> PumpResult<crate::ble::model::HistoryEntry> {
        self.execute_with_renewal(
            &move |link: Arc<PumpLink>, _status: SystemStatus| -> EpisodeFuture<crate::ble::model::HistoryEntry> {
                Box::pin(async move { history::fetch_entry(&link, stream, index).await })
            },
        )
        .await
    }

    pub async fn device_info(&self) -> PumpResult<DeviceInfo> {
        self.execute_with_renewal(
            &|link: Arc<PumpLink>, _status: SystemStatus| -> EpisodeFuture<DeviceInfo> {
                Box::pin(async move { read_device_info(&link).await })
            },
        )
        .await
    }

    pub async fn read_security_status(&self) -> PumpResult<Option<Vec<u8>>> {
        self.execute_with_renewal(
            &|link: Arc<PumpLink>, _status: SystemStatus| -> EpisodeFuture<Option<Vec<u8>>> {
                Box::pin(async move { status::read_security_status(&link).await })
            },
        )
        .await
    }

    pub async fn read_master_version(&self) -> PumpResult<Vec<u8>> {
        self.execute_with_renewal(
            &|link: Arc<PumpLink>, _status: SystemStatus| -> EpisodeFuture<Vec<u8>> {
                Box::pin(async move { status::read_master_version(&link).await })
            },
        )
        .await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub serial: String,
    pub firmware_version: String,
    pub manufacturer: String,
    pub model: String,
}

async fn read_device_info(link: &PumpLink) -> PumpResult<DeviceInfo> {
    Ok(DeviceInfo {
        serial: device::read_serial(link).await?,
        firmware_version: device::read_firmware_version(link).await?,
        manufacturer: device::read_manufacturer(link).await?,
        model: device::read_model(link).await?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::mock::MockTransport;
    use crate::storage::SqliteStore;

    async fn paired_controller() -> PumpController {
        let store: Arc<dyn PersistenceStore> = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        let shared_key = [0x11u8; 32];
        PumpCryptor::install(store.clone(), shared_key).await.unwrap();

        let transport: Arc<dyn BleTransport> = Arc::new(MockTransport::new(shared_key));
        PumpController::new(transport, store, None, 10_175_983, Timings::default())
    }

    #[tokio::test]
    async fn read_status_runs_a_full_episode() {
        let controller = paired_controller().await;
        let status = controller.read_status().await.unwrap();
        assert_eq!(status.battery, 80);
    }

    #[tokio::test]
    async fn missing_key_surfaces_key_missing() {
        let store: Arc<dyn PersistenceStore> = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        let transport: Arc<dyn BleTransport> = Arc::new(MockTransport::new([0u8; 32]));
        let controller = PumpController::new(transport, store, None, 10_175_983, Timings::default());

        let err = controller.read_status().await.unwrap_err();
        assert!(matches!(err, PumpError::KeyMissing));
    }

    #[tokio::test]
    async fn dropped_key_after_pairing_surfaces_key_missing_on_next_episode() {
        let controller = paired_controller().await;
        controller.read_status().await.unwrap();
        controller.store.remove("crypto", "shared_key").await.unwrap();

        let err = controller.read_status().await.unwrap_err();
        assert!(matches!(err, PumpError::KeyMissing));
    }

    #[tokio::test]
    async fn connection_state_transitions_to_ready_on_success() {
        let controller = paired_controller().await;
        let mut rx = controller.subscribe_connection_state();
        controller.read_status().await.unwrap();

        let mut saw_ready = false;
        while let Ok(state) = rx.try_recv() {
            if state == ConnectionState::Ready {
                saw_ready = true;
            }
        }
        assert!(saw_ready);
    }

    #[tokio::test]
    async fn device_info_reads_all_four_fields() {
        let controller = paired_controller().await;
        // MockTransport returns empty bytes for unprogrammed plain
        // characteristics; this only confirms the four reads sequence
        // without error.
        let info = controller.device_info().await.unwrap();
        assert!(info.serial.is_empty());
    }

    #[tokio::test]
    async fn security_status_and_master_version_are_reachable_from_the_controller() {
        let controller = paired_controller().await;
        assert!(controller.read_security_status().await.unwrap().is_none());
        assert!(controller.read_master_version().await.unwrap().is_empty());
    }
}
