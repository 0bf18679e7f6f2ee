//! Background status polling (spec §4.7 "Polling"): every
//! `timings.poll_interval_secs` while the link is otherwise idle, refresh
//! System Status and the Events/Alerts history counts, surfacing any new
//! entries as [`PumpEvent`]s. Consecutive failures are counted but never
//! trigger a reconnect on their own — the next user command still goes
//! through the normal connect-on-demand episode.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::ble::commands::history::{self, HistoryStream};
use crate::error::PumpResult;

use super::{events, PumpController, PumpEvent};

/// Consecutive poll failures before `PollingDegraded` is surfaced (spec
/// §4.7: "consecutive failure count >= 3").
const DEGRADED_THRESHOLD: u32 = 3;

/// Handle to a running polling task; dropping it leaves the task running —
/// call [`PollingHandle::stop`] for a clean shutdown.
pub struct PollingHandle {
    cancel: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl PollingHandle {
    pub async fn stop(self) {
        let _ = self.cancel.send(());
        let _ = self.task.await;
    }
}

/// Starts the polling loop against `controller`. The loop runs until
/// [`PollingHandle::stop`] is called or the handle's task is aborted.
pub fn spawn(controller: Arc<PumpController>) -> PollingHandle {
    let (cancel_tx, mut cancel_rx) = oneshot::channel();

    let task = tokio::spawn(async move {
        let period = Duration::from_secs(controller.timings.poll_interval_secs);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await; // first tick fires immediately; skip it.

        loop {
            tokio::select! {
                _ = &mut cancel_rx => break,
                _ = interval.tick() => {
                    poll_tick(&controller).await;
                }
            }
        }
    });

    PollingHandle { cancel: cancel_tx, task }
}

async fn poll_tick(controller: &PumpController) {
    match poll_once(controller).await {
        Ok(()) => {
            let mut last_known = controller.last_known.lock().await;
            last_known.consecutive_poll_failures = 0;
        }
        Err(e) => {
            warn!(err = %e, "status poll failed");
            let mut last_known = controller.last_known.lock().await;
            last_known.consecutive_poll_failures += 1;
            if last_known.consecutive_poll_failures == DEGRADED_THRESHOLD {
                let failures = last_known.consecutive_poll_failures;
                drop(last_known);
                info!(failures, "polling degraded — surfacing to caller");
                let _ = controller
                    .pump_events_tx
                    .send(PumpEvent::PollingDegraded { consecutive_failures: failures });
            }
        }
    }
}

async fn poll_once(controller: &PumpController) -> PumpResult<()> {
    controller.read_status().await?;
    poll_stream(controller, HistoryStream::Events).await?;
    poll_stream(controller, HistoryStream::Alerts).await?;
    Ok(())
}

async fn poll_stream(controller: &PumpController, stream: HistoryStream) -> PumpResult<()> {
    let count = controller.history_count(stream).await?;

    let previous = {
        let last_known = controller.last_known.lock().await;
        match stream {
            HistoryStream::Events => last_known.events_count,
            HistoryStream::Alerts => last_known.alerts_count,
            HistoryStream::System => None,
        }
    };

    if let Some(previous) = previous {
        for index in previous..count {
            let entry = controller.history_entry(stream, index).await?;
            if let Some(kind) = history::classify(&entry) {
                let _ = controller.pump_events_tx.send(events::event_from_history(kind));
            }
        }
    }

    let mut last_known = controller.last_known.lock().await;
    match stream {
        HistoryStream::Events => last_known.events_count = Some(count),
        HistoryStream::Alerts => last_known.alerts_count = Some(count),
        HistoryStream::System => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::constants;
    use crate::ble::mock::MockTransport;
    use crate::ble::transport::BleTransport;
    use crate::config::Timings;
    use crate::glb;
    use crate::session::PumpCryptor;
    use crate::storage::{PersistenceStore, SqliteStore};

    async fn paired_controller(poll_interval_secs: u64) -> (Arc<PumpController>, Arc<MockTransport>) {
        let store: Arc<dyn PersistenceStore> = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        let shared_key = [0x22u8; 32];
        PumpCryptor::install(store.clone(), shared_key).await.unwrap();

        let mock = Arc::new(MockTransport::new(shared_key));
        mock.set_encrypted_value(&constants::events_count(), glb::encode(0).to_vec()).await;
        mock.set_encrypted_value(&constants::alerts_count(), glb::encode(0).to_vec()).await;

        let transport = mock.clone() as Arc<dyn BleTransport>;
        let mut timings = Timings::default();
        timings.poll_interval_secs = poll_interval_secs;
        let controller = Arc::new(PumpController::new(transport, store, None, 10_175_983, timings));
        (controller, mock)
    }

    #[tokio::test]
    async fn one_poll_tick_refreshes_status_without_error() {
        let (controller, _mock) = paired_controller(3600).await;
        poll_once(&controller).await.unwrap();
        assert_eq!(controller.last_known.lock().await.events_count, Some(0));
        assert_eq!(controller.last_known.lock().await.alerts_count, Some(0));
    }

    #[tokio::test]
    async fn new_events_are_fetched_and_classified() {
        let (controller, mock) = paired_controller(3600).await;
        poll_once(&controller).await.unwrap();

        // A fast bolus "completed" entry (type 2) lands at index 0.
        let mut entry_payload = vec![0u8; 17];
        entry_payload[4] = 2; // entry_type
        entry_payload[5..7].copy_from_slice(&250u16.to_le_bytes()); // v1 = 2.50 U
        mock.set_encrypted_value(&constants::events_value(), entry_payload).await;
        mock.set_encrypted_value(&constants::events_count(), glb::encode(1).to_vec()).await;

        let mut events_rx = controller.subscribe_pump_events();
        poll_once(&controller).await.unwrap();

        let mut saw_bolus_completed = false;
        while let Ok(event) = events_rx.try_recv() {
            if matches!(event, PumpEvent::BolusCompleted { units } if units == 2.5) {
                saw_bolus_completed = true;
            }
        }
        assert!(saw_bolus_completed);
        assert_eq!(controller.last_known.lock().await.events_count, Some(1));
    }

    #[tokio::test]
    async fn spawn_and_stop_is_clean() {
        let (controller, _mock) = paired_controller(3600).await;
        let handle = spawn(controller);
        handle.stop().await;
    }
}
