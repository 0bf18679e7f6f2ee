//! Relay-mediated key renewal (spec §4.7 "Key exchange via relay").
//!
//! This is its own connect/authenticate/disconnect cycle, independent of the
//! episode that discovered the dead key — by the time `DecryptFailed`
//! reaches the key-death wrapper, the original episode has already
//! disconnected in its `finally`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::ble::constants;
use crate::ble::protocol::PumpLink;
use crate::crypto::{derive_shared_key, KeyPair};
use crate::error::{PumpError, PumpResult};
use crate::relay::{KeyExchangeInput, KeyExchangeRelay};
use crate::session::PumpCryptor;
use crate::storage::PersistenceStore;

const KEY_EXCHANGE_NAMESPACE: &str = "key_exchange";
const KEY_DEVICE_PRIV: &str = "x25519_priv_pkcs8";
const KEY_DEVICE_PUB: &str = "x25519_pub_raw";

const PUMP_KEY_READ_RETRIES: u32 = 5;
const PUMP_KEY_READ_RETRY_DELAY: Duration = Duration::from_secs(1);
const POST_AUTH_SETTLE: Duration = Duration::from_millis(500);

/// Loads the persisted device X25519 key pair, generating and persisting a
/// fresh one on first use (spec §4.7 step 3).
pub async fn load_or_create_device_keys(store: &Arc<dyn PersistenceStore>) -> PumpResult<KeyPair> {
    if let Some(priv_hex) = store.get_string(KEY_EXCHANGE_NAMESPACE, KEY_DEVICE_PRIV).await? {
        let bytes = hex::decode(&priv_hex)
            .map_err(|e| PumpError::Other(anyhow::anyhow!("corrupt device private key: {e}")))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| PumpError::Other(anyhow::anyhow!("device private key is not 32 bytes")))?;
        return Ok(KeyPair::from_private_bytes(array));
    }

    let keys = KeyPair::generate();
    store
        .put_string(
            KEY_EXCHANGE_NAMESPACE,
            KEY_DEVICE_PRIV,
            &hex::encode(keys.private_bytes()),
        )
        .await?;
    store
        .put_string(
            KEY_EXCHANGE_NAMESPACE,
            KEY_DEVICE_PUB,
            &hex::encode(keys.public_bytes()),
        )
        .await?;
    Ok(keys)
}

/// Runs the full renewal sequence (spec §4.7 steps 2-9) and, on success,
/// returns a freshly installed cryptor with counters zeroed.
pub async fn renew_key_via_relay(
    link: &PumpLink,
    store: &Arc<dyn PersistenceStore>,
    relay: &dyn KeyExchangeRelay,
    device_keys: &KeyPair,
    device_id: &str,
    serial: u64,
    mac: &str,
    mac_bytes: &[u8; 6],
) -> PumpResult<Arc<PumpCryptor>> {
    let outcome = run_renewal(link, store, relay, device_keys, device_id, serial, mac, mac_bytes).await;
    // Best-effort disconnect regardless of outcome — mirrors the episode
    // `finally` pattern used for ordinary commands.
    if let Err(e) = link.disconnect().await {
        warn!(err = %e, "disconnect after key renewal failed (ignored)");
    }
    outcome
}

async fn run_renewal(
    link: &PumpLink,
    store: &Arc<dyn PersistenceStore>,
    relay: &dyn KeyExchangeRelay,
    device_keys: &KeyPair,
    device_id: &str,
    serial: u64,
    mac: &str,
    mac_bytes: &[u8; 6],
) -> PumpResult<Arc<PumpCryptor>> {
    let bt_address = constants::bt_address_bytes_from_serial(serial);

    link.connect(mac).await?;
    link.authenticate(mac_bytes).await?;
    tokio::time::sleep(POST_AUTH_SETTLE).await;

    let challenge_and_pubkey = read_pump_key_with_retries(link).await?;
    let challenge: [u8; 32] = challenge_and_pubkey[0..32].try_into().unwrap();
    let pump_public_key: [u8; 32] = challenge_and_pubkey[32..64].try_into().unwrap();

    let output = relay
        .exchange_key(KeyExchangeInput {
            challenge: &challenge,
            pump_public_key: &pump_public_key,
            app_public_key: &device_keys.public_bytes(),
            bt_address: &bt_address,
            device_id,
        })
        .await?;

    // The relay call may have run long enough to fall outside the pump's
    // authentication window — re-authenticate before writing back.
    link.authenticate(mac_bytes).await?;
    tokio::time::sleep(POST_AUTH_SETTLE).await;

    link.write_framed_plain(&constants::pump_key_write(), &output.encrypted_bytes)
        .await?;

    let shared_key = derive_shared_key(device_keys, &pump_public_key);
    let cryptor = Arc::new(PumpCryptor::install(store.clone(), shared_key).await?);
    link.install_cryptor(cryptor.clone()).await;
    link.mark_counters_unsynced().await;

    match link.read_system_status().await {
        Ok(Some(_)) => {
            info!("key renewal validated by a successful status read");
            Ok(cryptor)
        }
        Ok(None) if link.last_decrypt_failed().await => {
            warn!("key renewal validation read failed to decrypt — discarding new key");
            Err(PumpError::KeyValidationFailed)
        }
        Ok(None) => Err(PumpError::Transport(
            "status read after key renewal returned nothing".into(),
        )),
        Err(e) => Err(e),
    }
}

async fn read_pump_key_with_retries(link: &PumpLink) -> PumpResult<[u8; 64]> {
    let mut last_err = None;
    for attempt in 1..=PUMP_KEY_READ_RETRIES {
        match link.read_plain(&constants::pump_key_read()).await {
            Ok(bytes) if bytes.len() == 64 => return Ok(bytes.try_into().unwrap()),
            Ok(bytes) => {
                last_err = Some(PumpError::Framing(format!(
                    "pump key characteristic returned {} bytes, expected 64",
                    bytes.len()
                )));
            }
            Err(e) => last_err = Some(e),
        }
        if attempt < PUMP_KEY_READ_RETRIES {
            tokio::time::sleep(PUMP_KEY_READ_RETRY_DELAY).await;
        }
    }
    Err(last_err.expect("loop always runs at least once"))
}
