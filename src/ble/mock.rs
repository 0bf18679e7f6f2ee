//! In-memory mock BLE transport simulating a pump peer, for tests that
//! exercise the protocol and controller layers without real hardware (the
//! OS BLE stack is out of scope per spec §1).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::crc16;
use crate::crypto::{derive_shared_key, KeyPair};
use crate::error::{PumpError, PumpResult};
use crate::framing;
use crate::session::PumpCryptor;
use crate::storage::SqliteStore;

use super::constants;
use super::transport::BleTransport;

/// A mock BLE peer that speaks the same session-cryptor protocol as a real
/// pump: encrypted reads are generated on demand using a pump-side
/// [`PumpCryptor`] sharing the same key, so the protocol layer's decrypt
/// path is exercised for real rather than stubbed out. Also carries its own
/// X25519 identity so a key-renewal round can be driven end-to-end in tests
/// without a real relay.
pub struct MockTransport {
    shared_key: [u8; 32],
    pump_cryptor: RwLock<Option<Arc<PumpCryptor>>>,
    pump_keys: KeyPair,
    challenge: [u8; 32],
    plain_characteristics: Mutex<HashMap<String, Vec<u8>>>,
    encrypted_characteristics: Mutex<HashMap<String, Vec<u8>>>,
    auth_password: Mutex<Option<Vec<u8>>>,
    corrupt_next: Mutex<HashSet<String>>,
    extended_queue: Mutex<VecDeque<Vec<u8>>>,
}

impl MockTransport {
    pub fn new(shared_key: [u8; 32]) -> Self {
        Self {
            shared_key,
            pump_cryptor: RwLock::new(None),
            pump_keys: KeyPair::generate(),
            challenge: [0x7Eu8; 32],
            plain_characteristics: Mutex::new(HashMap::new()),
            encrypted_characteristics: Mutex::new(HashMap::new()),
            auth_password: Mutex::new(None),
            corrupt_next: Mutex::new(HashSet::new()),
            extended_queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn pump_public_key(&self) -> [u8; 32] {
        self.pump_keys.public_bytes()
    }

    /// 64-byte payload the pump key-read characteristic returns: a fixed
    /// challenge followed by the pump's X25519 public key (spec §4.7 step 3).
    fn pump_key_read_payload(&self) -> Vec<u8> {
        let mut out = self.challenge.to_vec();
        out.extend_from_slice(&self.pump_keys.public_bytes());
        out
    }

    /// Completes a renewal round from the pump side: derives the same shared
    /// key the device side computed via ECDH with `device_public_key`, and
    /// installs it as this mock's encryption key for subsequent reads. A
    /// test relay calls this with the `app_public_key` it was handed, the
    /// way a real pump would after processing the relay's encrypted blob.
    pub async fn complete_rekey(&self, device_public_key: [u8; 32]) -> PumpResult<()> {
        let shared_key = derive_shared_key(&self.pump_keys, &device_public_key);
        let store = Arc::new(SqliteStore::open_in_memory().await?);
        let cryptor = PumpCryptor::install(store, shared_key).await?;
        *self.pump_cryptor.write().await = Some(Arc::new(cryptor));
        Ok(())
    }

    async fn pump_cryptor(&self) -> PumpResult<Arc<PumpCryptor>> {
        if let Some(cryptor) = self.pump_cryptor.read().await.clone() {
            return Ok(cryptor);
        }
        let mut slot = self.pump_cryptor.write().await;
        if let Some(cryptor) = slot.clone() {
            return Ok(cryptor);
        }
        let store = Arc::new(SqliteStore::open_in_memory().await?);
        let cryptor = Arc::new(PumpCryptor::install(store, self.shared_key).await?);
        *slot = Some(cryptor.clone());
        Ok(cryptor)
    }

    pub async fn auth_password_received(&self) -> Option<Vec<u8>> {
        self.auth_password.lock().await.clone()
    }

    /// The next encrypted read of `uuid` will flip a bit in its envelope,
    /// simulating an AEAD tag failure.
    pub async fn corrupt_next_read(&self, uuid: &str) {
        self.corrupt_next.lock().await.insert(uuid.to_string());
    }

    /// Program a plain (non-encrypted) characteristic value, e.g. device info.
    pub async fn set_plain_characteristic(&self, uuid: &str, value: Vec<u8>) {
        self.plain_characteristics
            .lock()
            .await
            .insert(uuid.to_string(), value);
    }

    /// Program the decrypted plaintext an encrypted read of `uuid` should
    /// produce, e.g. a GLB-encoded history count. Encrypted the same way
    /// [`Self::canned_system_status`] is, with the shared pump-side cryptor.
    pub async fn set_encrypted_value(&self, uuid: &str, plaintext: Vec<u8>) {
        self.encrypted_characteristics
            .lock()
            .await
            .insert(uuid.to_string(), plaintext);
    }

    /// Canned plaintext for a System Status read: Basal mode, 1.50 U, 80%.
    fn canned_system_status(&self) -> Vec<u8> {
        let mut payload = vec![1u8]; // DeliveryMode::Basal
        payload.extend_from_slice(&150u32.to_le_bytes());
        payload.push(80); // battery
        crc16::append_crc(&payload)
    }

    async fn encrypted_read(&self, uuid: &str, plaintext: Vec<u8>) -> PumpResult<Vec<u8>> {
        let corrupt = self.corrupt_next.lock().await.remove(uuid);
        let cryptor = self.pump_cryptor().await?;
        let mut envelope = cryptor.encrypt(&plaintext).await?;
        if corrupt {
            let last = envelope.len() - 1;
            envelope[last] ^= 0x01;
        }

        let mut frames = framing::chunk(&envelope)?;
        let first = frames.remove(0);
        self.extended_queue.lock().await.extend(frames);
        Ok(first)
    }
}

#[async_trait]
impl BleTransport for MockTransport {
    async fn connect(&self, _mac: &str) -> PumpResult<()> {
        Ok(())
    }

    async fn disconnect(&self) -> PumpResult<()> {
        Ok(())
    }

    async fn read(&self, uuid: &str) -> PumpResult<Vec<u8>> {
        if uuid == constants::extended_read() {
            return Ok(self.extended_queue.lock().await.pop_front().unwrap_or_default());
        }
        if uuid == constants::pump_key_read() {
            return Ok(self.pump_key_read_payload());
        }
        if let Some(plain) = self.plain_characteristics.lock().await.get(uuid).cloned() {
            return Ok(plain);
        }
        if uuid == constants::system_status() {
            let payload = self.canned_system_status();
            return self.encrypted_read(uuid, payload).await;
        }
        if let Some(plaintext) = self.encrypted_characteristics.lock().await.get(uuid).cloned() {
            return self.encrypted_read(uuid, plaintext).await;
        }
        // Unprogrammed characteristic: behaves like "nothing there yet".
        Ok(Vec::new())
    }

    async fn write_default(&self, uuid: &str, data: &[u8]) -> PumpResult<()> {
        if uuid == constants::auth_password() {
            *self.auth_password.lock().await = Some(data.to_vec());
        }
        Ok(())
    }

    async fn write_no_response(&self, _uuid: &str, _data: &[u8]) -> PumpResult<()> {
        Ok(())
    }

    async fn subscribe(&self, _uuid: &str) -> PumpResult<mpsc::Receiver<Vec<u8>>> {
        let (_tx, rx) = mpsc::channel(8);
        Ok(rx)
    }
}
