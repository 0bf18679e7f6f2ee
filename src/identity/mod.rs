//! Device identity: a stable fingerprint sent to the relay on every
//! key-exchange call (spec §6: namespace `key_exchange`, key `device_id`).
//!
//! The fingerprint itself carries no meaning to the core — the relay uses it
//! to correlate key-exchange attempts for a given phone/app install. We
//! generate it once from the OS CSPRNG and persist it, rather than deriving
//! it from hardware identifiers (those require platform APIs out of scope
//! here per spec §1).

use std::sync::Arc;

use rand_core::RngCore;
use sha2::{Digest, Sha256};

use crate::error::PumpResult;
use crate::storage::PersistenceStore;

const NAMESPACE: &str = "key_exchange";
const KEY_DEVICE_ID: &str = "device_id";

/// Loads the persisted device id, generating and persisting a fresh one on
/// first use.
pub async fn device_id(store: &Arc<dyn PersistenceStore>) -> PumpResult<String> {
    if let Some(id) = store.get_string(NAMESPACE, KEY_DEVICE_ID).await? {
        return Ok(id);
    }

    let mut seed = [0u8; 32];
    rand_core::OsRng.fill_bytes(&mut seed);
    let id = hex::encode(Sha256::digest(seed));

    store.put_string(NAMESPACE, KEY_DEVICE_ID, &id).await?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStore;

    #[tokio::test]
    async fn device_id_is_generated_once_and_persisted() {
        let store: Arc<dyn PersistenceStore> =
            Arc::new(SqliteStore::open_in_memory().await.unwrap());

        let first = device_id(&store).await.unwrap();
        let second = device_id(&store).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64); // hex-encoded SHA-256
    }

    #[tokio::test]
    async fn different_stores_get_different_device_ids() {
        let a: Arc<dyn PersistenceStore> = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        let b: Arc<dyn PersistenceStore> = Arc::new(SqliteStore::open_in_memory().await.unwrap());

        assert_ne!(device_id(&a).await.unwrap(), device_id(&b).await.unwrap());
    }
}
