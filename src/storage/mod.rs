//! Persistence store (spec §9 redesign note: "global per-namespace stores
//! become an explicit store trait").
//!
//! A small key/value interface, namespaced per spec §6
//! (`crypto`, `key_exchange`, `device`), injected into the session cryptor
//! and the controller rather than hard-wired. [`SqliteStore`] is the
//! concrete implementation used outside of tests, backed by the same
//! SQLite/WAL setup as the rest of this ecosystem.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{sqlite::SqliteConnectOptions, Row, SqlitePool};
use std::{path::Path, str::FromStr};

/// A small, namespaced key/value persistence interface.
///
/// Implementors must be safe to share across tasks (`Send + Sync`); the
/// session cryptor and controller each hold an `Arc<dyn PersistenceStore>`.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn get_bytes(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>>;
    async fn put_bytes(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()>;
    async fn remove(&self, namespace: &str, key: &str) -> Result<()>;

    async fn get_u64(&self, namespace: &str, key: &str) -> Result<Option<u64>> {
        Ok(self
            .get_bytes(namespace, key)
            .await?
            .and_then(|b| b.try_into().ok())
            .map(u64::from_le_bytes))
    }

    async fn put_u64(&self, namespace: &str, key: &str, value: u64) -> Result<()> {
        self.put_bytes(namespace, key, &value.to_le_bytes()).await
    }

    async fn get_u32(&self, namespace: &str, key: &str) -> Result<Option<u32>> {
        Ok(self
            .get_bytes(namespace, key)
            .await?
            .and_then(|b| b.try_into().ok())
            .map(u32::from_le_bytes))
    }

    async fn put_u32(&self, namespace: &str, key: &str, value: u32) -> Result<()> {
        self.put_bytes(namespace, key, &value.to_le_bytes()).await
    }

    async fn get_string(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        Ok(self
            .get_bytes(namespace, key)
            .await?
            .map(|b| String::from_utf8_lossy(&b).into_owned()))
    }

    async fn put_string(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        self.put_bytes(namespace, key, value.as_bytes()).await
    }
}

/// SQLite-backed implementation of [`PersistenceStore`].
///
/// WAL mode + `synchronous = NORMAL`, matching the ecosystem's existing
/// storage layer: durable enough to survive a crash between encrypt and the
/// BLE write that carries the envelope, cheap enough to call on every
/// encrypt/decrypt.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn open(data_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let db_path = data_dir.join("ypsopump.db");
        let opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .create_if_missing(true);

        let pool = SqlitePool::connect_with(opts).await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    /// In-memory store, for tests — never touches disk.
    pub async fn open_in_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePool::connect_with(opts).await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS kv_store (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                value BLOB NOT NULL,
                PRIMARY KEY (namespace, key)
             )",
        )
        .execute(pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PersistenceStore for SqliteStore {
    async fn get_bytes(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT value FROM kv_store WHERE namespace = ? AND key = ?")
            .bind(namespace)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<Vec<u8>, _>("value")))
    }

    async fn put_bytes(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()> {
        sqlx::query(
            "INSERT INTO kv_store (namespace, key, value) VALUES (?, ?, ?)
             ON CONFLICT(namespace, key) DO UPDATE SET value = excluded.value",
        )
        .bind(namespace)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, namespace: &str, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv_store WHERE namespace = ? AND key = ?")
            .bind(namespace)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bytes_round_trip() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.put_bytes("crypto", "shared_key", b"abc").await.unwrap();
        assert_eq!(
            store.get_bytes("crypto", "shared_key").await.unwrap(),
            Some(b"abc".to_vec())
        );
        assert_eq!(store.get_bytes("crypto", "missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn u64_round_trip_and_overwrite() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.put_u64("crypto", "write_counter", 41).await.unwrap();
        store.put_u64("crypto", "write_counter", 42).await.unwrap();
        assert_eq!(
            store.get_u64("crypto", "write_counter").await.unwrap(),
            Some(42)
        );
    }

    #[tokio::test]
    async fn remove_deletes_key() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.put_string("device", "device_mac", "EC:2A:F0:00:00:00").await.unwrap();
        store.remove("device", "device_mac").await.unwrap();
        assert_eq!(store.get_string("device", "device_mac").await.unwrap(), None);
    }

    #[tokio::test]
    async fn namespaces_are_independent() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.put_string("a", "key", "one").await.unwrap();
        store.put_string("b", "key", "two").await.unwrap();
        assert_eq!(store.get_string("a", "key").await.unwrap().unwrap(), "one");
        assert_eq!(store.get_string("b", "key").await.unwrap().unwrap(), "two");
    }
}
