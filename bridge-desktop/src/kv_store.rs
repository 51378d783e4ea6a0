//! Key-Value Storage using SQLite

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::KeyValueStore,
};
use sqlx::{sqlite::SqlitePool, Row};
use std::path::PathBuf;
use tracing::debug;

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS kv_store (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    )
"#;

/// SQLite-backed key-value store implementation
///
/// Provides the durable storage used by the response cache and the offline
/// sync queue:
/// - Upsert semantics on `set`
/// - Transactional `remove_many`
/// - Async operations
pub struct SqliteKeyValueStore {
    pool: SqlitePool,
}

impl SqliteKeyValueStore {
    /// Create a new store with the given database path
    pub async fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(BridgeError::Io)?;
        }

        // Convert path to string, replacing backslashes with forward slashes for SQLite URL
        let path_str = db_path.to_string_lossy().replace('\\', "/");
        let db_url = format!("sqlite://{}?mode=rwc", path_str);

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to connect to DB: {}", e)))?;

        Self::create_table(&pool).await?;
        debug!(path = ?db_path, "Initialized key-value store");

        Ok(Self { pool })
    }

    /// Create an in-memory store (for testing)
    pub async fn in_memory() -> Result<Self> {
        // A single connection keeps every query on the same in-memory database.
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to connect to DB: {}", e)))?;

        Self::create_table(&pool).await?;
        Ok(Self { pool })
    }

    async fn create_table(pool: &SqlitePool) -> Result<()> {
        sqlx::query(CREATE_TABLE)
            .execute(pool)
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to create table: {}", e)))?;
        Ok(())
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }
}

#[async_trait]
impl KeyValueStore for SqliteKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to get value: {}", e)))?;

        Ok(row.map(|row| row.get(0)))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Self::now())
        .execute(&self.pool)
        .await
        .map_err(|e| BridgeError::Storage(format!("Failed to set value: {}", e)))?;

        debug!(key = key, "Stored value");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to remove value: {}", e)))?;

        debug!(key = key, "Removed value");
        Ok(())
    }

    async fn remove_many(&self, keys: &[String]) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to begin transaction: {}", e)))?;

        for key in keys {
            sqlx::query("DELETE FROM kv_store WHERE key = ?")
                .bind(key)
                .execute(&mut *tx)
                .await
                .map_err(|e| BridgeError::Storage(format!("Failed to remove value: {}", e)))?;
        }

        tx.commit()
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to commit: {}", e)))?;

        debug!(count = keys.len(), "Removed values");
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT key FROM kv_store ORDER BY key")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to list keys: {}", e)))?;

        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }
}
