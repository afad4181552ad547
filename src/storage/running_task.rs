//! Persisted registry of currently-active task definitions.
//!
//! One row per active task, upserted by an external provisioning process. The
//! fleet manager treats the table as read-only and watches it through
//! [`RunningTaskStore::snapshot`], a single-query consistent view of the row
//! count and newest `last_updated` value used for change detection.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::traits::{query_err, StorageResult};

/// A persisted active-task definition.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct RunningTaskRow {
    pub task_id: String,
    /// The task's full polymorphic serialization, including its nested
    /// schedule, formatter, and notifier.
    pub serialized_data: String,
    pub last_updated: DateTime<Utc>,
}

/// Registry change-detection fingerprint: both values are read in one query
/// so the observation is a consistent snapshot even while an external
/// provisioner writes concurrently.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegistrySnapshot {
    pub row_count: i64,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Storage for the active-task registry.
#[async_trait]
pub trait RunningTaskStore: Send + Sync {
    /// Row count and maximum `last_updated`, read in a single query.
    async fn snapshot(&self) -> StorageResult<RegistrySnapshot>;

    /// Every registry row.
    async fn list_all(&self) -> StorageResult<Vec<RunningTaskRow>>;

    /// Inserts or replaces a task definition, stamping `last_updated`.
    /// Called by the provisioning process, never by the fleet manager.
    async fn upsert(&self, task_id: &str, serialized_data: &str) -> StorageResult<()>;

    /// Removes a task definition.
    async fn remove(&self, task_id: &str) -> StorageResult<()>;
}

/// SQLite implementation of the running-task registry.
pub struct SqliteRunningTaskStore {
    pool: SqlitePool,
}

impl SqliteRunningTaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn initialize_schema(&self) -> StorageResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS running_task (
                task_id TEXT PRIMARY KEY,
                serialized_data TEXT NOT NULL,
                last_updated TIMESTAMP NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(query_err)?;
        Ok(())
    }
}

#[async_trait]
impl RunningTaskStore for SqliteRunningTaskStore {
    async fn snapshot(&self) -> StorageResult<RegistrySnapshot> {
        let (row_count, last_updated) = sqlx::query_as::<_, (i64, Option<DateTime<Utc>>)>(
            r#"
            SELECT COUNT(*), MAX(last_updated)
            FROM running_task
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(query_err)?;
        Ok(RegistrySnapshot {
            row_count,
            last_updated,
        })
    }

    async fn list_all(&self) -> StorageResult<Vec<RunningTaskRow>> {
        sqlx::query_as::<_, RunningTaskRow>(
            r#"
            SELECT task_id, serialized_data, last_updated
            FROM running_task
            ORDER BY task_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(query_err)
    }

    async fn upsert(&self, task_id: &str, serialized_data: &str) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO running_task (task_id, serialized_data, last_updated)
            VALUES ($1, $2, $3)
            ON CONFLICT (task_id) DO UPDATE SET
                serialized_data = excluded.serialized_data,
                last_updated = excluded.last_updated
            "#,
        )
        .bind(task_id)
        .bind(serialized_data)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn remove(&self, task_id: &str) -> StorageResult<()> {
        sqlx::query(
            r#"
            DELETE FROM running_task
            WHERE task_id = $1
            "#,
        )
        .bind(task_id)
        .execute(&self.pool)
        .await
        .map_err(query_err)?;
        Ok(())
    }
}

/// In-memory implementation for tests.
pub struct MemoryRunningTaskStore {
    rows: RwLock<HashMap<String, RunningTaskRow>>,
}

impl MemoryRunningTaskStore {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryRunningTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RunningTaskStore for MemoryRunningTaskStore {
    async fn snapshot(&self) -> StorageResult<RegistrySnapshot> {
        let rows = self.rows.read().await;
        Ok(RegistrySnapshot {
            row_count: rows.len() as i64,
            last_updated: rows.values().map(|row| row.last_updated).max(),
        })
    }

    async fn list_all(&self) -> StorageResult<Vec<RunningTaskRow>> {
        let rows = self.rows.read().await;
        let mut all: Vec<_> = rows.values().cloned().collect();
        all.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        Ok(all)
    }

    async fn upsert(&self, task_id: &str, serialized_data: &str) -> StorageResult<()> {
        let mut rows = self.rows.write().await;
        rows.insert(
            task_id.to_string(),
            RunningTaskRow {
                task_id: task_id.to_string(),
                serialized_data: serialized_data.to_string(),
                last_updated: Utc::now(),
            },
        );
        Ok(())
    }

    async fn remove(&self, task_id: &str) -> StorageResult<()> {
        self.rows.write().await.remove(task_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn sqlite_store() -> SqliteRunningTaskStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteRunningTaskStore::new(pool);
        store.initialize_schema().await.unwrap();
        store
    }

    async fn exercise_store(store: &dyn RunningTaskStore) {
        let empty = store.snapshot().await.unwrap();
        assert_eq!(empty.row_count, 0);
        assert_eq!(empty.last_updated, None);

        store.upsert("task_a", r#"{"__type":"A"}"#).await.unwrap();
        store.upsert("task_b", r#"{"__type":"B"}"#).await.unwrap();

        let snapshot = store.snapshot().await.unwrap();
        assert_eq!(snapshot.row_count, 2);
        assert!(snapshot.last_updated.is_some());

        // Upserting an existing id replaces the blob without growing the set.
        store.upsert("task_a", r#"{"__type":"A2"}"#).await.unwrap();
        let snapshot = store.snapshot().await.unwrap();
        assert_eq!(snapshot.row_count, 2);

        let rows = store.list_all().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].task_id, "task_a");
        assert_eq!(rows[0].serialized_data, r#"{"__type":"A2"}"#);
        assert_eq!(rows[1].task_id, "task_b");

        store.remove("task_a").await.unwrap();
        let snapshot = store.snapshot().await.unwrap();
        assert_eq!(snapshot.row_count, 1);
    }

    #[tokio::test]
    async fn memory_store_tracks_registry_rows() {
        exercise_store(&MemoryRunningTaskStore::new()).await;
    }

    #[tokio::test]
    async fn sqlite_store_tracks_registry_rows() {
        exercise_store(&sqlite_store().await).await;
    }
}
