//! Append-only persisted history of task results.
//!
//! Every run of a task appends one row keyed by the task identifier. Rows are
//! never mutated or deleted; the store is an audit trail queried
//! most-recent-first for change detection.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::SqlitePool;
use tokio::sync::RwLock;

use super::traits::{query_err, StorageResult};
use crate::errors::StorageError;

/// A persisted task result.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct TaskResultRow {
    pub task_id: String,
    /// The result's serialized JSON form.
    pub result: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only result history keyed by task identifier.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Appends a result for a task, stamped with the current time.
    async fn append(&self, task_id: &str, result: &Value) -> StorageResult<()>;

    /// The most recent result for a task, if any.
    async fn latest(&self, task_id: &str) -> StorageResult<Option<TaskResultRow>>;

    /// Up to `limit` results for a task, most recent first.
    async fn history(&self, task_id: &str, limit: u32) -> StorageResult<Vec<TaskResultRow>>;
}

fn encode_result(result: &Value) -> StorageResult<String> {
    serde_json::to_string(result).map_err(|e| StorageError::InvalidStoredData {
        details: e.to_string(),
    })
}

/// SQLite implementation of the result store.
pub struct SqliteResultStore {
    pool: SqlitePool,
}

impl SqliteResultStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn initialize_schema(&self) -> StorageResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS task_result (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id TEXT NOT NULL,
                result TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(query_err)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_task_result_task_id_created_at
            ON task_result (task_id, created_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(query_err)?;

        Ok(())
    }
}

#[async_trait]
impl ResultStore for SqliteResultStore {
    async fn append(&self, task_id: &str, result: &Value) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO task_result (task_id, result, created_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(task_id)
        .bind(encode_result(result)?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn latest(&self, task_id: &str) -> StorageResult<Option<TaskResultRow>> {
        sqlx::query_as::<_, TaskResultRow>(
            r#"
            SELECT task_id, result, created_at
            FROM task_result
            WHERE task_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_err)
    }

    async fn history(&self, task_id: &str, limit: u32) -> StorageResult<Vec<TaskResultRow>> {
        sqlx::query_as::<_, TaskResultRow>(
            r#"
            SELECT task_id, result, created_at
            FROM task_result
            WHERE task_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(task_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(query_err)
    }
}

/// In-memory implementation for tests.
pub struct MemoryResultStore {
    rows: RwLock<Vec<TaskResultRow>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(Vec::new()),
        }
    }
}

impl Default for MemoryResultStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn append(&self, task_id: &str, result: &Value) -> StorageResult<()> {
        let row = TaskResultRow {
            task_id: task_id.to_string(),
            result: encode_result(result)?,
            created_at: Utc::now(),
        };
        self.rows.write().await.push(row);
        Ok(())
    }

    async fn latest(&self, task_id: &str) -> StorageResult<Option<TaskResultRow>> {
        let rows = self.rows.read().await;
        Ok(rows.iter().rev().find(|row| row.task_id == task_id).cloned())
    }

    async fn history(&self, task_id: &str, limit: u32) -> StorageResult<Vec<TaskResultRow>> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .rev()
            .filter(|row| row.task_id == task_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn sqlite_store() -> SqliteResultStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteResultStore::new(pool);
        store.initialize_schema().await.unwrap();
        store
    }

    async fn exercise_store(store: &dyn ResultStore) {
        assert_eq!(store.latest("watcher").await.unwrap(), None);

        store.append("watcher", &json!({ "count": 1 })).await.unwrap();
        store.append("watcher", &json!({ "count": 2 })).await.unwrap();
        store.append("other", &json!({ "count": 9 })).await.unwrap();

        let latest = store.latest("watcher").await.unwrap().unwrap();
        assert_eq!(latest.result, r#"{"count":2}"#);

        let history = store.history("watcher", 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].result, r#"{"count":2}"#);
        assert_eq!(history[1].result, r#"{"count":1}"#);
        assert!(history[0].created_at >= history[1].created_at);
    }

    #[tokio::test]
    async fn memory_store_appends_and_reads_back() {
        exercise_store(&MemoryResultStore::new()).await;
    }

    #[tokio::test]
    async fn sqlite_store_appends_and_reads_back() {
        exercise_store(&sqlite_store().await).await;
    }
}
