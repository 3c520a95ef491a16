//! Task registry, lifecycle and configuration.
//!
//! # Overview
//!
//! - [`TaskStore`] - `SQLite`-backed registry of tasks and discovered items
//! - [`TaskRepository`] - data-access seam the manager and engine depend on
//! - [`TaskManager`] - lifecycle operations (create/start/stop/cancel/list/cleanup)
//! - [`TaskUpdater`] - the only writer of task state; publishes an event per write
//! - [`CancellationRegistry`] - per-task cancellation tokens and worker leases
//! - [`TaskConfig`] - typed configuration, one variant per task type
//!
//! State machine:
//!
//! ```text
//! pending --(start)--> running --(success)--> completed
//! running --(failure)--> failed
//! running --(stop/cancel)--> cancelled
//! completed|failed|cancelled --(start)--> pending --(auto)--> running
//! ```

mod cancel;
mod config;
mod error;
mod item;
mod manager;
mod repository;
mod updater;

pub use cancel::{CancellationRegistry, TaskLease};
pub use config::{
    CrawlConfig, CrawlSubkind, CrawlTarget, DEFAULT_CRAWL_LIMIT, GenerateConfig, LoraOverlay,
    TaskConfig,
};
pub use error::{TaskDbErrorKind, TaskError};
pub use item::{
    CleanupScope, CrawledItem, NewCrawledItem, Task, TaskFilter, TaskStatus, TaskType,
};
pub use manager::{TaskManager, TaskRunner};
pub use repository::TaskRepository;
pub use updater::TaskUpdater;

use sqlx::Row;
use tracing::instrument;

use crate::db::Database;

/// Result type for registry and lifecycle operations.
pub type Result<T> = std::result::Result<T, TaskError>;

/// Statuses a finished task can be restarted from.
const RESTARTABLE: [TaskStatus; 3] = [
    TaskStatus::Completed,
    TaskStatus::Failed,
    TaskStatus::Cancelled,
];

/// Turns a `RETURNING *` row into the task or [`TaskError::NotFound`].
fn require(id: &str, task: Option<Task>) -> Result<Task> {
    task.ok_or_else(|| TaskError::NotFound(id.to_string()))
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// `SQLite`-backed task registry.
///
/// Every mutation bumps `updated_at` and returns the row as written, so
/// callers can publish the resulting status and progress without a re-read.
#[derive(Debug, Clone)]
pub struct TaskStore {
    db: Database,
}

impl TaskStore {
    /// Creates a registry over the given database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts a new `pending` task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Database`] if the insert fails.
    #[instrument(skip(self, config), fields(task_id = %id, task_type = %task_type))]
    pub async fn create(&self, id: &str, task_type: TaskType, config: &str) -> Result<Task> {
        let task = sqlx::query_as::<_, Task>(
            r"INSERT INTO tasks (id, task_type, config, status)
              VALUES (?, ?, ?, ?)
              RETURNING *",
        )
        .bind(id)
        .bind(task_type.as_str())
        .bind(config)
        .bind(TaskStatus::Pending.as_str())
        .fetch_one(self.db.pool())
        .await?;

        Ok(task)
    }

    /// Fetches a task by id.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> Result<Option<Task>> {
        let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(task)
    }

    /// Sets the status unconditionally.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotFound`] or [`TaskError::Database`].
    #[instrument(skip(self), fields(status = %status))]
    pub async fn update_status(&self, id: &str, status: TaskStatus) -> Result<Task> {
        let task = sqlx::query_as::<_, Task>(
            r"UPDATE tasks SET status = ?, updated_at = datetime('now')
              WHERE id = ?
              RETURNING *",
        )
        .bind(status.as_str())
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;

        require(id, task)
    }

    /// Moves `from → to` only if the task is currently in `from`.
    ///
    /// Returns `None` when the task is missing or in another status.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Database`] if the update fails.
    #[instrument(skip(self), fields(from = %from, to = %to))]
    pub async fn transition_status(
        &self,
        id: &str,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<Option<Task>> {
        let task = sqlx::query_as::<_, Task>(
            r"UPDATE tasks SET status = ?, updated_at = datetime('now')
              WHERE id = ? AND status = ?
              RETURNING *",
        )
        .bind(to.as_str())
        .bind(id)
        .bind(from.as_str())
        .fetch_optional(self.db.pool())
        .await?;

        Ok(task)
    }

    /// Writes a worker's terminal status, only while the task is `running`.
    ///
    /// A non-empty `error_message` replaces the stored error text.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Database`] if the update fails.
    #[instrument(skip(self, error_message), fields(status = %status))]
    pub async fn finish(
        &self,
        id: &str,
        status: TaskStatus,
        error_message: Option<&str>,
    ) -> Result<Option<Task>> {
        let task = sqlx::query_as::<_, Task>(
            r"UPDATE tasks
              SET status = ?,
                  error_message = COALESCE(?, error_message),
                  updated_at = datetime('now')
              WHERE id = ? AND status = ?
              RETURNING *",
        )
        .bind(status.as_str())
        .bind(error_message)
        .bind(id)
        .bind(TaskStatus::Running.as_str())
        .fetch_optional(self.db.pool())
        .await?;

        Ok(task)
    }

    /// Sets progress. The range is enforced by the caller and by a CHECK constraint.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotFound`] or [`TaskError::Database`].
    #[instrument(skip(self))]
    pub async fn update_progress(&self, id: &str, progress: i64) -> Result<Task> {
        let task = sqlx::query_as::<_, Task>(
            r"UPDATE tasks SET progress = ?, updated_at = datetime('now')
              WHERE id = ?
              RETURNING *",
        )
        .bind(progress)
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;

        require(id, task)
    }

    /// Sets the error text.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotFound`] or [`TaskError::Database`].
    #[instrument(skip(self, message))]
    pub async fn update_error(&self, id: &str, message: &str) -> Result<Task> {
        let task = sqlx::query_as::<_, Task>(
            r"UPDATE tasks SET error_message = ?, updated_at = datetime('now')
              WHERE id = ?
              RETURNING *",
        )
        .bind(message)
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;

        require(id, task)
    }

    /// Stores the JSON result payload.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotFound`] or [`TaskError::Database`].
    #[instrument(skip(self, result))]
    pub async fn update_result(&self, id: &str, result: &str) -> Result<Task> {
        let task = sqlx::query_as::<_, Task>(
            r"UPDATE tasks SET result = ?, updated_at = datetime('now')
              WHERE id = ?
              RETURNING *",
        )
        .bind(result)
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;

        require(id, task)
    }

    /// Sets the discovered and/or materialized counters; `None` leaves a counter unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotFound`] or [`TaskError::Database`].
    #[instrument(skip(self))]
    pub async fn update_counters(
        &self,
        id: &str,
        images_found: Option<i64>,
        images_downloaded: Option<i64>,
    ) -> Result<Task> {
        let task = sqlx::query_as::<_, Task>(
            r"UPDATE tasks
              SET images_found = COALESCE(?, images_found),
                  images_downloaded = COALESCE(?, images_downloaded),
                  updated_at = datetime('now')
              WHERE id = ?
              RETURNING *",
        )
        .bind(images_found)
        .bind(images_downloaded)
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;

        require(id, task)
    }

    /// Resets a finished task to `pending` with cleared error, progress,
    /// counters and result.
    ///
    /// Returns `None` when the task is missing or not in a terminal status.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn reset_for_restart(&self, id: &str) -> Result<Option<Task>> {
        let sql = format!(
            r"UPDATE tasks
              SET status = ?, progress = 0, error_message = '', result = NULL,
                  images_found = 0, images_downloaded = 0, updated_at = datetime('now')
              WHERE id = ? AND status IN ({})
              RETURNING *",
            placeholders(RESTARTABLE.len())
        );
        let mut query = sqlx::query_as::<_, Task>(&sql)
            .bind(TaskStatus::Pending.as_str())
            .bind(id);
        for status in RESTARTABLE {
            query = query.bind(status.as_str());
        }
        let task = query.fetch_optional(self.db.pool()).await?;

        Ok(task)
    }

    /// Lists one page of tasks, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let (limit, offset) = filter.limit_offset();
        let tasks = sqlx::query_as::<_, Task>(
            r"SELECT * FROM tasks
              WHERE (?1 IS NULL OR status = ?1)
                AND (?2 IS NULL OR task_type = ?2)
              ORDER BY created_at DESC, rowid DESC
              LIMIT ?3 OFFSET ?4",
        )
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.task_type.map(|t| t.as_str()))
        .bind(limit)
        .bind(offset)
        .fetch_all(self.db.pool())
        .await?;

        Ok(tasks)
    }

    /// Counts tasks matching the filter's status and type (pagination ignored).
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn count(&self, filter: &TaskFilter) -> Result<i64> {
        let row = sqlx::query(
            r"SELECT COUNT(*) AS count FROM tasks
              WHERE (?1 IS NULL OR status = ?1)
                AND (?2 IS NULL OR task_type = ?2)",
        )
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.task_type.map(|t| t.as_str()))
        .fetch_one(self.db.pool())
        .await?;

        Ok(row.get("count"))
    }

    /// Deletes a task and its discovered items.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotFound`] or [`TaskError::Database`].
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<()> {
        let mut tx = self.db.pool().begin().await?;
        sqlx::query("DELETE FROM crawled_items WHERE task_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(TaskError::NotFound(id.to_string()));
        }
        tx.commit().await?;
        Ok(())
    }

    /// Deletes every task in one of `statuses`, with their discovered items.
    ///
    /// Returns the number of tasks removed.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Database`] if the delete fails.
    #[instrument(skip(self), fields(statuses = ?statuses))]
    pub async fn cleanup_by_status(&self, statuses: &[TaskStatus]) -> Result<u64> {
        if statuses.is_empty() {
            return Ok(0);
        }
        let marks = placeholders(statuses.len());
        let items_sql = format!(
            "DELETE FROM crawled_items WHERE task_id IN (SELECT id FROM tasks WHERE status IN ({marks}))"
        );
        let tasks_sql = format!("DELETE FROM tasks WHERE status IN ({marks})");

        let mut tx = self.db.pool().begin().await?;
        let mut items_query = sqlx::query(&items_sql);
        for status in statuses {
            items_query = items_query.bind(status.as_str());
        }
        items_query.execute(&mut *tx).await?;

        let mut tasks_query = sqlx::query(&tasks_sql);
        for status in statuses {
            tasks_query = tasks_query.bind(status.as_str());
        }
        let removed = tasks_query.execute(&mut *tx).await?.rows_affected();
        tx.commit().await?;

        Ok(removed)
    }

    /// Records a discovered item for a task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Database`] if the insert fails (including a
    /// foreign-key violation for an unknown task).
    #[instrument(skip(self, item), fields(task_id = %item.task_id, item_id = %item.item_id))]
    pub async fn add_crawled_item(&self, item: &NewCrawledItem<'_>) -> Result<i64> {
        let tags = serde_json::to_string(item.tags).unwrap_or_else(|_| "[]".to_string());
        let page_urls = serde_json::to_string(item.page_urls).unwrap_or_else(|_| "[]".to_string());
        let row = sqlx::query(
            r"INSERT INTO crawled_items (task_id, item_id, title, tags, page_urls)
              VALUES (?, ?, ?, ?, ?)
              RETURNING id",
        )
        .bind(item.task_id)
        .bind(item.item_id)
        .bind(item.title)
        .bind(tags)
        .bind(page_urls)
        .fetch_one(self.db.pool())
        .await?;

        Ok(row.get("id"))
    }

    /// Lists a task's discovered items in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn list_crawled_items(&self, task_id: &str) -> Result<Vec<CrawledItem>> {
        let items = sqlx::query_as::<_, CrawledItem>(
            "SELECT * FROM crawled_items WHERE task_id = ? ORDER BY id ASC",
        )
        .bind(task_id)
        .fetch_all(self.db.pool())
        .await?;
        Ok(items)
    }

    /// Counts a task's discovered items.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn count_crawled_items(&self, task_id: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM crawled_items WHERE task_id = ?")
            .bind(task_id)
            .fetch_one(self.db.pool())
            .await?;
        Ok(row.get("count"))
    }

    /// Deletes a task's discovered items, returning how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Database`] if the delete fails.
    #[instrument(skip(self))]
    pub async fn delete_crawled_items(&self, task_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM crawled_items WHERE task_id = ?")
            .bind(task_id)
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected())
    }
}
