//! Task state mutators.
//!
//! [`TaskUpdater`] is the only writer of the task registry. Each mutation is
//! written first and then announced on the [`EventBus`] as a
//! [`TaskEvent::StatusChanged`] carrying the status and progress as written, so
//! subscribers observe one task's updates in the order its worker issued them.

use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use super::repository::TaskRepository;
use super::{Result, Task, TaskError, TaskStatus, TaskType};
use crate::events::{EventBus, LogLevel, TaskEvent};

/// Writes task state and publishes the resulting events.
#[derive(Clone)]
pub struct TaskUpdater {
    repo: Arc<dyn TaskRepository>,
    events: EventBus,
}

impl std::fmt::Debug for TaskUpdater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskUpdater")
            .field("subscribers", &self.events.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl TaskUpdater {
    /// Creates an updater over a repository and an event bus.
    #[must_use]
    pub fn new(repo: Arc<dyn TaskRepository>, events: EventBus) -> Self {
        Self { repo, events }
    }

    /// The underlying repository, for reads.
    #[must_use]
    pub fn repository(&self) -> &Arc<dyn TaskRepository> {
        &self.repo
    }

    /// The event bus updates are published on.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Fetches a task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotFound`] or [`TaskError::Database`].
    pub async fn get(&self, id: &str) -> Result<Task> {
        self.repo
            .get_task(id)
            .await?
            .ok_or_else(|| TaskError::NotFound(id.to_string()))
    }

    /// Inserts a new `pending` task and announces it.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Database`] if the insert fails.
    #[instrument(skip(self, config))]
    pub async fn create(&self, id: &str, task_type: TaskType, config: &str) -> Result<Task> {
        let task = self.repo.create_task(id, task_type, config).await?;
        info!(task_id = %id, task_type = %task_type, "task created");
        self.publish_status(&task);
        Ok(task)
    }

    /// Sets the status.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotFound`] or [`TaskError::Database`].
    #[instrument(skip(self), fields(status = %status))]
    pub async fn update_status(&self, id: &str, status: TaskStatus) -> Result<Task> {
        let task = self.repo.update_status(id, status).await?;
        info!(task_id = %id, status = %status, "task status updated");
        self.publish_status(&task);
        Ok(task)
    }

    /// Sets progress.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::InvalidProgress`] without writing when `progress`
    /// is outside `0..=100`, otherwise [`TaskError::NotFound`] or
    /// [`TaskError::Database`].
    #[instrument(skip(self))]
    pub async fn update_progress(&self, id: &str, progress: i64) -> Result<Task> {
        if !(0..=100).contains(&progress) {
            return Err(TaskError::InvalidProgress(progress));
        }
        let task = self.repo.update_progress(id, progress).await?;
        debug!(task_id = %id, progress, "task progress updated");
        self.publish_status(&task);
        Ok(task)
    }

    /// Sets the discovered-item counter.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotFound`] or [`TaskError::Database`].
    pub async fn update_images_found(&self, id: &str, count: i64) -> Result<Task> {
        let task = self.repo.update_counters(id, Some(count), None).await?;
        self.publish_status(&task);
        Ok(task)
    }

    /// Sets the materialized-item counter.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotFound`] or [`TaskError::Database`].
    pub async fn update_images_downloaded(&self, id: &str, count: i64) -> Result<Task> {
        let task = self.repo.update_counters(id, None, Some(count)).await?;
        self.publish_status(&task);
        Ok(task)
    }

    /// Stores the result payload.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotFound`] or [`TaskError::Database`].
    pub async fn update_result(&self, id: &str, result: &serde_json::Value) -> Result<Task> {
        let task = self.repo.update_result(id, &result.to_string()).await?;
        self.publish_status(&task);
        Ok(task)
    }

    /// Sets the error text.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotFound`] or [`TaskError::Database`].
    pub async fn update_error(&self, id: &str, message: &str) -> Result<Task> {
        let task = self.repo.update_error(id, message).await?;
        self.publish_status(&task);
        Ok(task)
    }

    /// Resets a terminal task to `pending`; `None` if it was not terminal.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Database`].
    pub async fn reset_for_restart(&self, id: &str) -> Result<Option<Task>> {
        let task = self.repo.reset_for_restart(id).await?;
        if let Some(task) = &task {
            info!(task_id = %id, "task reset for restart");
            self.publish_status(task);
        }
        Ok(task)
    }

    /// Compare-and-set status transition; `None` if the task was not in `from`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Database`].
    pub async fn transition(
        &self,
        id: &str,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<Option<Task>> {
        let task = self.repo.transition_status(id, from, to).await?;
        if let Some(task) = &task {
            info!(task_id = %id, from = %from, to = %to, "task status updated");
            self.publish_status(task);
        }
        Ok(task)
    }

    /// Writes a worker's terminal status while the task is still `running`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Database`].
    pub async fn finish(
        &self,
        id: &str,
        status: TaskStatus,
        error_message: Option<&str>,
    ) -> Result<Option<Task>> {
        let task = self.repo.finish_task(id, status, error_message).await?;
        match &task {
            Some(task) => {
                info!(task_id = %id, status = %status, "task finished");
                self.publish_status(task);
            }
            None => debug!(task_id = %id, status = %status, "task no longer running; terminal write skipped"),
        }
        Ok(task)
    }

    /// Publishes a log line for a task and mirrors it to `tracing`.
    pub fn log(&self, task_id: &str, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Debug => debug!(task_id, "{message}"),
            LogLevel::Info => info!(task_id, "{message}"),
            LogLevel::Warn => warn!(task_id, "{message}"),
            LogLevel::Error => error!(task_id, "{message}"),
        }
        self.events.publish(TaskEvent::Log {
            task_id: task_id.to_string(),
            level,
            message,
        });
    }

    fn publish_status(&self, task: &Task) {
        self.events.publish(TaskEvent::StatusChanged {
            task_id: task.id.clone(),
            status: task.status(),
            progress: task.progress,
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::task::TaskStore;

    async fn updater() -> TaskUpdater {
        let store = TaskStore::new(Database::new_in_memory().await.unwrap());
        TaskUpdater::new(Arc::new(store), EventBus::default())
    }

    #[tokio::test]
    async fn test_progress_out_of_range_rejected_without_write() {
        let updater = updater().await;
        updater
            .repository()
            .create_task("t1", TaskType::Crawl, "{}")
            .await
            .unwrap();
        updater.update_progress("t1", 30).await.unwrap();

        for bad in [-1, 101, 1000] {
            let err = updater.update_progress("t1", bad).await.unwrap_err();
            assert!(matches!(err, TaskError::InvalidProgress(p) if p == bad));
        }
        assert_eq!(updater.get("t1").await.unwrap().progress, 30);
    }

    #[tokio::test]
    async fn test_each_write_publishes_status_event() {
        let updater = updater().await;
        updater
            .repository()
            .create_task("t1", TaskType::Crawl, "{}")
            .await
            .unwrap();
        let mut rx = updater.events().subscribe();

        updater
            .update_status("t1", TaskStatus::Running)
            .await
            .unwrap();
        updater.update_progress("t1", 40).await.unwrap();
        updater.update_images_found("t1", 3).await.unwrap();

        let expected = [
            (TaskStatus::Running, 0),
            (TaskStatus::Running, 40),
            (TaskStatus::Running, 40),
        ];
        for (status, progress) in expected {
            assert_eq!(
                rx.recv().await.unwrap(),
                TaskEvent::StatusChanged {
                    task_id: "t1".into(),
                    status,
                    progress
                }
            );
        }
    }

    #[tokio::test]
    async fn test_skipped_finish_publishes_nothing() {
        let updater = updater().await;
        updater
            .repository()
            .create_task("t1", TaskType::Crawl, "{}")
            .await
            .unwrap();
        let mut rx = updater.events().subscribe();

        let task = updater
            .finish("t1", TaskStatus::Completed, None)
            .await
            .unwrap();
        assert!(task.is_none());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_log_publishes_log_event() {
        let updater = updater().await;
        let mut rx = updater.events().subscribe();
        updater.log("t1", LogLevel::Warn, "page 2 failed");
        assert_eq!(
            rx.recv().await.unwrap(),
            TaskEvent::Log {
                task_id: "t1".into(),
                level: LogLevel::Warn,
                message: "page 2 failed".into()
            }
        );
    }
}
