//! Task lifecycle manager: the public create/get/start/stop/cancel/list/cleanup
//! surface.
//!
//! The manager enforces the state machine, owns the cancellation registry and
//! hands started tasks to a [`TaskRunner`] (the execution engine in production).

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::cancel::{CancellationRegistry, TaskLease};
use super::config::TaskConfig;
use super::updater::TaskUpdater;
use super::{CleanupScope, CrawledItem, Result, Task, TaskError, TaskFilter, TaskStatus, TaskType};
use crate::events::{EventBus, TaskEvent};

/// How many times `cancel_task` retries its compare-and-set against a racing worker.
const CANCEL_CAS_ATTEMPTS: usize = 3;

/// Spawns the worker for a task that has just entered `running`.
pub trait TaskRunner: Send + Sync {
    /// Starts one independent worker for `task`, which owns `lease`.
    fn spawn(&self, task: Task, lease: TaskLease);
}

/// Lifecycle operations over the task registry.
///
/// Cheap to clone; clones share the registry, the event bus and the runner.
#[derive(Clone)]
pub struct TaskManager {
    updater: TaskUpdater,
    registry: CancellationRegistry,
    runner: Arc<dyn TaskRunner>,
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("updater", &self.updater)
            .field("active", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl TaskManager {
    /// Creates a manager.
    #[must_use]
    pub fn new(
        updater: TaskUpdater,
        registry: CancellationRegistry,
        runner: Arc<dyn TaskRunner>,
    ) -> Self {
        Self {
            updater,
            registry,
            runner,
        }
    }

    /// The state mutators shared with the engine.
    #[must_use]
    pub fn updater(&self) -> &TaskUpdater {
        &self.updater
    }

    /// The cancellation registry shared with the engine.
    #[must_use]
    pub fn registry(&self) -> &CancellationRegistry {
        &self.registry
    }

    /// The event bus status changes and log lines are published on.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        self.updater.events()
    }

    /// Validates and persists a new task, then tries to start it.
    ///
    /// A failure to start is logged and the task is returned as `pending`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::InvalidType`], [`TaskError::InvalidConfig`] or
    /// [`TaskError::Database`].
    #[instrument(skip(self, config))]
    pub async fn create_task(&self, task_type: &str, config: &str) -> Result<Task> {
        let task_type: TaskType = task_type
            .parse()
            .map_err(|_| TaskError::InvalidType(task_type.to_string()))?;
        TaskConfig::parse(task_type, config)?;

        let id = Uuid::new_v4().to_string();
        let created = self.updater.create(&id, task_type, config).await?;

        match self.start_task(&id).await {
            Ok(task) => Ok(task),
            Err(error) => {
                warn!(task_id = %id, error = %error, "task created but not started");
                Ok(created)
            }
        }
    }

    /// Fetches a task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotFound`] or [`TaskError::Database`].
    pub async fn get_task(&self, id: &str) -> Result<Task> {
        self.updater.get(id).await
    }

    /// Starts (or restarts) a task.
    ///
    /// A finished task is first reset to `pending` with cleared error, progress,
    /// counters and result. The task then becomes `running` and a worker is
    /// spawned with a fresh cancellation token.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotFound`], [`TaskError::AlreadyRunning`] or
    /// [`TaskError::Database`].
    #[instrument(skip(self))]
    pub async fn start_task(&self, id: &str) -> Result<Task> {
        let task = self.updater.get(id).await?;
        let status = task.status();
        if status == TaskStatus::Running {
            return Err(TaskError::AlreadyRunning(id.to_string()));
        }
        if status.is_terminal() {
            self.updater.reset_for_restart(id).await?;
        }

        let Some(lease) = self.registry.register(id) else {
            return Err(TaskError::AlreadyRunning(id.to_string()));
        };

        match self
            .updater
            .transition(id, TaskStatus::Pending, TaskStatus::Running)
            .await
        {
            Ok(Some(task)) => {
                info!(task_id = %id, task_type = %task.task_type_str, "task started");
                self.runner.spawn(task.clone(), lease);
                Ok(task)
            }
            Ok(None) => {
                self.registry.release(&lease);
                let current = self.updater.get(id).await?;
                match current.status() {
                    TaskStatus::Running => Err(TaskError::AlreadyRunning(id.to_string())),
                    status => Err(TaskError::NotRunning {
                        id: id.to_string(),
                        status,
                    }),
                }
            }
            Err(error) => {
                self.registry.release(&lease);
                Err(error)
            }
        }
    }

    /// Requests cancellation of a running task and marks it `cancelled`.
    ///
    /// The worker observes the request at its next cancellation check.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotFound`], [`TaskError::NotRunning`] or
    /// [`TaskError::Database`].
    #[instrument(skip(self))]
    pub async fn stop_task(&self, id: &str) -> Result<Task> {
        let task = self.updater.get(id).await?;
        if task.status() != TaskStatus::Running {
            return Err(TaskError::NotRunning {
                id: id.to_string(),
                status: task.status(),
            });
        }

        self.registry.cancel(id).await;
        match self
            .updater
            .transition(id, TaskStatus::Running, TaskStatus::Cancelled)
            .await?
        {
            Some(task) => Ok(task),
            None => {
                let current = self.updater.get(id).await?;
                Err(TaskError::NotRunning {
                    id: id.to_string(),
                    status: current.status(),
                })
            }
        }
    }

    /// Cancels a task in any status except `completed`.
    ///
    /// Cancelling an already cancelled task is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotFound`], [`TaskError::AlreadyTerminal`] or
    /// [`TaskError::Database`].
    #[instrument(skip(self))]
    pub async fn cancel_task(&self, id: &str) -> Result<Task> {
        for _ in 0..CANCEL_CAS_ATTEMPTS {
            let task = self.updater.get(id).await?;
            match task.status() {
                TaskStatus::Completed => return Err(TaskError::AlreadyTerminal(id.to_string())),
                TaskStatus::Cancelled => {
                    self.registry.cancel(id).await;
                    return Ok(task);
                }
                status => {
                    self.registry.cancel(id).await;
                    if let Some(task) = self
                        .updater
                        .transition(id, status, TaskStatus::Cancelled)
                        .await?
                    {
                        return Ok(task);
                    }
                }
            }
        }
        // Lost every race against the worker; report where the task ended up.
        let task = self.updater.get(id).await?;
        match task.status() {
            TaskStatus::Completed => Err(TaskError::AlreadyTerminal(id.to_string())),
            _ => Ok(task),
        }
    }

    /// Lists one page of tasks and the total matching count.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Database`].
    pub async fn list_tasks(&self, filter: &TaskFilter) -> Result<(Vec<Task>, i64)> {
        let repo = self.updater.repository();
        let items = repo.list_tasks(filter).await?;
        let total = repo.count_tasks(filter).await?;
        Ok((items, total))
    }

    /// Deletes one task that is not running, with its discovered items.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotFound`], [`TaskError::AlreadyRunning`] (stop
    /// the task first) or [`TaskError::Database`].
    #[instrument(skip(self))]
    pub async fn delete_task(&self, id: &str) -> Result<()> {
        let task = self.updater.get(id).await?;
        if task.status() == TaskStatus::Running || self.registry.is_registered(id) {
            return Err(TaskError::AlreadyRunning(id.to_string()));
        }
        self.updater.repository().delete_task(id).await?;
        info!(task_id = %id, "task deleted");
        Ok(())
    }

    /// Removes finished tasks in `scope` and their discovered items.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Database`].
    #[instrument(skip(self))]
    pub async fn cleanup_tasks(&self, scope: CleanupScope) -> Result<u64> {
        let removed = self
            .updater
            .repository()
            .cleanup_by_status(scope.statuses())
            .await?;
        info!(removed, scope = ?scope, "tasks cleaned up");
        Ok(removed)
    }

    /// Discovered items recorded for a task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Database`].
    pub async fn crawled_items(&self, task_id: &str) -> Result<Vec<CrawledItem>> {
        self.updater.repository().list_crawled_items(task_id).await
    }

    /// Resolves once the task is `completed`, `failed` or `cancelled`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotFound`] or [`TaskError::Database`].
    pub async fn wait_for_terminal(&self, id: &str) -> Result<Task> {
        let mut events = self.events().subscribe();
        let task = self.updater.get(id).await?;
        if task.status().is_terminal() {
            return Ok(task);
        }

        loop {
            match events.recv().await {
                Ok(TaskEvent::StatusChanged {
                    task_id, status, ..
                }) if task_id == id && status.is_terminal() => break,
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(task_id = %id, skipped, "event subscriber lagged; re-reading task");
                    let task = self.updater.get(id).await?;
                    if task.status().is_terminal() {
                        return Ok(task);
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
        self.updater.get(id).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::db::Database;
    use crate::task::TaskStore;

    /// Records spawned leases instead of running anything.
    #[derive(Default)]
    struct RecordingRunner {
        spawned: Mutex<Vec<TaskLease>>,
    }

    impl TaskRunner for RecordingRunner {
        fn spawn(&self, _task: Task, lease: TaskLease) {
            self.spawned.lock().unwrap().push(lease);
        }
    }

    async fn manager() -> (TaskManager, Arc<RecordingRunner>) {
        let store = TaskStore::new(Database::new_in_memory().await.unwrap());
        let updater = TaskUpdater::new(Arc::new(store), EventBus::default());
        let runner = Arc::new(RecordingRunner::default());
        let manager = TaskManager::new(updater, CancellationRegistry::new(), runner.clone());
        (manager, runner)
    }

    const CRAWL: &str = r#"{"subkind":"tag","query":"x","limit":3}"#;

    #[tokio::test]
    async fn test_create_task_auto_starts() {
        let (manager, runner) = manager().await;
        let task = manager.create_task("crawl", CRAWL).await.unwrap();
        assert_eq!(task.status(), TaskStatus::Running);
        assert_eq!(runner.spawned.lock().unwrap().len(), 1);
        assert!(manager.registry().is_registered(&task.id));
    }

    #[tokio::test]
    async fn test_create_task_rejects_invalid_type_and_config() {
        let (manager, runner) = manager().await;
        assert!(matches!(
            manager.create_task("upscale", "{}").await,
            Err(TaskError::InvalidType(_))
        ));
        assert!(matches!(
            manager.create_task("crawl", "{not json").await,
            Err(TaskError::InvalidConfig { .. })
        ));
        assert!(runner.spawned.lock().unwrap().is_empty());
        let (tasks, total) = manager.list_tasks(&TaskFilter::default()).await.unwrap();
        assert!(tasks.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_start_running_task_is_rejected_and_unchanged() {
        let (manager, runner) = manager().await;
        let task = manager.create_task("crawl", CRAWL).await.unwrap();
        manager
            .updater()
            .update_progress(&task.id, 25)
            .await
            .unwrap();

        let err = manager.start_task(&task.id).await.unwrap_err();
        assert!(matches!(err, TaskError::AlreadyRunning(_)));

        let after = manager.get_task(&task.id).await.unwrap();
        assert_eq!(after.status(), TaskStatus::Running);
        assert_eq!(after.progress, 25);
        assert_eq!(runner.spawned.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_restart_failed_task_clears_error_and_progress() {
        let (manager, _runner) = manager().await;
        let task = manager.create_task("crawl", CRAWL).await.unwrap();
        manager.updater().update_progress(&task.id, 30).await.unwrap();
        manager
            .updater()
            .update_images_found(&task.id, 4)
            .await
            .unwrap();
        manager
            .updater()
            .finish(&task.id, TaskStatus::Failed, Some("catalog unreachable"))
            .await
            .unwrap();
        manager.registry().cancel(&task.id).await;

        let restarted = manager.start_task(&task.id).await.unwrap();
        assert_eq!(restarted.status(), TaskStatus::Running);
        assert_eq!(restarted.error_message, "");
        assert_eq!(restarted.progress, 0);
        assert_eq!(restarted.images_found, 0);
    }

    #[tokio::test]
    async fn test_stop_signals_worker_lease() {
        let (manager, runner) = manager().await;
        let task = manager.create_task("crawl", CRAWL).await.unwrap();

        let stopped = manager.stop_task(&task.id).await.unwrap();
        assert_eq!(stopped.status(), TaskStatus::Cancelled);

        let lease = runner.spawned.lock().unwrap()[0].clone();
        assert!(lease.is_cancelled());
        assert!(!manager.registry().release(&lease));
    }

    #[tokio::test]
    async fn test_stop_non_running_task_is_rejected() {
        let (manager, _runner) = manager().await;
        let task = manager.create_task("crawl", CRAWL).await.unwrap();
        manager.stop_task(&task.id).await.unwrap();

        let err = manager.stop_task(&task.id).await.unwrap_err();
        assert!(matches!(
            err,
            TaskError::NotRunning {
                status: TaskStatus::Cancelled,
                ..
            }
        ));
        assert!(matches!(
            manager.stop_task("missing").await,
            Err(TaskError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_rejects_only_completed() {
        let (manager, runner) = manager().await;
        let task = manager.create_task("crawl", CRAWL).await.unwrap();

        let lease = runner.spawned.lock().unwrap()[0].clone();
        assert!(manager.registry().release(&lease));
        manager
            .updater()
            .finish(&task.id, TaskStatus::Completed, None)
            .await
            .unwrap();
        assert!(matches!(
            manager.cancel_task(&task.id).await,
            Err(TaskError::AlreadyTerminal(_))
        ));

        let failed = manager.create_task("crawl", CRAWL).await.unwrap();
        manager.stop_task(&failed.id).await.unwrap();
        manager
            .updater()
            .update_status(&failed.id, TaskStatus::Failed)
            .await
            .unwrap();
        let cancelled = manager.cancel_task(&failed.id).await.unwrap();
        assert_eq!(cancelled.status(), TaskStatus::Cancelled);

        let again = manager.cancel_task(&failed.id).await.unwrap();
        assert_eq!(again.status(), TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_restart_completed_task_goes_through_pending() {
        let (manager, runner) = manager().await;
        let task = manager.create_task("crawl", CRAWL).await.unwrap();
        let lease = runner.spawned.lock().unwrap()[0].clone();
        assert!(manager.registry().release(&lease));
        manager
            .updater()
            .update_result(&task.id, &serde_json::json!({"images_found": 3}))
            .await
            .unwrap();
        manager
            .updater()
            .finish(&task.id, TaskStatus::Completed, None)
            .await
            .unwrap();

        let mut events = manager.events().subscribe();
        let restarted = manager.start_task(&task.id).await.unwrap();
        assert!(restarted.result.is_none());

        let mut statuses = Vec::new();
        while let Ok(TaskEvent::StatusChanged { status, .. }) = events.try_recv() {
            statuses.push(status);
        }
        assert_eq!(statuses, vec![TaskStatus::Pending, TaskStatus::Running]);
    }

    #[tokio::test]
    async fn test_cleanup_all_keeps_active_tasks() {
        let (manager, runner) = manager().await;
        let running = manager.create_task("crawl", CRAWL).await.unwrap();
        let done = manager.create_task("crawl", CRAWL).await.unwrap();
        let lease = runner.spawned.lock().unwrap()[1].clone();
        assert!(manager.registry().release(&lease));
        manager
            .updater()
            .finish(&done.id, TaskStatus::Completed, None)
            .await
            .unwrap();

        assert_eq!(manager.cleanup_tasks(CleanupScope::Failed).await.unwrap(), 0);
        assert_eq!(manager.cleanup_tasks(CleanupScope::All).await.unwrap(), 1);
        assert!(manager.get_task(&running.id).await.is_ok());
        assert!(matches!(
            manager.get_task(&done.id).await,
            Err(TaskError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_wait_for_terminal_resolves_on_finish() {
        let (manager, _runner) = manager().await;
        let task = manager.create_task("crawl", CRAWL).await.unwrap();

        let waiter = {
            let manager = manager.clone();
            let id = task.id.clone();
            tokio::spawn(async move { manager.wait_for_terminal(&id).await })
        };
        tokio::task::yield_now().await;
        manager.stop_task(&task.id).await.unwrap();

        let finished = waiter.await.unwrap().unwrap();
        assert_eq!(finished.status(), TaskStatus::Cancelled);
    }
}
