//! Execution engine: runs started tasks on a bounded pool of workers.
//!
//! [`TaskExecutor`] is the production [`TaskRunner`]. Each started task gets
//! its own tokio task, which waits for one of `max_concurrent_tasks` permits,
//! parses the task config and dispatches to the routine for its type. The
//! routine observes cancellation only at its checkpoints.
//!
//! Every exit path ends in one terminal write, made only while the worker's
//! [`TaskLease`] is still current and the task is still `running`.
//!
//! # Example
//!
//! ```no_run
//! use taskhub_core::config::EngineSettings;
//! use taskhub_core::db::Database;
//! use taskhub_core::engine;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(std::path::Path::new("taskhub.db")).await?;
//! let manager = engine::assemble(db, EngineSettings::default())?;
//! let task = manager
//!     .create_task("crawl", r#"{"subkind":"tag","query":"landscape","limit":3}"#)
//!     .await?;
//! let finished = manager.wait_for_terminal(&task.id).await?;
//! println!("{} -> {}", finished.id, finished.status());
//! # Ok(())
//! # }
//! ```

mod crawl;
mod generate;
mod worker;

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::{ConfigError, EngineSettings};
use crate::db::Database;
use crate::events::EventBus;
use crate::task::{
    CancellationRegistry, Task, TaskConfig, TaskLease, TaskManager, TaskRunner, TaskStatus,
    TaskStore, TaskUpdater,
};
use worker::{Halt, Step, WorkerContext};

/// Runs started tasks, at most `max_concurrent_tasks` at a time.
#[derive(Debug, Clone)]
pub struct TaskExecutor {
    updater: TaskUpdater,
    registry: CancellationRegistry,
    settings: Arc<EngineSettings>,
    semaphore: Arc<Semaphore>,
}

impl TaskExecutor {
    /// Creates an executor sharing the manager's updater and registry.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if `settings` fail validation.
    pub fn new(
        updater: TaskUpdater,
        registry: CancellationRegistry,
        settings: EngineSettings,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        let semaphore = Arc::new(Semaphore::new(settings.max_concurrent_tasks));
        Ok(Self {
            updater,
            registry,
            settings: Arc::new(settings),
            semaphore,
        })
    }

    /// Settings routines are built from.
    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Worker permits not currently held.
    #[must_use]
    pub fn available_workers(&self) -> usize {
        self.semaphore.available_permits()
    }

    async fn run_worker(self, task: Task, lease: TaskLease) {
        let task_id = task.id.clone();

        // Permit is released when the worker returns.
        let Ok(_permit) = Arc::clone(&self.semaphore).acquire_owned().await else {
            self.conclude(&lease, Err(Halt::Failed("worker pool closed".to_string())))
                .await;
            return;
        };
        debug!(available = self.semaphore.available_permits(), "worker permit acquired");

        let ctx = WorkerContext {
            task_id: task_id.clone(),
            lease: lease.clone(),
            updater: self.updater.clone(),
            settings: Arc::clone(&self.settings),
        };
        let routine = tokio::spawn(
            async move { execute(&ctx, &task).await }.instrument(tracing::Span::current()),
        );
        let outcome = match routine.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => {
                error!(task_id = %task_id, "worker panicked");
                Err(Halt::Failed("worker panicked".to_string()))
            }
            Err(_) => Err(Halt::Failed("worker aborted".to_string())),
        };
        self.conclude(&lease, outcome).await;
    }

    /// Writes the terminal status for this run, if it is still the current one.
    async fn conclude(&self, lease: &TaskLease, outcome: Step<()>) {
        let task_id = lease.task_id();
        if !self.registry.release(lease) {
            debug!(task_id, "run was stopped or superseded; terminal write skipped");
            return;
        }

        let written = match &outcome {
            Ok(()) => {
                self.updater
                    .finish(task_id, TaskStatus::Completed, None)
                    .await
            }
            Err(Halt::Cancelled) => {
                self.updater
                    .finish(task_id, TaskStatus::Cancelled, None)
                    .await
            }
            Err(Halt::Failed(message)) => {
                warn!(task_id, error = %message, "task failed");
                self.updater
                    .finish(task_id, TaskStatus::Failed, Some(message.as_str()))
                    .await
            }
        };
        match written {
            Ok(Some(task)) => info!(task_id, status = %task.status(), "worker finished"),
            Ok(None) => debug!(task_id, "task left running state before worker finished"),
            Err(e) => error!(task_id, error = %e, "failed to write terminal status"),
        }
    }
}

impl TaskRunner for TaskExecutor {
    fn spawn(&self, task: Task, lease: TaskLease) {
        let span = info_span!("task_worker", task_id = %task.id, task_type = %task.task_type_str);
        tokio::spawn(self.clone().run_worker(task, lease).instrument(span));
    }
}

/// Parses the config and runs the routine for the task's type.
async fn execute(ctx: &WorkerContext, task: &Task) -> Step<()> {
    ctx.check_cancelled()?;

    let Some(task_type) = task.task_type() else {
        return Err(Halt::Failed(format!(
            "unknown task type '{}'",
            task.task_type_str
        )));
    };
    let config =
        TaskConfig::parse(task_type, &task.config).map_err(|e| Halt::Failed(e.to_string()))?;

    match config {
        TaskConfig::Crawl(config) => crawl::run(ctx, &config).await,
        TaskConfig::Generate(config) => generate::run(ctx, &config).await,
        TaskConfig::Extension { task_type, .. } => Err(Halt::Failed(format!(
            "no executor registered for task type '{task_type}'"
        ))),
    }
}

/// Wires a store, event bus, cancellation registry and executor into a
/// [`TaskManager`].
///
/// # Errors
///
/// Returns a [`ConfigError`] if `settings` fail validation.
pub fn assemble(db: Database, settings: EngineSettings) -> Result<TaskManager, ConfigError> {
    assemble_with_events(db, settings, EventBus::default())
}

/// Like [`assemble`], publishing on a caller-supplied bus.
///
/// # Errors
///
/// Returns a [`ConfigError`] if `settings` fail validation.
pub fn assemble_with_events(
    db: Database,
    settings: EngineSettings,
    events: EventBus,
) -> Result<TaskManager, ConfigError> {
    let updater = TaskUpdater::new(Arc::new(TaskStore::new(db)), events);
    let registry = CancellationRegistry::new();
    let executor = TaskExecutor::new(updater.clone(), registry.clone(), settings)?;
    Ok(TaskManager::new(updater, registry, Arc::new(executor)))
}
