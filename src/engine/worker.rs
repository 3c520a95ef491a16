//! Per-run worker context shared by the task routines.

use std::sync::Arc;

use crate::config::EngineSettings;
use crate::events::LogLevel;
use crate::task::{TaskError, TaskLease, TaskUpdater};

/// Why a routine stopped before completing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Halt {
    /// Cancellation was observed at a boundary.
    Cancelled,
    /// Fatal error; the text becomes the task's `error_message`.
    Failed(String),
}

impl From<TaskError> for Halt {
    fn from(error: TaskError) -> Self {
        Self::Failed(format!("task registry write failed: {error}"))
    }
}

/// Result of one routine step.
pub(crate) type Step<T> = Result<T, Halt>;

/// Everything a routine needs for one task run.
#[derive(Debug, Clone)]
pub(crate) struct WorkerContext {
    pub task_id: String,
    pub lease: TaskLease,
    pub updater: TaskUpdater,
    pub settings: Arc<EngineSettings>,
}

impl WorkerContext {
    /// Cancellation boundary.
    pub fn check_cancelled(&self) -> Step<()> {
        if self.lease.is_cancelled() {
            self.log(LogLevel::Info, "cancellation observed; stopping");
            Err(Halt::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Writes a progress checkpoint unless the run was cancelled.
    ///
    /// Every write below holds the run's write lock across its check, so a
    /// stop that has returned cannot be followed by a write from this run.
    pub async fn progress(&self, progress: i64) -> Step<()> {
        let _guard = self.lease.write_guard().await;
        self.check_cancelled()?;
        self.updater.update_progress(&self.task_id, progress).await?;
        Ok(())
    }

    pub async fn set_found(&self, count: usize) -> Step<()> {
        let _guard = self.lease.write_guard().await;
        self.check_cancelled()?;
        self.updater
            .update_images_found(&self.task_id, to_count(count))
            .await?;
        Ok(())
    }

    pub async fn set_downloaded(&self, count: usize) -> Step<()> {
        let _guard = self.lease.write_guard().await;
        self.check_cancelled()?;
        self.updater
            .update_images_downloaded(&self.task_id, to_count(count))
            .await?;
        Ok(())
    }

    pub async fn set_result(&self, result: &serde_json::Value) -> Step<()> {
        let _guard = self.lease.write_guard().await;
        self.check_cancelled()?;
        self.updater.update_result(&self.task_id, result).await?;
        Ok(())
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.updater.log(&self.task_id, level, message);
    }
}

fn to_count(count: usize) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

/// Proportional progress between `start` and `end` after `done` of `total` steps.
pub(crate) fn scaled_progress(start: i64, end: i64, done: usize, total: usize) -> i64 {
    if total == 0 {
        return end;
    }
    let done = to_count(done.min(total));
    start + (end - start) * done / to_count(total)
}
