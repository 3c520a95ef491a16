//! Follows one task's events until it finishes; Ctrl-C requests a stop.

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use taskhub_core::events::{LogLevel, TaskEvent};
use taskhub_core::task::{Task, TaskManager, TaskStatus};
use tokio::sync::broadcast::{Receiver, error::RecvError};
use tracing::{debug, warn};

/// Progress bar over the task's 0-100 progress; hidden in quiet mode.
fn progress_bar(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{bar:40} {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar
}

pub(crate) async fn follow_task(
    manager: &TaskManager,
    mut events: Receiver<TaskEvent>,
    task: Task,
    quiet: bool,
) -> Result<Task> {
    if task.status() != TaskStatus::Running {
        return Ok(task);
    }
    let id = task.id;
    let bar = progress_bar(quiet);
    bar.set_position(u64::try_from(task.progress).unwrap_or(0));
    bar.set_message(task.task_type_str);
    let mut stop_requested = false;

    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(TaskEvent::Log { task_id, level, message }) if task_id == id => {
                    // Warnings and errors already reach stderr through tracing.
                    if matches!(level, LogLevel::Info) {
                        bar.println(format!("[{level}] {message}"));
                    }
                }
                Ok(TaskEvent::StatusChanged { task_id, status, progress }) if task_id == id => {
                    debug!(%status, progress, "task status");
                    bar.set_position(u64::try_from(progress).unwrap_or(0));
                    if status.is_terminal() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event stream lagged");
                    let current = manager.get_task(&id).await?;
                    bar.set_position(u64::try_from(current.progress).unwrap_or(0));
                    if current.status().is_terminal() {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c(), if !stop_requested => {
                stop_requested = true;
                bar.println(format!("Stopping task {id}..."));
                if let Err(e) = manager.stop_task(&id).await {
                    warn!(error = %e, "stop request failed");
                }
            }
        }
    }

    bar.finish_and_clear();
    Ok(manager.get_task(&id).await?)
}
