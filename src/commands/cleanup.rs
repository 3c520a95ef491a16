//! Cleanup and delete handlers: remove tasks and their item records.

use anyhow::Result;
use taskhub_core::task::{CleanupScope, TaskManager};

use crate::cli::CleanupArg;

pub async fn run_cleanup_command(manager: &TaskManager, scope: CleanupArg) -> Result<()> {
    let scope = match scope {
        CleanupArg::Completed => CleanupScope::Completed,
        CleanupArg::Failed => CleanupScope::Failed,
        CleanupArg::All => CleanupScope::All,
    };
    let removed = manager.cleanup_tasks(scope).await?;
    println!("Removed {removed} task(s).");
    Ok(())
}

pub async fn run_delete_command(manager: &TaskManager, id: &str) -> Result<()> {
    manager.delete_task(id).await?;
    println!("Deleted task {id}.");
    Ok(())
}
