//! List and show handlers: read-only views of the task registry.

use anyhow::{Context, Result, bail};
use taskhub_core::task::{TaskFilter, TaskManager, TaskStatus, TaskType};

use crate::cli::{ListArgs, StatusArg};
use crate::output::{task_detail, task_header, task_row};

pub async fn run_list_command(manager: &TaskManager, args: &ListArgs) -> Result<()> {
    let task_type = match args.task_type.as_deref() {
        Some(raw) => match raw.parse::<TaskType>() {
            Ok(task_type) => Some(task_type),
            Err(e) => bail!(e),
        },
        None => None,
    };
    let filter = TaskFilter {
        page: args.page,
        page_size: args.page_size,
        status: args.status.map(map_status),
        task_type,
    };

    let (tasks, total) = manager.list_tasks(&filter).await?;
    if tasks.is_empty() {
        println!("No tasks found (total {total}).");
        return Ok(());
    }
    println!("{}", task_header());
    for task in &tasks {
        println!("{}", task_row(task));
    }
    println!(
        "Page {} ({} of {total} task(s))",
        filter.page,
        tasks.len()
    );
    Ok(())
}

pub async fn run_show_command(manager: &TaskManager, id: &str) -> Result<()> {
    let task = manager
        .get_task(id)
        .await
        .with_context(|| format!("cannot show task {id}"))?;
    let items = manager.crawled_items(id).await?;
    println!("{}", task_detail(&task, &items));
    Ok(())
}

pub(crate) fn map_status(status: StatusArg) -> TaskStatus {
    match status {
        StatusArg::Pending => TaskStatus::Pending,
        StatusArg::Running => TaskStatus::Running,
        StatusArg::Completed => TaskStatus::Completed,
        StatusArg::Failed => TaskStatus::Failed,
        StatusArg::Cancelled => TaskStatus::Cancelled,
    }
}
