//! Plain-text rendering of tasks for the terminal.

use taskhub_core::task::{CrawledItem, Task, TaskStatus};

const ID_WIDTH: usize = 36;

/// One-line header row for [`task_row`].
pub fn task_header() -> String {
    format!(
        "{:<ID_WIDTH$}  {:<8}  {:<9}  {:>4}  {:>11}  {}",
        "ID", "TYPE", "STATUS", "PROG", "FOUND/SAVED", "CREATED"
    )
}

/// One-line summary of a task.
pub fn task_row(task: &Task) -> String {
    format!(
        "{:<ID_WIDTH$}  {:<8}  {:<9}  {:>3}%  {:>11}  {}",
        task.id,
        task.task_type_str,
        task.status(),
        task.progress,
        format!("{}/{}", task.images_found, task.images_downloaded),
        task.created_at
    )
}

/// Final report printed after following a task.
pub fn print_task_summary(task: &Task) {
    match task.status() {
        TaskStatus::Completed => println!(
            "Task {} completed: {}/{} saved",
            task.id, task.images_downloaded, task.images_found
        ),
        TaskStatus::Failed => println!("Task {} failed: {}", task.id, task.error_message),
        status => println!("Task {} {status} at {}%", task.id, task.progress),
    }
}

/// Multi-line detail view of a task and its discovered items.
pub fn task_detail(task: &Task, items: &[CrawledItem]) -> String {
    let mut lines = vec![
        format!("id:         {}", task.id),
        format!("type:       {}", task.task_type_str),
        format!("status:     {}", task.status()),
        format!("progress:   {}%", task.progress),
        format!("found:      {}", task.images_found),
        format!("downloaded: {}", task.images_downloaded),
        format!("created:    {}", task.created_at),
        format!("updated:    {}", task.updated_at),
        format!("config:     {}", task.config),
    ];
    if !task.error_message.is_empty() {
        lines.push(format!("error:      {}", task.error_message));
    }
    if let Some(result) = task.result_json() {
        lines.push(format!("result:     {result}"));
    }
    if !items.is_empty() {
        lines.push(format!("items ({}):", items.len()));
        for item in items {
            lines.push(format!(
                "  {}  {}  [{}]  {} page(s)",
                item.item_id,
                item.title,
                item.tag_list().join(", "),
                item.page_url_list().len()
            ));
        }
    }
    lines.join("\n")
}
