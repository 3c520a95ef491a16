//! Repository seam for task registry persistence.
//!
//! The lifecycle manager and the execution engine depend on this trait rather
//! than on [`TaskStore`] directly.

use async_trait::async_trait;

use super::{
    CrawledItem, NewCrawledItem, Result, Task, TaskFilter, TaskStatus, TaskStore, TaskType,
};

/// Data-access contract for tasks and discovered-item records.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Inserts a new `pending` task.
    async fn create_task(&self, id: &str, task_type: TaskType, config: &str) -> Result<Task>;

    /// Fetches a task, or `None` when absent.
    async fn get_task(&self, id: &str) -> Result<Option<Task>>;

    /// Sets the status unconditionally.
    async fn update_status(&self, id: &str, status: TaskStatus) -> Result<Task>;

    /// Compare-and-set status transition.
    async fn transition_status(
        &self,
        id: &str,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<Option<Task>>;

    /// Writes a terminal status while the task is still `running`.
    async fn finish_task(
        &self,
        id: &str,
        status: TaskStatus,
        error_message: Option<&str>,
    ) -> Result<Option<Task>>;

    /// Sets progress.
    async fn update_progress(&self, id: &str, progress: i64) -> Result<Task>;

    /// Sets error text.
    async fn update_error(&self, id: &str, message: &str) -> Result<Task>;

    /// Stores the result payload.
    async fn update_result(&self, id: &str, result: &str) -> Result<Task>;

    /// Sets found/downloaded counters.
    async fn update_counters(
        &self,
        id: &str,
        images_found: Option<i64>,
        images_downloaded: Option<i64>,
    ) -> Result<Task>;

    /// Resets a terminal task to `pending` with cleared state.
    async fn reset_for_restart(&self, id: &str) -> Result<Option<Task>>;

    /// Lists one page of tasks.
    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>>;

    /// Counts tasks matching a filter.
    async fn count_tasks(&self, filter: &TaskFilter) -> Result<i64>;

    /// Deletes one task.
    async fn delete_task(&self, id: &str) -> Result<()>;

    /// Deletes every task in one of `statuses`.
    async fn cleanup_by_status(&self, statuses: &[TaskStatus]) -> Result<u64>;

    /// Records a discovered item.
    async fn add_crawled_item(&self, item: &NewCrawledItem<'_>) -> Result<i64>;

    /// Lists a task's discovered items.
    async fn list_crawled_items(&self, task_id: &str) -> Result<Vec<CrawledItem>>;

    /// Counts a task's discovered items.
    async fn count_crawled_items(&self, task_id: &str) -> Result<i64>;

    /// Deletes a task's discovered items.
    async fn delete_crawled_items(&self, task_id: &str) -> Result<u64>;
}

#[async_trait]
impl TaskRepository for TaskStore {
    async fn create_task(&self, id: &str, task_type: TaskType, config: &str) -> Result<Task> {
        TaskStore::create(self, id, task_type, config).await
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>> {
        TaskStore::get(self, id).await
    }

    async fn update_status(&self, id: &str, status: TaskStatus) -> Result<Task> {
        TaskStore::update_status(self, id, status).await
    }

    async fn transition_status(
        &self,
        id: &str,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<Option<Task>> {
        TaskStore::transition_status(self, id, from, to).await
    }

    async fn finish_task(
        &self,
        id: &str,
        status: TaskStatus,
        error_message: Option<&str>,
    ) -> Result<Option<Task>> {
        TaskStore::finish(self, id, status, error_message).await
    }

    async fn update_progress(&self, id: &str, progress: i64) -> Result<Task> {
        TaskStore::update_progress(self, id, progress).await
    }

    async fn update_error(&self, id: &str, message: &str) -> Result<Task> {
        TaskStore::update_error(self, id, message).await
    }

    async fn update_result(&self, id: &str, result: &str) -> Result<Task> {
        TaskStore::update_result(self, id, result).await
    }

    async fn update_counters(
        &self,
        id: &str,
        images_found: Option<i64>,
        images_downloaded: Option<i64>,
    ) -> Result<Task> {
        TaskStore::update_counters(self, id, images_found, images_downloaded).await
    }

    async fn reset_for_restart(&self, id: &str) -> Result<Option<Task>> {
        TaskStore::reset_for_restart(self, id).await
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        TaskStore::list(self, filter).await
    }

    async fn count_tasks(&self, filter: &TaskFilter) -> Result<i64> {
        TaskStore::count(self, filter).await
    }

    async fn delete_task(&self, id: &str) -> Result<()> {
        TaskStore::delete(self, id).await
    }

    async fn cleanup_by_status(&self, statuses: &[TaskStatus]) -> Result<u64> {
        TaskStore::cleanup_by_status(self, statuses).await
    }

    async fn add_crawled_item(&self, item: &NewCrawledItem<'_>) -> Result<i64> {
        TaskStore::add_crawled_item(self, item).await
    }

    async fn list_crawled_items(&self, task_id: &str) -> Result<Vec<CrawledItem>> {
        TaskStore::list_crawled_items(self, task_id).await
    }

    async fn count_crawled_items(&self, task_id: &str) -> Result<i64> {
        TaskStore::count_crawled_items(self, task_id).await
    }

    async fn delete_crawled_items(&self, task_id: &str) -> Result<u64> {
        TaskStore::delete_crawled_items(self, task_id).await
    }
}
