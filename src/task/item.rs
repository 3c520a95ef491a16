//! Task records, status and type definitions.

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, not yet running.
    Pending,
    /// Owned by a worker.
    Running,
    /// Worker finished successfully.
    Completed,
    /// Worker hit a fatal error.
    Failed,
    /// Stopped or cancelled on request.
    Cancelled,
}

impl TaskStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [Self; 5] = [
        Self::Pending,
        Self::Running,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// True for `completed`, `failed` and `cancelled`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("invalid task status: {s}")),
        }
    }
}

/// Kind of work a task performs; selects the execution routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Query the remote catalog and download the results.
    Crawl,
    /// Drive the image-generation backend.
    Generate,
    /// Model training (no executor yet).
    Train,
    /// Image tagging (no executor yet).
    Tag,
    /// Image classification (no executor yet).
    Classify,
}

impl TaskType {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Crawl => "crawl",
            Self::Generate => "generate",
            Self::Train => "train",
            Self::Tag => "tag",
            Self::Classify => "classify",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "crawl" => Ok(Self::Crawl),
            "generate" => Ok(Self::Generate),
            "train" => Ok(Self::Train),
            "tag" => Ok(Self::Tag),
            "classify" => Ok(Self::Classify),
            _ => Err(format!("invalid task type: {s}")),
        }
    }
}

/// A persisted task.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Task {
    /// Opaque unique identifier.
    pub id: String,
    /// Task type (stored as text, parsed via `task_type()`).
    #[sqlx(rename = "task_type")]
    #[serde(rename = "type")]
    pub task_type_str: String,
    /// JSON configuration as submitted.
    pub config: String,
    /// Current status (stored as text, parsed via `status()`).
    #[sqlx(rename = "status")]
    #[serde(rename = "status")]
    pub status_str: String,
    /// Progress percentage, 0..=100.
    pub progress: i64,
    /// Last fatal error text; empty when none.
    pub error_message: String,
    /// JSON result payload, present once completed.
    pub result: Option<String>,
    /// Items discovered by the query phase.
    pub images_found: i64,
    /// Items fully materialized.
    pub images_downloaded: i64,
    /// When the task was created.
    pub created_at: String,
    /// When any field last changed.
    pub updated_at: String,
}

impl Task {
    /// Returns the parsed status.
    ///
    /// Falls back to `Failed` if the stored string is invalid.
    #[must_use]
    pub fn status(&self) -> TaskStatus {
        self.status_str.parse().unwrap_or(TaskStatus::Failed)
    }

    /// Returns the parsed task type, or `None` for an unknown stored value.
    #[must_use]
    pub fn task_type(&self) -> Option<TaskType> {
        self.task_type_str.parse().ok()
    }

    /// Parses the stored result payload.
    #[must_use]
    pub fn result_json(&self) -> Option<serde_json::Value> {
        self.result
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Task {{ id: {}, type: {}, status: {}, progress: {} }}",
            self.id,
            self.task_type_str,
            self.status(),
            self.progress
        )
    }
}

/// A discovered catalog item recorded for a crawl task.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CrawledItem {
    /// Row id.
    pub id: i64,
    /// Owning task.
    pub task_id: String,
    /// Stable identifier of the item in the remote catalog.
    pub item_id: String,
    /// Item title.
    pub title: String,
    /// JSON array of tags.
    pub tags: String,
    /// JSON array of page URLs.
    pub page_urls: String,
    /// When the record was written.
    pub created_at: String,
}

impl CrawledItem {
    /// Parses the stored tag list; empty on malformed JSON.
    #[must_use]
    pub fn tag_list(&self) -> Vec<String> {
        serde_json::from_str(&self.tags).unwrap_or_default()
    }

    /// Parses the stored page URL list; empty on malformed JSON.
    #[must_use]
    pub fn page_url_list(&self) -> Vec<String> {
        serde_json::from_str(&self.page_urls).unwrap_or_default()
    }
}

/// Input for recording a discovered item.
#[derive(Debug, Clone, Copy)]
pub struct NewCrawledItem<'a> {
    /// Owning task.
    pub task_id: &'a str,
    /// Remote item id.
    pub item_id: &'a str,
    /// Item title.
    pub title: &'a str,
    /// Tags.
    pub tags: &'a [String],
    /// Page URLs.
    pub page_urls: &'a [String],
}

/// Filter and pagination for task listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFilter {
    /// 1-based page number.
    pub page: u32,
    /// Items per page (clamped to `1..=MAX_PAGE_SIZE`).
    pub page_size: u32,
    /// Only tasks with this status.
    pub status: Option<TaskStatus>,
    /// Only tasks of this type.
    pub task_type: Option<TaskType>,
}

impl TaskFilter {
    /// Default page size.
    pub const DEFAULT_PAGE_SIZE: u32 = 20;
    /// Largest accepted page size.
    pub const MAX_PAGE_SIZE: u32 = 100;

    /// Effective `(limit, offset)` for this filter.
    #[must_use]
    pub fn limit_offset(&self) -> (i64, i64) {
        let size = self.page_size.clamp(1, Self::MAX_PAGE_SIZE);
        let page = self.page.max(1);
        (i64::from(size), i64::from(page - 1) * i64::from(size))
    }
}

impl Default for TaskFilter {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: Self::DEFAULT_PAGE_SIZE,
            status: None,
            task_type: None,
        }
    }
}

/// Which tasks bulk cleanup removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupScope {
    /// Only `completed` tasks.
    Completed,
    /// Only `failed` tasks.
    Failed,
    /// Every terminal task (`completed`, `failed`, `cancelled`).
    All,
}

impl CleanupScope {
    /// Statuses removed by this scope.
    #[must_use]
    pub fn statuses(&self) -> &'static [TaskStatus] {
        match self {
            Self::Completed => &[TaskStatus::Completed],
            Self::Failed => &[TaskStatus::Failed],
            Self::All => &[
                TaskStatus::Completed,
                TaskStatus::Failed,
                TaskStatus::Cancelled,
            ],
        }
    }
}

impl std::str::FromStr for CleanupScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "all" => Ok(Self::All),
            _ => Err(format!("invalid cleanup scope: {s}")),
        }
    }
}
