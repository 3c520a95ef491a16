//! Error types for task registry and lifecycle operations.

use std::fmt;

use thiserror::Error;

use super::item::TaskStatus;

/// Structured classification for registry/database failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskDbErrorKind {
    /// `SQLite` returned busy/locked under concurrent access.
    BusyOrLocked,
    /// Constraint failure (unique/foreign-key/check/not-null).
    ConstraintViolation,
    /// Connection pool timed out waiting for a free connection.
    PoolTimeout,
    /// Connection pool is closed.
    PoolClosed,
    /// Stored row could not be decoded.
    Decode,
    /// Filesystem or transport IO failure.
    Io,
    /// Unclassified database failure.
    Other,
}

impl TaskDbErrorKind {
    #[must_use]
    pub fn from_sqlx(error: &sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut => Self::PoolTimeout,
            sqlx::Error::PoolClosed => Self::PoolClosed,
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => Self::Decode,
            sqlx::Error::Io(_) => Self::Io,
            sqlx::Error::Database(database_error) => {
                classify_database_error(database_error.as_ref())
            }
            _ => Self::Other,
        }
    }
}

impl fmt::Display for TaskDbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::BusyOrLocked => "busy_or_locked",
            Self::ConstraintViolation => "constraint_violation",
            Self::PoolTimeout => "pool_timeout",
            Self::PoolClosed => "pool_closed",
            Self::Decode => "decode",
            Self::Io => "io",
            Self::Other => "other",
        };
        write!(f, "{label}")
    }
}

fn classify_database_error(
    database_error: &(dyn sqlx::error::DatabaseError + 'static),
) -> TaskDbErrorKind {
    let code = database_error.code();
    if matches!(
        code.as_deref(),
        Some("SQLITE_BUSY" | "SQLITE_LOCKED" | "5" | "6")
    ) {
        return TaskDbErrorKind::BusyOrLocked;
    }

    if database_error.is_unique_violation()
        || database_error.is_foreign_key_violation()
        || database_error.is_check_violation()
        || code
            .as_deref()
            .is_some_and(|value| value.starts_with("SQLITE_CONSTRAINT"))
    {
        return TaskDbErrorKind::ConstraintViolation;
    }

    let message = database_error.message().to_ascii_lowercase();
    if message.contains("database is locked") || message.contains("database is busy") {
        return TaskDbErrorKind::BusyOrLocked;
    }

    TaskDbErrorKind::Other
}

/// Errors returned by the task registry and lifecycle manager.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// No task with this id.
    #[error("task not found: {0}")]
    NotFound(String),

    /// Start was requested for a task that is already running.
    #[error("task {0} is already running")]
    AlreadyRunning(String),

    /// Stop was requested for a task that is not running.
    #[error("task {id} is not running (status: {status})")]
    NotRunning {
        /// Task id.
        id: String,
        /// Status observed when the request was made.
        status: TaskStatus,
    },

    /// Cancel was requested for a task that already completed.
    #[error("task {0} has already completed")]
    AlreadyTerminal(String),

    /// Unknown task type.
    #[error("invalid task type '{0}': expected one of crawl, generate, train, tag, classify")]
    InvalidType(String),

    /// Configuration payload is not well-formed for the task type.
    #[error("invalid {task_type} config: {reason}")]
    InvalidConfig {
        /// Task type the config was validated against.
        task_type: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Progress outside `0..=100`.
    #[error("invalid progress {0}: must be between 0 and 100")]
    InvalidProgress(i64),

    /// Database operation failed.
    #[error("database error ({kind}): {message}")]
    Database {
        /// Typed classification of the failure.
        kind: TaskDbErrorKind,
        /// Human-readable database error text.
        message: String,
    },
}

impl From<sqlx::Error> for TaskError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            kind: TaskDbErrorKind::from_sqlx(&err),
            message: err.to_string(),
        }
    }
}

impl TaskError {
    /// Creates an `InvalidConfig` error.
    pub fn invalid_config(task_type: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::InvalidConfig {
            task_type: task_type.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns the typed database error kind, when this is a database error.
    #[must_use]
    pub fn database_kind(&self) -> Option<TaskDbErrorKind> {
        match self {
            Self::Database { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Returns true when this error is a database busy/locked condition.
    #[must_use]
    pub fn is_busy_or_locked(&self) -> bool {
        self.database_kind() == Some(TaskDbErrorKind::BusyOrLocked)
    }
}
