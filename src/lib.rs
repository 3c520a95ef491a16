//! Taskhub Core Library
//!
//! Orchestrates long-running crawl and image-generation tasks: a persistent
//! task registry with a lifecycle state machine, a bounded execution engine
//! with cooperative cancellation, and the network adapters those tasks use.
//!
//! # Architecture
//!
//! - [`task`] - Task registry, lifecycle manager, typed configs, cancellation
//! - [`engine`] - Worker pool and the per-type task routines
//! - [`events`] - Status and log event bus
//! - [`download`] - Retrying throttled HTTP client and progress downloader
//! - [`source`] - Catalog adapter for crawl tasks
//! - [`generate`] - Generation backend adapter
//! - [`config`] - Engine settings
//! - [`db`] - Database connection and schema management

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod db;
pub mod download;
pub mod engine;
pub mod events;
pub mod generate;
pub mod source;
pub mod task;
mod user_agent;

// Re-export commonly used types
pub use config::{ConfigError, EngineSettings};
pub use db::Database;
pub use download::{
    ClientConfig, DownloadError, ProgressDownloader, RetryDecision, RetryHttpClient, RetryPolicy,
};
pub use engine::{TaskExecutor, assemble};
pub use events::{EventBus, LogLevel, TaskEvent};
pub use task::{
    CleanupScope, Task, TaskError, TaskFilter, TaskManager, TaskStatus, TaskType,
};
