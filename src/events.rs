//! In-process event bus for task status changes and task log lines.
//!
//! The engine publishes typed [`TaskEvent`]s; any number of subscribers (a push
//! layer, the CLI, tests) receive every event independently. Publishing with
//! no subscribers is a no-op.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::task::TaskStatus;

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// Severity of a task log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        };
        write!(f, "{label}")
    }
}

/// An event emitted by the task engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    /// Emitted after every registry write, carrying the state as written.
    StatusChanged {
        task_id: String,
        status: TaskStatus,
        progress: i64,
    },
    /// A narrative log line for operators; not authoritative state.
    Log {
        task_id: String,
        level: LogLevel,
        message: String,
    },
}

impl TaskEvent {
    /// The task this event concerns.
    #[must_use]
    pub fn task_id(&self) -> &str {
        match self {
            Self::StatusChanged { task_id, .. } | Self::Log { task_id, .. } => task_id,
        }
    }
}

/// Fan-out bus for [`TaskEvent`]s.
///
/// Cheap to clone; clones publish to the same subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<TaskEvent>,
}

impl EventBus {
    /// Creates a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest unconsumed events are dropped and
    /// slow receivers observe `RecvError::Lagged`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all current subscribers.
    pub fn publish(&self, event: TaskEvent) {
        // SendError only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribes to every event published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_subscriber_receives_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(TaskEvent::StatusChanged {
            task_id: "t1".into(),
            status: TaskStatus::Running,
            progress: 10,
        });

        for rx in [&mut rx1, &mut rx2] {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.task_id(), "t1");
            assert!(matches!(
                event,
                TaskEvent::StatusChanged { progress: 10, .. }
            ));
        }
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let bus = EventBus::default();
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(TaskEvent::Log {
            task_id: "t1".into(),
            level: LogLevel::Info,
            message: "nobody listening".into(),
        });
    }

    #[tokio::test]
    async fn test_per_task_order_preserved() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        for progress in [10, 30, 40, 100] {
            bus.publish(TaskEvent::StatusChanged {
                task_id: "t1".into(),
                status: TaskStatus::Running,
                progress,
            });
        }
        let mut seen = Vec::new();
        for _ in 0..4 {
            if let TaskEvent::StatusChanged { progress, .. } = rx.recv().await.unwrap() {
                seen.push(progress);
            }
        }
        assert_eq!(seen, vec![10, 30, 40, 100]);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = TaskEvent::Log {
            task_id: "t1".into(),
            level: LogLevel::Warn,
            message: "page failed".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "log");
        assert_eq!(json["level"], "warn");
    }
}
