//! Per-task cancellation tokens and worker ownership leases.
//!
//! Starting a task registers a fresh [`CancellationToken`] under its id and
//! hands the spawned worker a [`TaskLease`]. Stop/cancel signal and remove the
//! entry. A worker writes its terminal status only if [`release`] confirms its
//! lease is still the registered one, so a worker that was stopped (and whose
//! task may since have been restarted) never overwrites newer state.
//!
//! Intermediate writes are covered by the run's write lock: a worker checks
//! its token and writes while holding [`TaskLease::write_guard`], and
//! [`cancel`] takes the same lock after signalling. Once `cancel` returns, the
//! stopped worker has no write in progress and cannot start another.
//!
//! [`release`]: CancellationRegistry::release
//! [`cancel`]: CancellationRegistry::cancel

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Proof that a worker owns the current run of a task.
#[derive(Debug, Clone)]
pub struct TaskLease {
    task_id: String,
    generation: u64,
    token: CancellationToken,
    writes: Arc<Mutex<()>>,
}

impl TaskLease {
    /// Task this lease belongs to.
    #[must_use]
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// True once stop/cancel has been requested for this run.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The cancellation token for this run.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Locks this run's writes; hold it across the cancellation check and
    /// the write it guards.
    pub async fn write_guard(&self) -> MutexGuard<'_, ()> {
        self.writes.lock().await
    }
}

#[derive(Debug)]
struct Registered {
    generation: u64,
    token: CancellationToken,
    writes: Arc<Mutex<()>>,
}

/// Concurrent map from task id to the token of its current run.
///
/// Cheap to clone; clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct CancellationRegistry {
    entries: Arc<DashMap<String, Registered>>,
    next_generation: Arc<AtomicU64>,
}

impl CancellationRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh token for `task_id`.
    ///
    /// Returns `None` if a run is already registered for the task.
    #[must_use]
    pub fn register(&self, task_id: &str) -> Option<TaskLease> {
        match self.entries.entry(task_id.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
                let token = CancellationToken::new();
                let writes = Arc::new(Mutex::new(()));
                slot.insert(Registered {
                    generation,
                    token: token.clone(),
                    writes: Arc::clone(&writes),
                });
                debug!(task_id, generation, "registered cancellation token");
                Some(TaskLease {
                    task_id: task_id.to_string(),
                    generation,
                    token,
                    writes,
                })
            }
        }
    }

    /// Signals and removes the token registered for `task_id`, then waits
    /// for the worker's in-progress write, if any, to finish.
    ///
    /// Returns true if a run was registered.
    pub async fn cancel(&self, task_id: &str) -> bool {
        let Some((_, registered)) = self.entries.remove(task_id) else {
            return false;
        };
        registered.token.cancel();
        debug!(task_id, generation = registered.generation, "cancellation signalled");
        drop(registered.writes.lock().await);
        true
    }

    /// Removes the entry if it still belongs to `lease`.
    ///
    /// Returns true when the lease was current, meaning the caller may write
    /// the task's terminal status.
    pub fn release(&self, lease: &TaskLease) -> bool {
        self.entries
            .remove_if(&lease.task_id, |_, registered| {
                registered.generation == lease.generation
            })
            .is_some()
    }

    /// True when a run is registered for `task_id`.
    #[must_use]
    pub fn is_registered(&self, task_id: &str) -> bool {
        self.entries.contains_key(task_id)
    }

    /// Number of registered runs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
