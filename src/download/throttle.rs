//! Single-slot politeness throttle for outbound requests.
//!
//! The [`RequestGate`] admits one request at a time and sleeps a fixed delay
//! before letting it proceed, so a client never has more than one request in
//! flight against the remote site.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use taskhub_core::download::RequestGate;
//!
//! # async fn example() {
//! let gate = RequestGate::new(Duration::from_millis(500));
//!
//! let permit = gate.acquire().await;
//! // ... send the request while holding the permit
//! drop(permit);
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, instrument, warn};

/// Warning threshold for cumulative throttle delay (30 seconds).
const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Admission gate allowing one in-flight request per client.
///
/// The gate is shared by clones of a client through an `Arc`, so every clone
/// of the same client serializes against the same slot.
#[derive(Debug)]
pub struct RequestGate {
    /// The single in-flight request slot.
    slot: Arc<Mutex<()>>,

    /// Fixed delay applied after admission and before the request is sent.
    delay: Duration,

    /// Total delay applied through this gate (in milliseconds).
    cumulative_delay_ms: AtomicU64,
}

/// Held for the duration of one request; releases the slot on drop.
#[derive(Debug)]
pub struct GatePermit {
    _slot: OwnedMutexGuard<()>,
}

impl RequestGate {
    /// Creates a gate with the given pre-request delay.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            slot: Arc::new(Mutex::new(())),
            delay,
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    /// Returns the fixed pre-request delay.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Waits for the request slot, then applies the fixed delay.
    ///
    /// The returned permit must be held until the response has been received.
    #[instrument(level = "debug", skip(self), fields(delay_ms = self.delay.as_millis()))]
    pub async fn acquire(&self) -> GatePermit {
        let slot = Arc::clone(&self.slot).lock_owned().await;

        if !self.delay.is_zero() {
            let cumulative = self.add_cumulative_delay(self.delay);
            debug!(
                cumulative_ms = cumulative.as_millis(),
                "applying politeness delay"
            );
            if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD
                && cumulative.saturating_sub(self.delay) < CUMULATIVE_DELAY_WARNING_THRESHOLD
            {
                warn!(
                    cumulative_delay_secs = cumulative.as_secs(),
                    "politeness throttle has delayed requests for over 30s"
                );
            }
            tokio::time::sleep(self.delay).await;
        }

        GatePermit { _slot: slot }
    }

    /// Returns true when no request currently holds the slot.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.slot.try_lock().is_ok()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(total)
    }
}
