//! Event broadcasting for pool lifecycle observability.
//!
//! Provides [`PoolEvent`] variants emitted by a pool and an [`EventBus`]
//! backed by `tokio::sync::broadcast`.

use std::time::Duration;

use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// PoolEvent
// ---------------------------------------------------------------------------

/// Events emitted during pool operations.
///
/// All variants carry the `pool_id` of the emitting pool. Subscribers
/// receive cloned copies via [`EventBus::subscribe`].
#[derive(Debug, Clone)]
pub enum PoolEvent {
    /// The factory produced a new resource.
    Created {
        /// The pool identifier.
        pool_id: String,
    },
    /// A resource was handed to a caller.
    Acquired {
        /// The pool identifier.
        pool_id: String,
        /// The lease identifier.
        lease_id: u64,
        /// How long the caller waited.
        wait: Duration,
    },
    /// A resource came back from a caller.
    Released {
        /// The pool identifier.
        pool_id: String,
        /// The lease identifier.
        lease_id: u64,
        /// How long the caller held the resource.
        held: Duration,
    },
    /// A resource was torn down.
    Destroyed {
        /// The pool identifier.
        pool_id: String,
        /// Why the resource was removed.
        reason: DestroyReason,
    },
    /// An acquire gave up after waiting the full timeout.
    Exhausted {
        /// The pool identifier.
        pool_id: String,
        /// Callers still queued when the wait gave up.
        waiters: usize,
    },
    /// Teardown reported an error. The resource is gone either way.
    TeardownFailed {
        /// The pool identifier.
        pool_id: String,
        /// Human-readable error description.
        error: String,
    },
    /// The pool reached the `Closed` state.
    Closed {
        /// The pool identifier.
        pool_id: String,
    },
}

// ---------------------------------------------------------------------------
// DestroyReason
// ---------------------------------------------------------------------------

/// Reason a resource was permanently removed from the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyReason {
    /// The resource sat idle longer than `max_idle_time`.
    IdleTimeout,
    /// Validation failed when handing it out.
    FailedAcquireValidation,
    /// Validation failed when it was returned.
    FailedReleaseValidation,
    /// The acquire or release working on it was dropped mid-step.
    Cancelled,
    /// The pool is shutting down.
    Shutdown,
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Broadcast-based event bus for pool lifecycle events.
///
/// Emission is fire-and-forget: if no subscribers are listening or the
/// channel is full, events are dropped (no backpressure on the pool).
pub struct EventBus {
    sender: broadcast::Sender<PoolEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffer size.
    ///
    /// The buffer size determines how many events can be queued before
    /// slow subscribers start lagging (and losing events).
    #[must_use]
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    pub fn emit(&self, event: PoolEvent) {
        // No active receivers is not an error.
        let _ = self.sender.send(event);
    }

    /// Subscribe to events emitted after this call.
    ///
    /// A subscriber that falls behind by more than `buffer_size` events
    /// receives `Lagged` and skips to the latest.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.sender.receiver_count())
            .finish()
    }
}
