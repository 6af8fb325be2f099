//! Per-acquire context with cancellation support

use std::collections::HashMap;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Context for a single acquire call.
///
/// Carries the caller's cancellation token, an optional override of the
/// pool's acquire timeout, and arbitrary labels. The same context is handed
/// to [`Manage::create`](crate::Manage::create) so factories can abort early
/// or make label-aware decisions.
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// Cooperative cancellation token. Cancelling it aborts a waiting
    /// acquire with [`Error::Cancelled`](crate::Error::Cancelled).
    pub cancellation: CancellationToken,
    /// Overrides [`PoolConfig::acquire_timeout`](crate::PoolConfig::acquire_timeout)
    /// for this call when set.
    pub timeout: Option<Duration>,
    /// Arbitrary key-value pairs passed through to the factory
    /// (e.g. caller name, priority hints).
    pub labels: HashMap<String, String>,
}

impl Context {
    /// Create an empty context with a fresh cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the default cancellation token with the provided one.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Override the pool's acquire timeout for this call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Add a key-value label to the context.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}
