//! Error types for pool operations
use std::time::Duration;

use thiserror::Error;

/// Boxed error produced by a resource factory or teardown function.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for pool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for pool construction and acquire/release operations
#[derive(Error, Debug)]
pub enum Error {
    /// Pool configuration or construction parameters are invalid
    #[error("Configuration error: {message}")]
    Configuration {
        /// The error message
        message: String,
    },

    /// The factory failed (or validation kept failing) after every attempt
    #[error("Failed to create resource for pool {pool_id} after {attempts} attempt(s): {source}")]
    ResourceCreation {
        /// The pool that attempted the creation
        pool_id: String,
        /// Number of attempts made before giving up
        attempts: u32,
        /// The last underlying failure
        #[source]
        source: BoxError,
    },

    /// No resource became available within the acquire timeout
    #[error("Pool {pool_id} exhausted: {in_use}/{max_size} in use after waiting {waited:?}")]
    PoolExhausted {
        /// The pool identifier
        pool_id: String,
        /// Resources checked out when the wait gave up
        in_use: usize,
        /// Maximum pool size
        max_size: usize,
        /// How long the caller waited
        waited: Duration,
    },

    /// The released lease is not tracked as in-use by this pool
    #[error("Invalid release on pool {pool_id}: lease {lease_id} is not in use here")]
    InvalidRelease {
        /// The pool the lease was released to
        pool_id: String,
        /// The offending lease
        lease_id: u64,
    },

    /// The pool has been shut down
    #[error("Pool {pool_id} is closed")]
    PoolClosed {
        /// The pool identifier
        pool_id: String,
    },

    /// The caller's cancellation token fired while waiting
    #[error("Acquire on pool {pool_id} was cancelled")]
    Cancelled {
        /// The pool identifier
        pool_id: String,
    },
}

impl Error {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub(crate) fn creation(pool_id: &str, attempts: u32, source: BoxError) -> Self {
        Self::ResourceCreation {
            pool_id: pool_id.to_string(),
            attempts,
            source,
        }
    }

    pub(crate) fn closed(pool_id: &str) -> Self {
        Self::PoolClosed {
            pool_id: pool_id.to_string(),
        }
    }

    /// Check if the caller may reasonably retry the operation
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PoolExhausted { .. } | Self::Cancelled { .. })
    }

    /// Get the pool ID associated with this error (if any)
    #[must_use]
    pub fn pool_id(&self) -> Option<&str> {
        match self {
            Self::Configuration { .. } => None,
            Self::ResourceCreation { pool_id, .. }
            | Self::PoolExhausted { pool_id, .. }
            | Self::InvalidRelease { pool_id, .. }
            | Self::PoolClosed { pool_id }
            | Self::Cancelled { pool_id } => Some(pool_id),
        }
    }
}

/// Validation failure surfaced as the source of a `ResourceCreation` error
/// when every acquire attempt produced an unhealthy resource.
#[derive(Error, Debug)]
#[error("resource failed validation")]
pub(crate) struct ValidationFailed;
