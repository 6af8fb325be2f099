//! # Reservoir Pool
//!
//! A concurrent, bounded pool for expensive-to-create resources.
//!
//! Resources are described by a [`Manage`] implementation (construct,
//! validate, teardown). A [`Pool`] creates them lazily up to `max_size`,
//! queues waiters FIFO when exhausted, health-checks resources on acquire
//! and/or release, evicts stale idle resources in the background, and tears
//! everything down exactly once on shutdown.
//!
//! ```rust,no_run
//! use std::convert::Infallible;
//! use reservoir_pool::{Context, Manage, Pool, PoolConfig};
//!
//! struct Buffers;
//!
//! impl Manage for Buffers {
//!     type Resource = Vec<u8>;
//!     type Error = Infallible;
//!
//!     async fn create(&self, _ctx: &Context) -> Result<Vec<u8>, Infallible> {
//!         Ok(Vec::with_capacity(64 * 1024))
//!     }
//! }
//!
//! # async fn run() -> reservoir_pool::Result<()> {
//! let pool = Pool::builder(Buffers).config(PoolConfig::default()).build().await?;
//! let buffer = pool.acquire(&Context::new()).await?;
//! pool.release(buffer).await?;
//! pool.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod error;
pub mod events;
pub mod lease;
pub mod manage;
pub mod pool;
pub mod registry;

pub use context::Context;
pub use error::{BoxError, Error, Result};
pub use events::{DestroyReason, EventBus, PoolEvent};
pub use lease::Lease;
pub use manage::{FnManager, FnManagerBuilder, Manage};
pub use pool::{Pool, PoolBuilder, PoolConfig, PoolState, PoolStats, Status, Strategy};
pub use registry::Registry;
