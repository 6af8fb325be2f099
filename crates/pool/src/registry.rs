//! One pool per resource kind, created on first use.
//!
//! A [`Registry`] is an ordinary value: build one during application wiring
//! and pass it (or an `Arc` of it) to whoever needs pools. Each kind is
//! initialised exactly once, even when many tasks ask for it concurrently.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::sync::OnceCell;

use crate::error::{Error, Result};
use crate::events::EventBus;
use crate::manage::Manage;
use crate::pool::{Pool, PoolBuilder};

/// Type-erased view of a `Pool<M>` so pools of different managers can share
/// one map.
trait AnyPool: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn shutdown(&self) -> BoxFuture<'_, ()>;
}

impl<M: Manage> AnyPool for Pool<M> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn shutdown(&self) -> BoxFuture<'_, ()> {
        Box::pin(Pool::shutdown(self))
    }
}

type Slot = Arc<OnceCell<Arc<dyn AnyPool>>>;

/// Lazily-initialised pools keyed by resource kind.
pub struct Registry {
    pools: DashMap<String, Slot>,
    events: Arc<EventBus>,
    closed: AtomicBool,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Create an empty registry with its own event bus.
    #[must_use]
    pub fn new() -> Self {
        Self::with_events(Arc::new(EventBus::default()))
    }

    /// Create an empty registry whose pools all emit on `events`.
    #[must_use]
    pub fn with_events(events: Arc<EventBus>) -> Self {
        Self {
            pools: DashMap::new(),
            events,
            closed: AtomicBool::new(false),
        }
    }

    /// The bus shared by every pool in this registry.
    #[must_use]
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Return the pool for `kind`, building it with `init` on first use.
    ///
    /// The builder's id is set to `kind`. If building fails the slot stays
    /// empty and the next call tries again.
    ///
    /// # Errors
    /// - whatever [`PoolBuilder::build`] returns
    /// - [`Error::Configuration`] if `kind` was registered with another
    ///   manager type
    /// - [`Error::PoolClosed`] after [`Registry::shutdown`], including when
    ///   the shutdown began while this pool was being built (the new pool is
    ///   shut down before returning)
    pub async fn get_or_init<M, F>(&self, kind: &str, init: F) -> Result<Pool<M>>
    where
        M: Manage,
        F: FnOnce() -> PoolBuilder<M>,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::closed(kind));
        }
        // Clone the slot so the map shard lock is not held across the build.
        let slot = Arc::clone(self.pools.entry(kind.to_string()).or_default().value());

        let pool = slot
            .get_or_try_init(|| async {
                let pool = init()
                    .id(kind)
                    .events(Arc::clone(&self.events))
                    .build()
                    .await?;
                tracing::debug!(kind, "Registered pool");
                Ok::<_, Error>(Arc::new(pool) as Arc<dyn AnyPool>)
            })
            .await?;

        // A shutdown that started during the build did not see this pool.
        if self.closed.load(Ordering::SeqCst) {
            pool.shutdown().await;
            self.pools.remove_if(kind, |_, registered| Arc::ptr_eq(registered, &slot));
            return Err(Error::closed(kind));
        }

        pool.as_any()
            .downcast_ref::<Pool<M>>()
            .cloned()
            .ok_or_else(|| {
                Error::configuration(format!(
                    "pool '{kind}' was registered with a different manager type"
                ))
            })
    }

    /// Return the pool for `kind` if it has been initialised with manager `M`.
    #[must_use]
    pub fn get<M: Manage>(&self, kind: &str) -> Option<Pool<M>> {
        let slot = self.pools.get(kind).map(|entry| Arc::clone(entry.value()))?;
        slot.get()?.as_any().downcast_ref::<Pool<M>>().cloned()
    }

    /// Kinds with an initialised pool.
    #[must_use]
    pub fn kinds(&self) -> Vec<String> {
        self.pools
            .iter()
            .filter(|entry| entry.value().initialized())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Shut every pool down and refuse further initialisation.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let pools: Vec<Arc<dyn AnyPool>> = self
            .pools
            .iter()
            .filter_map(|entry| entry.value().get().cloned())
            .collect();

        for pool in pools {
            pool.shutdown().await;
        }
        self.pools.clear();
        tracing::info!("Registry shut down");
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("pool_count", &self.pools.len())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}
