//! RAII lease for checked-out resources

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::manage::Manage;
use crate::pool::PoolInner;

/// Exclusive handle to a resource checked out of a [`Pool`](crate::Pool).
///
/// Dereferences to the resource. Hand it back with
/// [`Pool::release`](crate::Pool::release); a lease that is simply dropped
/// is returned on a background task instead.
///
/// The background return runs on the current `tokio` runtime, or on the
/// runtime the pool was built on when the lease is dropped from a thread
/// outside any runtime. Only a pool built outside a runtime returns the
/// lease inline on the dropping thread; there, a [`Manage::validate`] or
/// [`Manage::teardown`] that needs `tokio` timers or IO panics.
#[must_use = "dropping a lease returns the resource to the pool immediately"]
pub struct Lease<M: Manage> {
    resource: Option<M::Resource>,
    id: u64,
    acquired_at: Instant,
    pool: Arc<PoolInner<M>>,
}

impl<M: Manage> Lease<M> {
    pub(crate) fn new(resource: M::Resource, id: u64, pool: Arc<PoolInner<M>>) -> Self {
        Self {
            resource: Some(resource),
            id,
            acquired_at: Instant::now(),
            pool,
        }
    }

    /// Identifier of this checkout, unique within its pool.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Identifier of the pool that handed this lease out.
    pub fn pool_id(&self) -> &str {
        self.pool.id()
    }

    /// How long the resource has been checked out.
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    pub(crate) fn belongs_to(&self, pool: &Arc<PoolInner<M>>) -> bool {
        Arc::ptr_eq(&self.pool, pool)
    }

    /// Take the resource out without triggering the drop-return.
    pub(crate) fn disarm(mut self) -> Option<(M::Resource, u64, Duration)> {
        let held = self.held_for();
        self.resource.take().map(|resource| (resource, self.id, held))
    }
}

impl<M: Manage> std::ops::Deref for Lease<M> {
    type Target = M::Resource;

    fn deref(&self) -> &M::Resource {
        self.resource.as_ref().expect("lease used after release")
    }
}

impl<M: Manage> std::ops::DerefMut for Lease<M> {
    fn deref_mut(&mut self) -> &mut M::Resource {
        self.resource.as_mut().expect("lease used after release")
    }
}

impl<M: Manage> Drop for Lease<M> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            self.pool.return_dropped(resource, self.id, self.held_for());
        }
    }
}

impl<M: Manage> std::fmt::Debug for Lease<M>
where
    M::Resource: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("id", &self.id)
            .field("pool_id", &self.pool.id())
            .field("resource", &self.resource)
            .finish()
    }
}
