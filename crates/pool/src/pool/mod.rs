//! Resource pool: bounded acquire/release over a [`Manage`] implementation.
//!
//! Every mutation of the idle / in-use / creating / validating sets happens
//! under one `parking_lot` mutex. Construction, validation and teardown run
//! outside it. A fair `tokio` semaphore with `max_size` permits orders
//! waiters FIFO: a permit is held by every in-use, in-creation or validating
//! resource, while idle resources hold none. New resources are only created
//! when no idle one is available, so `idle + held permits <= max_size`.

pub mod config;

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{Notify, Semaphore, broadcast};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::context::Context;
use crate::error::{BoxError, Error, Result, ValidationFailed};
use crate::events::{DestroyReason, EventBus, PoolEvent};
use crate::lease::Lease;
use crate::manage::Manage;

pub use config::{PoolConfig, Strategy};

// ---------------------------------------------------------------------------
// Public state / introspection types
// ---------------------------------------------------------------------------

/// Lifecycle of the pool as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Accepting acquires.
    Open,
    /// Shutdown started; waiting for checked-out resources to come back.
    Draining,
    /// Every resource has been torn down.
    Closed,
}

/// Point-in-time view of the pool's sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    /// Lifecycle state.
    pub state: PoolState,
    /// Configured ceiling.
    pub max_size: usize,
    /// Resources available for acquisition.
    pub idle: usize,
    /// Resources checked out by callers.
    pub in_use: usize,
    /// Resources being constructed.
    pub creating: usize,
    /// Resources held back while a health check runs.
    pub validating: usize,
    /// Callers queued for a slot.
    pub waiting: usize,
}

/// Cumulative pool counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Total successful acquisitions.
    pub total_acquisitions: u64,
    /// Total releases (explicit or on drop).
    pub total_releases: u64,
    /// Total resources ever created.
    pub created: u64,
    /// Total resources ever torn down.
    pub destroyed: u64,
    /// Acquires that gave up after the full timeout.
    pub timeouts: u64,
    /// Teardowns that reported an error.
    pub teardown_failures: u64,
}

// ---------------------------------------------------------------------------
// Pool internals
// ---------------------------------------------------------------------------

/// An idle resource and the moment it became idle.
struct Entry<T> {
    resource: T,
    idle_since: Instant,
}

impl<T> Entry<T> {
    fn new(resource: T) -> Self {
        Self {
            resource,
            idle_since: Instant::now(),
        }
    }
}

/// Everything guarded by the pool mutex.
struct State<T> {
    lifecycle: PoolState,
    idle: VecDeque<Entry<T>>,
    in_use: HashSet<u64>,
    creating: usize,
    validating: usize,
    stats: PoolStats,
}

impl<T> State<T> {
    fn new(max_size: usize) -> Self {
        Self {
            lifecycle: PoolState::Open,
            idle: VecDeque::with_capacity(max_size),
            in_use: HashSet::with_capacity(max_size),
            creating: 0,
            validating: 0,
            stats: PoolStats::default(),
        }
    }

    fn is_open(&self) -> bool {
        self.lifecycle == PoolState::Open
    }

    /// Resources that hold a permit.
    fn outstanding(&self) -> usize {
        self.in_use.len() + self.creating + self.validating
    }

    fn accounted(&self) -> usize {
        self.idle.len() + self.outstanding()
    }

    // Idle entries are always pushed at the back, so the front is the
    // longest-idle one.
    fn push_idle(&mut self, resource: T) {
        self.idle.push_back(Entry::new(resource));
    }

    fn pop_idle(&mut self, strategy: Strategy) -> Option<Entry<T>> {
        match strategy {
            Strategy::Fifo => self.idle.pop_front(),
            Strategy::Lifo => self.idle.pop_back(),
        }
    }
}

enum Candidate<T> {
    Ready(T, u64),
    Validate(T),
    Create,
}

enum Returned<T> {
    Idle,
    Validate(T),
    Discard(T),
}

/// Counts a caller queued on the semaphore for as long as it is alive.
struct Queued<'a>(&'a AtomicUsize);

impl<'a> Queued<'a> {
    fn enter(waiting: &'a AtomicUsize) -> Self {
        waiting.fetch_add(1, Ordering::Relaxed);
        Self(waiting)
    }
}

impl Drop for Queued<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// The bookkeeping entry an [`InFlight`] step holds open.
#[derive(Debug, Clone, Copy)]
enum Phase {
    Creating,
    Validating,
    /// A returned lease whose resource is torn down before it leaves
    /// `in_use`.
    Returning(u64),
}

impl Phase {
    fn leave<T>(self, state: &mut State<T>) {
        match self {
            Self::Creating => state.creating -= 1,
            Self::Validating => state.validating -= 1,
            Self::Returning(lease_id) => {
                state.in_use.remove(&lease_id);
            }
        }
    }
}

/// Work started under the state lock that finishes after an `.await`.
///
/// Holds the phase's count, and the resource once there is one, until the
/// work completes. If the owning future is dropped first, the resource is
/// torn down on a detached task and the count is given back.
struct InFlight<M: Manage> {
    inner: Arc<PoolInner<M>>,
    phase: Option<Phase>,
    resource: Option<M::Resource>,
    /// Set for returned leases: their permit comes back once the step ends.
    returns_permit: bool,
}

impl<M: Manage> InFlight<M> {
    fn new(inner: &Arc<PoolInner<M>>, phase: Phase, resource: Option<M::Resource>) -> Self {
        Self {
            inner: Arc::clone(inner),
            phase: Some(phase),
            resource,
            returns_permit: false,
        }
    }

    /// A released resource awaiting its health check.
    fn returned(inner: &Arc<PoolInner<M>>, resource: M::Resource) -> Self {
        let mut step = Self::new(inner, Phase::Validating, Some(resource));
        step.returns_permit = true;
        step
    }

    fn hold(&mut self, resource: M::Resource) {
        self.resource = Some(resource);
    }

    async fn validate(&mut self) -> bool {
        match self.resource.as_mut() {
            Some(resource) => self.inner.manager.validate(resource).await,
            None => false,
        }
    }

    /// Leave the phase under the caller's lock and take the resource out.
    fn complete(&mut self, state: &mut State<M::Resource>) -> Option<M::Resource> {
        if let Some(phase) = self.phase.take() {
            phase.leave(state);
        }
        self.resource.take()
    }

    /// Tear the resource down, then give the count back.
    async fn discard(mut self, reason: DestroyReason) {
        if let Some(resource) = self.resource.take() {
            self.inner.destroy(resource, reason).await;
        }
        if let Some(phase) = self.phase.take() {
            self.inner.settle(|state| phase.leave(state));
        }
    }

    /// Make a checked resource idle, or destroy it if it failed.
    async fn restore(mut self) {
        let healthy = self.validate().await;
        let inner = Arc::clone(&self.inner);
        let reason = {
            let mut state = inner.state.lock();
            if healthy && state.is_open() {
                if let Some(resource) = self.complete(&mut state) {
                    state.push_idle(resource);
                }
                return;
            }
            if state.is_open() {
                DestroyReason::FailedReleaseValidation
            } else {
                DestroyReason::Shutdown
            }
        };
        self.discard(reason).await;
    }
}

impl<M: Manage> Drop for InFlight<M> {
    fn drop(&mut self) {
        let phase = self.phase.take();
        let returns_permit = self.returns_permit;
        match self.resource.take() {
            Some(resource) => {
                tracing::debug!(pool_id = %self.inner.id, ?phase, "Pool step cancelled; tearing resource down");
                let inner = Arc::clone(&self.inner);
                self.inner.run_detached(async move {
                    inner.destroy(resource, DestroyReason::Cancelled).await;
                    if let Some(phase) = phase {
                        inner.settle(|state| phase.leave(state));
                    }
                    if returns_permit {
                        inner.semaphore.add_permits(1);
                    }
                });
            }
            None => {
                if let Some(phase) = phase {
                    self.inner.settle(|state| phase.leave(state));
                }
                // A destroyed resource gets replaced by whoever acquires next.
                if returns_permit {
                    self.inner.semaphore.add_permits(1);
                }
            }
        }
    }
}

/// Inner shared state for the pool.
pub(crate) struct PoolInner<M: Manage> {
    id: String,
    manager: M,
    config: PoolConfig,
    state: Mutex<State<M::Resource>>,
    /// Fair semaphore bounding idle + in-use + in-creation resources.
    semaphore: Semaphore,
    next_lease: AtomicU64,
    waiting: AtomicUsize,
    drained: Notify,
    events: Arc<EventBus>,
    reaper: CancellationToken,
    /// Runtime the pool was built on; runs cleanup started outside one.
    runtime: Option<Handle>,
}

impl<M: Manage> PoolInner<M> {
    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    /// Move a resource into the in-use set, returning its lease id.
    fn check_out(&self, state: &mut State<M::Resource>) -> u64 {
        let lease_id = self.next_lease.fetch_add(1, Ordering::Relaxed);
        state.in_use.insert(lease_id);
        state.stats.total_acquisitions += 1;
        lease_id
    }

    /// Apply a bookkeeping update and complete a pending drain.
    fn settle(&self, update: impl FnOnce(&mut State<M::Resource>)) {
        let closed_now = {
            let mut state = self.state.lock();
            update(&mut state);
            if state.lifecycle == PoolState::Draining && state.outstanding() == 0 {
                state.lifecycle = PoolState::Closed;
                true
            } else {
                false
            }
        };
        if closed_now {
            tracing::info!(pool_id = %self.id, "Pool closed");
            self.events.emit(PoolEvent::Closed {
                pool_id: self.id.clone(),
            });
            self.drained.notify_waiters();
        }
    }

    /// Run work that must finish even though nobody awaits it.
    ///
    /// Spawned on the current runtime, else on the runtime the pool was
    /// built on. Only a pool built outside any runtime runs it inline.
    fn run_detached(&self, task: impl Future<Output = ()> + Send + 'static) {
        match Handle::try_current().ok().or_else(|| self.runtime.clone()) {
            Some(handle) => drop(handle.spawn(task)),
            None => futures::executor::block_on(task),
        }
    }

    /// Tear a resource down. Failures are reported, never propagated.
    async fn destroy(&self, resource: M::Resource, reason: DestroyReason) {
        let outcome = self.manager.teardown(resource).await.map_err(Into::<BoxError>::into);
        {
            let mut state = self.state.lock();
            state.stats.destroyed += 1;
            if outcome.is_err() {
                state.stats.teardown_failures += 1;
            }
        }
        match outcome {
            Ok(()) => tracing::debug!(pool_id = %self.id, ?reason, "Destroyed resource"),
            Err(err) => {
                tracing::warn!(pool_id = %self.id, ?reason, error = %err, "Resource teardown failed");
                self.events.emit(PoolEvent::TeardownFailed {
                    pool_id: self.id.clone(),
                    error: err.to_string(),
                });
            }
        }
        self.events.emit(PoolEvent::Destroyed {
            pool_id: self.id.clone(),
            reason,
        });
    }

    /// Destroy a batch on a task of its own; it finishes even if the caller
    /// is dropped.
    async fn destroy_all(self: &Arc<Self>, resources: Vec<M::Resource>, reason: DestroyReason) {
        if resources.is_empty() {
            return;
        }
        let inner = Arc::clone(self);
        let teardown = tokio::spawn(async move {
            for resource in resources {
                inner.destroy(resource, reason).await;
            }
        });
        if let Err(err) = teardown.await {
            tracing::warn!(pool_id = %self.id, error = %err, "Teardown task failed");
        }
    }

    fn exhausted(&self, waited: Duration) -> Error {
        let in_use = {
            let mut state = self.state.lock();
            state.stats.timeouts += 1;
            state.in_use.len()
        };
        // The caller giving up is still counted in `waiting`.
        let waiters = self.waiting.load(Ordering::Relaxed).saturating_sub(1);
        tracing::debug!(pool_id = %self.id, in_use, waiters, ?waited, "Pool exhausted");
        self.events.emit(PoolEvent::Exhausted {
            pool_id: self.id.clone(),
            waiters,
        });
        Error::PoolExhausted {
            pool_id: self.id.clone(),
            in_use,
            max_size: self.config.max_size,
            waited,
        }
    }

    /// Take a returned resource back.
    pub(crate) async fn check_in(
        self: &Arc<Self>,
        resource: M::Resource,
        lease_id: u64,
        held: Duration,
    ) -> Result<()> {
        let returned = {
            let mut state = self.state.lock();
            if !state.in_use.contains(&lease_id) {
                return Err(Error::InvalidRelease {
                    pool_id: self.id.clone(),
                    lease_id,
                });
            }
            state.stats.total_releases += 1;
            if !state.is_open() {
                // Stays in `in_use` until the teardown finishes so the drain
                // keeps waiting for it.
                Returned::Discard(resource)
            } else {
                state.in_use.remove(&lease_id);
                if self.config.validate_on_release {
                    state.validating += 1;
                    Returned::Validate(resource)
                } else {
                    state.push_idle(resource);
                    Returned::Idle
                }
            }
        };

        self.events.emit(PoolEvent::Released {
            pool_id: self.id.clone(),
            lease_id,
            held,
        });

        match returned {
            Returned::Idle => {
                tracing::trace!(pool_id = %self.id, lease_id, "Returned resource to idle");
                self.semaphore.add_permits(1);
            }
            Returned::Discard(resource) => {
                InFlight::new(self, Phase::Returning(lease_id), Some(resource))
                    .discard(DestroyReason::Shutdown)
                    .await;
            }
            Returned::Validate(resource) => {
                let check = InFlight::returned(self, resource);
                if self.config.validate_in_background
                    && let Ok(handle) = Handle::try_current()
                {
                    drop(handle.spawn(check.restore()));
                } else {
                    check.restore().await;
                }
            }
        }
        Ok(())
    }

    /// Return path for a lease dropped without an explicit release.
    pub(crate) fn return_dropped(self: &Arc<Self>, resource: M::Resource, lease_id: u64, held: Duration) {
        let inner = Arc::clone(self);
        self.run_detached(async move {
            if let Err(err) = inner.check_in(resource, lease_id, held).await {
                tracing::warn!(error = %err, "Dropped lease could not be returned");
            }
        });
    }

    /// Destroy resources idle longer than `max_idle_time`, keeping at least
    /// `min_size` idle, then top the pool back up to `min_size`.
    async fn reap(self: &Arc<Self>) -> usize {
        let expired: Vec<M::Resource> = {
            let mut state = self.state.lock();
            if !state.is_open() {
                return 0;
            }
            let mut evictable = state.idle.len().saturating_sub(self.config.min_size);
            let mut expired = Vec::new();
            while evictable > 0
                && state
                    .idle
                    .front()
                    .is_some_and(|entry| entry.idle_since.elapsed() > self.config.max_idle_time)
            {
                if let Some(entry) = state.idle.pop_front() {
                    expired.push(entry.resource);
                }
                evictable -= 1;
            }
            expired
        };

        let evicted = expired.len();
        self.destroy_all(expired, DestroyReason::IdleTimeout).await;
        if evicted > 0 {
            tracing::debug!(pool_id = %self.id, evicted, "Reaped idle resources");
        }

        if let Err(err) = self.replenish().await {
            tracing::warn!(pool_id = %self.id, error = %err, "Failed to replenish pool to min_size");
        }
        evicted
    }

    /// Create idle resources until `min_size` are accounted for.
    async fn replenish(self: &Arc<Self>) -> Result<()> {
        let ctx = Context::new();
        loop {
            // The permit keeps the in-flight creation inside `max_size`.
            let permit = {
                let mut state = self.state.lock();
                if !state.is_open() || state.accounted() >= self.config.min_size {
                    return Ok(());
                }
                let Ok(permit) = self.semaphore.try_acquire() else {
                    return Ok(());
                };
                state.creating += 1;
                permit
            };
            let mut creating = InFlight::new(self, Phase::Creating, None);

            let resource = match self.manager.create(&ctx).await {
                Ok(resource) => resource,
                Err(err) => {
                    drop(creating);
                    return Err(Error::creation(&self.id, 1, err.into()));
                }
            };
            self.events.emit(PoolEvent::Created {
                pool_id: self.id.clone(),
            });
            creating.hold(resource);

            let pooled = {
                let mut state = self.state.lock();
                state.stats.created += 1;
                if state.is_open() {
                    if let Some(resource) = creating.complete(&mut state) {
                        state.push_idle(resource);
                    }
                    true
                } else {
                    false
                }
            };
            if !pooled {
                creating.discard(DestroyReason::Shutdown).await;
                return Ok(());
            }
            drop(permit);
        }
    }
}

impl<M: Manage> Drop for PoolInner<M> {
    fn drop(&mut self) {
        self.reaper.cancel();
    }
}

fn spawn_reaper<M: Manage>(inner: &Arc<PoolInner<M>>, every: Duration) {
    let pool = Arc::downgrade(inner);
    let cancel = inner.reaper.clone();
    drop(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let Some(inner) = pool.upgrade() else { break };
            inner.reap().await;
        }
    }));
}

// ---------------------------------------------------------------------------
// Pool<M>
// ---------------------------------------------------------------------------

/// Concurrent, bounded resource pool.
///
/// Cheap to clone; clones share the same resources.
pub struct Pool<M: Manage> {
    inner: Arc<PoolInner<M>>,
}

impl<M: Manage> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: Manage> std::fmt::Debug for Pool<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("pool_id", &self.inner.id)
            .field("status", &self.status())
            .finish()
    }
}

/// Builder returned by [`Pool::builder`].
pub struct PoolBuilder<M: Manage> {
    manager: M,
    config: PoolConfig,
    id: Option<String>,
    events: Option<Arc<EventBus>>,
}

impl<M: Manage> PoolBuilder<M> {
    /// Use the given configuration instead of [`PoolConfig::default`].
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Name the pool. Defaults to a random UUID.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Emit lifecycle events on a shared bus.
    pub fn events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Validate the configuration, create `min_size` idle resources and
    /// start the reaper.
    ///
    /// # Errors
    /// [`Error::Configuration`] for an invalid config,
    /// [`Error::ResourceCreation`] if warm-up fails (anything already
    /// created is torn down).
    pub async fn build(self) -> Result<Pool<M>> {
        self.config.validate()?;
        let max_size = self.config.max_size;
        let pool = Pool {
            inner: Arc::new(PoolInner {
                id: self.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                manager: self.manager,
                state: Mutex::new(State::new(max_size)),
                semaphore: Semaphore::new(max_size),
                next_lease: AtomicU64::new(1),
                waiting: AtomicUsize::new(0),
                drained: Notify::new(),
                events: self.events.unwrap_or_default(),
                reaper: CancellationToken::new(),
                runtime: Handle::try_current().ok(),
                config: self.config,
            }),
        };

        if let Err(err) = pool.inner.replenish().await {
            pool.shutdown().await;
            return Err(err);
        }
        if let Some(every) = pool.inner.config.reap_interval {
            spawn_reaper(&pool.inner, every);
        }

        tracing::debug!(
            pool_id = %pool.inner.id,
            min_size = pool.inner.config.min_size,
            max_size,
            "Pool ready"
        );
        Ok(pool)
    }
}

impl<M: Manage> Pool<M> {
    /// Start building a pool around `manager`.
    pub fn builder(manager: M) -> PoolBuilder<M> {
        PoolBuilder {
            manager,
            config: PoolConfig::default(),
            id: None,
            events: None,
        }
    }

    /// Acquire a resource.
    ///
    /// Serves an idle resource when one exists, otherwise creates one if the
    /// pool is below `max_size`, otherwise waits (FIFO) for a release.
    ///
    /// # Errors
    /// - [`Error::PoolExhausted`] when nothing frees up within the timeout
    /// - [`Error::Cancelled`] when `ctx.cancellation` fires
    /// - [`Error::PoolClosed`] after shutdown
    /// - [`Error::ResourceCreation`] once `max_acquire_attempts` creations
    ///   or validations have failed
    pub async fn acquire(&self, ctx: &Context) -> Result<Lease<M>> {
        let inner = &self.inner;
        let started = Instant::now();
        if !inner.state.lock().is_open() {
            return Err(Error::closed(&inner.id));
        }

        let timeout = ctx.timeout.unwrap_or(inner.config.acquire_timeout);
        let permit = {
            let _queued = Queued::enter(&inner.waiting);
            tokio::select! {
                biased;
                () = ctx.cancellation.cancelled() => {
                    return Err(Error::Cancelled { pool_id: inner.id.clone() });
                }
                waited = tokio::time::timeout(timeout, inner.semaphore.acquire()) => match waited {
                    Ok(Ok(permit)) => permit,
                    // The semaphore is closed by shutdown.
                    Ok(Err(_)) => return Err(Error::closed(&inner.id)),
                    Err(_) => return Err(inner.exhausted(started.elapsed())),
                },
            }
        };

        let max_attempts = inner.config.max_acquire_attempts;
        let mut attempts = 0;
        let (resource, lease_id) = loop {
            let candidate = {
                let mut state = inner.state.lock();
                if !state.is_open() {
                    return Err(Error::closed(&inner.id));
                }
                match state.pop_idle(inner.config.strategy) {
                    Some(entry) if inner.config.validate_on_acquire => {
                        state.validating += 1;
                        Candidate::Validate(entry.resource)
                    }
                    Some(entry) => {
                        let lease_id = inner.check_out(&mut state);
                        Candidate::Ready(entry.resource, lease_id)
                    }
                    None => {
                        state.creating += 1;
                        Candidate::Create
                    }
                }
            };

            match candidate {
                Candidate::Ready(resource, lease_id) => break (resource, lease_id),
                Candidate::Validate(resource) => {
                    let mut check = InFlight::new(inner, Phase::Validating, Some(resource));
                    let healthy = check.validate().await;
                    let ready = {
                        let mut state = inner.state.lock();
                        if healthy && state.is_open() {
                            check
                                .complete(&mut state)
                                .map(|resource| (resource, inner.check_out(&mut state)))
                        } else {
                            None
                        }
                    };
                    if let Some(ready) = ready {
                        break ready;
                    }
                    if healthy {
                        check.discard(DestroyReason::Shutdown).await;
                        return Err(Error::closed(&inner.id));
                    }
                    check.discard(DestroyReason::FailedAcquireValidation).await;
                    attempts += 1;
                    tracing::debug!(pool_id = %inner.id, attempts, "Idle resource failed validation");
                    if attempts >= max_attempts {
                        return Err(Error::creation(&inner.id, attempts, Box::new(ValidationFailed)));
                    }
                }
                Candidate::Create => {
                    let mut creating = InFlight::new(inner, Phase::Creating, None);
                    let created = tokio::select! {
                        biased;
                        () = ctx.cancellation.cancelled() => None,
                        created = inner.manager.create(ctx) => Some(created),
                    };
                    match created {
                        None => {
                            drop(creating);
                            return Err(Error::Cancelled { pool_id: inner.id.clone() });
                        }
                        Some(Ok(resource)) => {
                            inner.events.emit(PoolEvent::Created {
                                pool_id: inner.id.clone(),
                            });
                            creating.hold(resource);
                            let ready = {
                                let mut state = inner.state.lock();
                                state.stats.created += 1;
                                if state.is_open() {
                                    creating
                                        .complete(&mut state)
                                        .map(|resource| (resource, inner.check_out(&mut state)))
                                } else {
                                    None
                                }
                            };
                            if let Some(ready) = ready {
                                break ready;
                            }
                            creating.discard(DestroyReason::Shutdown).await;
                            return Err(Error::closed(&inner.id));
                        }
                        Some(Err(err)) => {
                            drop(creating);
                            attempts += 1;
                            let err: BoxError = err.into();
                            tracing::warn!(pool_id = %inner.id, attempts, error = %err, "Resource creation failed");
                            if attempts >= max_attempts {
                                return Err(Error::creation(&inner.id, attempts, err));
                            }
                        }
                    }
                }
            }
        };

        // The permit now belongs to the lease; release hands it back.
        permit.forget();

        let wait = started.elapsed();
        tracing::debug!(pool_id = %inner.id, lease_id, ?wait, "Acquired resource");
        inner.events.emit(PoolEvent::Acquired {
            pool_id: inner.id.clone(),
            lease_id,
            wait,
        });
        Ok(Lease::new(resource, lease_id, Arc::clone(inner)))
    }

    /// Return a leased resource to the pool.
    ///
    /// Dropping a lease does the same on a background task; call this to
    /// observe errors and to have the resource back in the idle set (or
    /// destroyed) by the time it returns.
    ///
    /// # Errors
    /// [`Error::InvalidRelease`] when the lease was not handed out by this
    /// pool. The lease then goes back to the pool that did hand it out.
    pub async fn release(&self, lease: Lease<M>) -> Result<()> {
        if !lease.belongs_to(&self.inner) {
            tracing::warn!(
                pool_id = %self.inner.id,
                lease_id = lease.id(),
                owner = lease.pool_id(),
                "Rejected release of a foreign lease"
            );
            return Err(Error::InvalidRelease {
                pool_id: self.inner.id.clone(),
                lease_id: lease.id(),
            });
        }
        let Some((resource, lease_id, held)) = lease.disarm() else {
            return Ok(());
        };
        self.inner.check_in(resource, lease_id, held).await
    }

    /// Run one reaper sweep now. Returns the number of evicted resources.
    pub async fn reap(&self) -> usize {
        self.inner.reap().await
    }

    /// Shut the pool down.
    ///
    /// Rejects new and queued acquires with [`Error::PoolClosed`], destroys
    /// idle resources, then waits for checked-out resources to come back
    /// (bounded by `drain_timeout`), tearing each down on return. Calling it
    /// again, or concurrently, only waits for the same drain.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        let idle: Vec<Entry<M::Resource>> = {
            let mut state = inner.state.lock();
            match state.lifecycle {
                PoolState::Closed => return,
                PoolState::Draining => Vec::new(),
                PoolState::Open => {
                    state.lifecycle = PoolState::Draining;
                    state.idle.drain(..).collect()
                }
            }
        };
        inner.semaphore.close();
        inner.reaper.cancel();
        tracing::info!(pool_id = %inner.id, idle = idle.len(), "Shutting down pool");

        inner
            .destroy_all(idle.into_iter().map(|entry| entry.resource).collect(), DestroyReason::Shutdown)
            .await;
        inner.settle(|_| {});

        let drained = async {
            loop {
                let notified = inner.drained.notified();
                if inner.state.lock().lifecycle == PoolState::Closed {
                    break;
                }
                notified.await;
            }
        };
        match inner.config.drain_timeout {
            Some(limit) => {
                if tokio::time::timeout(limit, drained).await.is_err() {
                    tracing::warn!(
                        pool_id = %inner.id,
                        outstanding = inner.state.lock().outstanding(),
                        "Drain timed out; remaining resources are torn down when returned"
                    );
                }
            }
            None => drained.await,
        }
    }

    /// The pool's identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        self.inner.id()
    }

    /// The configuration the pool was built with.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// The manager backing this pool.
    #[must_use]
    pub fn manager(&self) -> &M {
        &self.inner.manager
    }

    /// Subscribe to this pool's lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.inner.events.subscribe()
    }

    /// Number of idle resources.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    /// Number of checked-out resources.
    #[must_use]
    pub fn in_use_count(&self) -> usize {
        self.inner.state.lock().in_use.len()
    }

    /// Number of resources being constructed.
    #[must_use]
    pub fn creating_count(&self) -> usize {
        self.inner.state.lock().creating
    }

    /// `true` once shutdown has started; acquires are rejected from then on.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        !self.inner.state.lock().is_open()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PoolState {
        self.inner.state.lock().lifecycle
    }

    /// Snapshot of all sets.
    #[must_use]
    pub fn status(&self) -> Status {
        let state = self.inner.state.lock();
        Status {
            state: state.lifecycle,
            max_size: self.inner.config.max_size,
            idle: state.idle.len(),
            in_use: state.in_use.len(),
            creating: state.creating,
            validating: state.validating,
            waiting: self.inner.waiting.load(Ordering::Relaxed),
        }
    }

    /// Cumulative counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.inner.state.lock().stats.clone()
    }
}
