//! Phased shutdown: Open -> Draining -> Closed.
//!
//! Verifies:
//! 1. Acquires fail with `PoolClosed` as soon as shutdown starts, including
//!    callers already queued
//! 2. Idle resources are torn down immediately, checked-out ones on return
//! 3. Every resource is torn down exactly once, however many times
//!    shutdown is called

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use reservoir_pool::{Context, Error, Manage, Pool, PoolConfig, PoolEvent, PoolState};
use tokio::task::JoinSet;

// ---------------------------------------------------------------------------
// Test resource that records every teardown
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Tracking {
    next: AtomicU32,
    torn_down: Mutex<HashMap<u32, u32>>,
}

impl Tracking {
    fn created(&self) -> u32 {
        self.next.load(Ordering::SeqCst)
    }

    fn teardowns(&self) -> HashMap<u32, u32> {
        self.torn_down.lock().clone()
    }

    fn assert_each_torn_down_once(&self) {
        let teardowns = self.teardowns();
        assert_eq!(
            teardowns.len() as u32,
            self.created(),
            "every created resource must be torn down: {teardowns:?}"
        );
        assert!(
            teardowns.values().all(|&count| count == 1),
            "a resource was torn down more than once: {teardowns:?}"
        );
    }
}

impl Manage for Tracking {
    type Resource = u32;
    type Error = std::convert::Infallible;

    async fn create(&self, _ctx: &Context) -> Result<u32, Self::Error> {
        Ok(self.next.fetch_add(1, Ordering::SeqCst))
    }

    async fn teardown(&self, resource: u32) -> Result<(), Self::Error> {
        *self.torn_down.lock().entry(resource).or_default() += 1;
        Ok(())
    }
}

fn config(min_size: usize, max_size: usize) -> PoolConfig {
    PoolConfig {
        min_size,
        max_size,
        acquire_timeout: Duration::from_secs(5),
        reap_interval: None,
        ..Default::default()
    }
}

async fn pool(min_size: usize, max_size: usize) -> Pool<Tracking> {
    Pool::builder(Tracking::default())
        .config(config(min_size, max_size))
        .build()
        .await
        .unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_tears_down_every_resource_exactly_once() {
    let pool = pool(2, 4).await;

    let a = pool.acquire(&Context::new()).await.unwrap();
    let b = pool.acquire(&Context::new()).await.unwrap();
    let c = pool.acquire(&Context::new()).await.unwrap();
    pool.release(a).await.unwrap();
    assert_eq!(pool.manager().created(), 3);

    let shutdown = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.shutdown().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(pool.state(), PoolState::Draining);
    assert!(pool.is_closed());
    assert_eq!(pool.idle_count(), 0, "idle resources go first");
    assert_eq!(pool.manager().teardowns().len(), 1);
    assert!(!shutdown.is_finished(), "shutdown waits for checked-out resources");

    pool.release(b).await.unwrap();
    pool.release(c).await.unwrap();
    shutdown.await.unwrap();

    assert_eq!(pool.state(), PoolState::Closed);
    pool.manager().assert_each_torn_down_once();
    assert_eq!(pool.stats().destroyed, 3);
}

#[tokio::test]
async fn acquire_after_shutdown_fails_immediately() {
    let pool = pool(1, 2).await;
    pool.shutdown().await;

    let started = std::time::Instant::now();
    let result = pool.acquire(&Context::new()).await;

    assert!(
        matches!(result, Err(Error::PoolClosed { .. })),
        "expected PoolClosed, got: {result:?}"
    );
    assert!(started.elapsed() < Duration::from_millis(100));
    assert!(!result.unwrap_err().is_retryable());
}

#[tokio::test]
async fn shutdown_is_idempotent() {
    let pool = pool(3, 3).await;

    pool.shutdown().await;
    pool.shutdown().await;

    assert_eq!(pool.state(), PoolState::Closed);
    pool.manager().assert_each_torn_down_once();
    assert_eq!(pool.manager().created(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_shutdown_calls_all_wait_for_the_drain() {
    let pool = pool(0, 2).await;
    let lease = pool.acquire(&Context::new()).await.unwrap();

    let mut callers = JoinSet::new();
    for _ in 0..3 {
        let pool = pool.clone();
        callers.spawn(async move { pool.shutdown().await });
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(callers.len(), 3);
    assert!(callers.try_join_next().is_none(), "no caller returns before the drain");

    pool.release(lease).await.unwrap();
    while let Some(result) = callers.join_next().await {
        result.unwrap();
    }

    assert_eq!(pool.state(), PoolState::Closed);
    pool.manager().assert_each_torn_down_once();
}

#[tokio::test(flavor = "multi_thread")]
async fn queued_acquire_fails_with_pool_closed() {
    let pool = pool(0, 1).await;
    let held = pool.acquire(&Context::new()).await.unwrap();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire(&Context::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(pool.status().waiting, 1);

    let shutdown = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.shutdown().await })
    };

    let result = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("queued acquire should be woken by shutdown")
        .unwrap();
    assert!(matches!(result, Err(Error::PoolClosed { .. })));

    pool.release(held).await.unwrap();
    shutdown.await.unwrap();
    pool.manager().assert_each_torn_down_once();
}

#[tokio::test]
async fn drain_timeout_bounds_shutdown_and_late_returns_are_torn_down() {
    let pool = Pool::builder(Tracking::default())
        .config(PoolConfig {
            drain_timeout: Some(Duration::from_millis(50)),
            ..config(0, 2)
        })
        .build()
        .await
        .unwrap();
    let lease = pool.acquire(&Context::new()).await.unwrap();

    pool.shutdown().await;
    assert_eq!(pool.state(), PoolState::Draining, "lease still outstanding");

    pool.release(lease).await.unwrap();
    assert_eq!(pool.state(), PoolState::Closed);
    pool.manager().assert_each_torn_down_once();
}

#[tokio::test]
async fn lease_dropped_during_drain_completes_shutdown() {
    let pool = pool(0, 1).await;
    let mut events = pool.subscribe();
    let lease = pool.acquire(&Context::new()).await.unwrap();

    let shutdown = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.shutdown().await })
    };
    tokio::task::yield_now().await;
    drop(lease);
    shutdown.await.unwrap();

    assert_eq!(pool.state(), PoolState::Closed);
    pool.manager().assert_each_torn_down_once();

    let closed = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            if let PoolEvent::Closed { pool_id } = events.recv().await.unwrap() {
                break pool_id;
            }
        }
    })
    .await
    .expect("Closed event should be emitted");
    assert_eq!(closed, pool.id());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_under_load_leaks_nothing() {
    let pool = pool(2, 4).await;
    let mut workers = JoinSet::new();

    for _ in 0..16 {
        let pool = pool.clone();
        workers.spawn(async move {
            loop {
                match pool.acquire(&Context::new()).await {
                    Ok(lease) => {
                        tokio::time::sleep(Duration::from_millis(1)).await;
                        pool.release(lease).await.expect("release should succeed");
                    }
                    Err(Error::PoolClosed { .. }) => break,
                    Err(other) => panic!("unexpected acquire error: {other:?}"),
                }
            }
        });
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    pool.shutdown().await;
    while let Some(result) = workers.join_next().await {
        result.expect("worker should not panic");
    }

    assert_eq!(pool.state(), PoolState::Closed);
    let stats = pool.stats();
    assert_eq!(stats.created, stats.destroyed);
    pool.manager().assert_each_torn_down_once();
}
