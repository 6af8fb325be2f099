//! Concurrent stress test for the resource pool.
//!
//! Many tasks doing acquire/release cycles against a small pool must not
//! deadlock, corrupt counters, or hand one resource to two holders.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use reservoir_pool::{Context, Manage, Pool, PoolConfig};
use tokio::task::JoinSet;

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

struct Stress {
    create_count: AtomicU64,
}

impl Manage for Stress {
    type Resource = u64;
    type Error = std::convert::Infallible;

    async fn create(&self, _ctx: &Context) -> Result<u64, Self::Error> {
        let id = self.create_count.fetch_add(1, Ordering::SeqCst);
        // Simulate small creation latency
        tokio::time::sleep(Duration::from_micros(100)).await;
        Ok(id)
    }
}

async fn stress_pool(max_size: usize) -> Pool<Stress> {
    Pool::builder(Stress {
        create_count: AtomicU64::new(0),
    })
    .config(PoolConfig {
        min_size: 0,
        max_size,
        acquire_timeout: Duration::from_secs(10),
        validate_on_release: true,
        reap_interval: None,
        ..Default::default()
    })
    .build()
    .await
    .unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stress_50_tasks_acquire_release() {
    let pool = stress_pool(10).await;
    let holders = Arc::new(Mutex::new(HashSet::new()));
    let mut set = JoinSet::new();

    for _ in 0..50 {
        let pool = pool.clone();
        let holders = Arc::clone(&holders);
        set.spawn(async move {
            for _ in 0..20 {
                let lease = pool.acquire(&Context::new()).await.expect("task should acquire");
                let value = *lease;
                assert!(holders.lock().insert(value), "resource {value} handed out twice");
                tokio::time::sleep(Duration::from_millis(1)).await;
                holders.lock().remove(&value);
                pool.release(lease).await.expect("release should succeed");
            }
        });
    }

    // Safety net against deadlock
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    while let Some(result) = tokio::time::timeout_at(deadline, set.join_next())
        .await
        .expect("stress test should not deadlock (30s timeout)")
    {
        result.expect("task should not panic");
    }

    let stats = pool.stats();
    let status = pool.status();
    assert_eq!(status.in_use, 0, "nothing should be checked out at the end");
    assert_eq!(stats.total_acquisitions, 1000);
    assert_eq!(stats.total_releases, stats.total_acquisitions);
    assert!(stats.created <= 10, "created {} > max_size", stats.created);
    assert!(status.idle <= 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dropped_leases_under_contention_all_come_back() {
    let pool = stress_pool(4).await;
    let mut set = JoinSet::new();

    for _ in 0..16 {
        let pool = pool.clone();
        set.spawn(async move {
            for _ in 0..10 {
                let lease = pool.acquire(&Context::new()).await.expect("task should acquire");
                tokio::task::yield_now().await;
                drop(lease);
            }
        });
    }
    while let Some(result) = set.join_next().await {
        result.expect("task should not panic");
    }

    // Drop-returns run on spawned tasks.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stats = pool.stats();
    assert_eq!(stats.total_acquisitions, 160);
    assert_eq!(stats.total_releases, 160);
    assert_eq!(pool.in_use_count(), 0);
}
