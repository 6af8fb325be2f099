//! Warm pool example
//!
//! Pre-creates connections, serves concurrent workers, evicts idle
//! connections and shuts down cleanly. Run with `RUST_LOG=debug` to see the
//! pool's own logging.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use reservoir_pool::{Context, Manage, Pool, PoolConfig, PoolEvent};
use tracing_subscriber::EnvFilter;

/// Simulated database connection.
#[derive(Debug)]
struct Connection {
    serial: u32,
    queries: u32,
}

/// Opens and closes simulated connections.
struct Database {
    next_id: AtomicU32,
}

impl Manage for Database {
    type Resource = Connection;
    type Error = std::io::Error;

    async fn create(&self, _ctx: &Context) -> Result<Connection, Self::Error> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let serial = self.next_id.fetch_add(1, Ordering::SeqCst);
        tracing::info!(serial, "opened connection");
        Ok(Connection { serial, queries: 0 })
    }

    async fn validate(&self, conn: &mut Connection) -> bool {
        // Recycle connections after a handful of queries.
        conn.queries < 5
    }

    async fn teardown(&self, conn: Connection) -> Result<(), Self::Error> {
        tracing::info!(serial = conn.serial, queries = conn.queries, "closed connection");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> reservoir_pool::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let pool = Pool::builder(Database {
        next_id: AtomicU32::new(0),
    })
    .id("database")
    .config(PoolConfig {
        min_size: 2,
        max_size: 4,
        max_idle_time: Duration::from_millis(300),
        validate_on_release: true,
        reap_interval: Some(Duration::from_millis(100)),
        ..Default::default()
    })
    .build()
    .await?;

    let mut events = pool.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let PoolEvent::Destroyed { reason, .. } = event {
                tracing::info!(?reason, "pool destroyed a connection");
            }
        }
    });

    let mut workers = Vec::new();
    for worker in 0..8 {
        let pool = pool.clone();
        workers.push(tokio::spawn(async move {
            for _ in 0..5 {
                let mut conn = pool.acquire(&Context::new()).await?;
                conn.queries += 1;
                tracing::info!(worker, conn = conn.serial, "ran query");
                tokio::time::sleep(Duration::from_millis(10)).await;
                pool.release(conn).await?;
            }
            Ok::<_, reservoir_pool::Error>(())
        }));
    }
    for worker in workers {
        if let Ok(Err(err)) = worker.await {
            tracing::warn!(error = %err, "worker failed");
        }
    }

    tracing::info!(status = ?pool.status(), "workers finished");
    tokio::time::sleep(Duration::from_millis(500)).await;
    tracing::info!(status = ?pool.status(), stats = ?pool.stats(), "after idle eviction");

    pool.shutdown().await;
    tracing::info!(stats = ?pool.stats(), "pool shut down");
    Ok(())
}
