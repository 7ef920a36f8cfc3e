// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Durable storage for the relayer: an async Postgres pool and the
//! [`Recorder`], the single source of truth for transfer lifecycle state.

use std::time::Duration;

use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncPgConnection;
use tracing::info;

mod models;
pub mod recorder;

#[cfg(all(test, feature = "db-tests"))]
mod recorder_tests;

pub use recorder::Recorder;

/// Connection-pool knobs. The pool must be at least one connection larger
/// than the number of concurrently running service phases.
#[derive(Debug, Clone)]
pub struct DbArgs {
    /// Number of connections to keep in the pool.
    pub connection_pool_size: u32,
    /// Time spent waiting for a connection from the pool, in milliseconds.
    pub connection_timeout_ms: u64,
}

impl Default for DbArgs {
    fn default() -> Self {
        Self {
            connection_pool_size: 8,
            connection_timeout_ms: 30_000,
        }
    }
}

impl DbArgs {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }
}

/// Shared handle over the async Postgres pool.
#[derive(Clone)]
pub struct Db {
    pool: Pool<AsyncPgConnection>,
}

impl Db {
    /// Builds the pool. Fails fast when the database is unreachable so the
    /// process can exit non-zero at startup instead of limping.
    pub async fn new(database_url: &str, args: DbArgs) -> anyhow::Result<Self> {
        let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = Pool::builder()
            .max_size(args.connection_pool_size)
            .connection_timeout(args.connection_timeout())
            .build(manager)
            .await?;

        // Surface connectivity problems immediately
        {
            let _probe = pool.get().await?;
        }
        info!(
            "Database pool ready (size={}, timeout={:?})",
            args.connection_pool_size,
            args.connection_timeout()
        );
        Ok(Self { pool })
    }

    pub async fn connect(&self) -> anyhow::Result<PooledConnection<'_, AsyncPgConnection>> {
        Ok(self.pool.get().await?)
    }
}
