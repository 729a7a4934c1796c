//! SQLite database module for reference data and counters
//!
//! ## Tables
//!
//! - `regions`, `subdivisions` - Geographic reference data (read-only after seeding)
//! - `diseases` - Condition code to disease key mapping
//! - `region_stats`, `subdivision_stats` - Population counters with density
//! - `region_disease_facts`, `subdivision_disease_facts` - Disease case counters
//!
//! Connections come from an r2d2 pool. Every connection is put in WAL mode
//! with a busy timeout so concurrent writers queue on the database lock
//! instead of failing immediately.

pub mod diesel_schema;
pub mod ledger;
pub mod models;
pub mod reference;
pub mod schema;

use std::path::Path;
use std::time::Duration;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use tracing::{debug, info};

use crate::error::StatsError;

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type PooledConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Per-connection PRAGMAs applied when the pool hands out a connection
#[derive(Debug, Clone, Copy)]
struct ConnectionOptions {
    enable_wal: bool,
    busy_timeout: Duration,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        let mut pragmas = format!(
            "PRAGMA busy_timeout = {}; PRAGMA foreign_keys = ON;",
            self.busy_timeout.as_millis()
        );
        if self.enable_wal {
            pragmas.push_str(" PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;");
        }
        conn.batch_execute(&pragmas)
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Pooled SQLite database
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Open or create the database file and initialize its schema
    pub fn open(path: &Path, pool_size: u32, busy_timeout: Duration) -> Result<Self, StatsError> {
        info!("Opening SQLite database at {:?}", path);

        let manager = ConnectionManager::<SqliteConnection>::new(path.to_string_lossy());
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .connection_customizer(Box::new(ConnectionOptions {
                enable_wal: true,
                busy_timeout,
            }))
            .build(manager)
            .map_err(|e| StatsError::Pool(format!("Failed to build pool: {}", e)))?;

        let db = Self { pool };
        db.init_schema()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    ///
    /// Each SQLite in-memory connection is its own database, so the pool holds
    /// exactly one connection that is never recycled.
    pub fn open_in_memory() -> Result<Self, StatsError> {
        debug!("Opening in-memory SQLite database");

        let manager = ConnectionManager::<SqliteConnection>::new(":memory:");
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connection_customizer(Box::new(ConnectionOptions {
                enable_wal: false,
                busy_timeout: Duration::from_secs(5),
            }))
            .build(manager)
            .map_err(|e| StatsError::Pool(format!("Failed to build pool: {}", e)))?;

        let db = Self { pool };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), StatsError> {
        let mut conn = self.conn()?;
        schema::init_schema(&mut conn)
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<PooledConn, StatsError> {
        self.pool
            .get()
            .map_err(|e| StatsError::Pool(format!("Failed to get connection: {}", e)))
    }

    /// Run `f` with a pooled connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StatsError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, StatsError>,
    {
        let mut conn = self.conn()?;
        f(&mut *conn)
    }
}

// Re-exports
pub use ledger::{
    CounterLedger, DiseaseCaseCounter, InvariantViolation, PopulationCounter, Scope, SexDelta,
    Snapshot,
};
pub use models::{Disease, Region, Subdivision};
