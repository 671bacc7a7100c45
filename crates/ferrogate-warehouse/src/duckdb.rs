//! `DuckDB` connection pool.
//!
//! A database file may only be opened once per process, so the pool opens a
//! single root connection and hands out clones of it. Clones share the same
//! database instance and see each other's committed writes.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ::duckdb::Connection;

struct PoolInner {
    db_path: PathBuf,
    max_idle: usize,
    root: Mutex<Connection>,
    idle: Mutex<Vec<Connection>>,
}

/// Pool of connections cloned from one `DuckDB` database instance.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Open the database file and create a pool over it.
    ///
    /// # Errors
    /// Returns an error if the database file cannot be opened or configured.
    pub fn open(path: impl Into<PathBuf>, max_idle: usize) -> Result<Self, ::duckdb::Error> {
        let db_path = path.into();
        let root = Connection::open(db_path.as_path())?;
        configure_connection(&root)?;

        Ok(Self {
            inner: Arc::new(PoolInner {
                db_path,
                max_idle: max_idle.max(1),
                root: Mutex::new(root),
                idle: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Check out a connection, cloning a new one when none is idle.
    ///
    /// # Panics
    /// Panics if a pool mutex is poisoned.
    pub fn acquire(&self) -> Result<PooledConnection, ::duckdb::Error> {
        let idle = self
            .inner
            .idle
            .lock()
            .expect("duckdb idle pool mutex poisoned")
            .pop();

        let connection = match idle {
            Some(connection) => connection,
            None => {
                let root = self
                    .inner
                    .root
                    .lock()
                    .expect("duckdb root connection mutex poisoned");
                let connection = root.try_clone()?;
                drop(root);
                configure_connection(&connection)?;
                connection
            }
        };

        Ok(PooledConnection {
            pool: Arc::clone(&self.inner),
            connection: Some(connection),
        })
    }

    /// Number of connections currently parked in the pool.
    pub fn idle_count(&self) -> usize {
        self.inner
            .idle
            .lock()
            .expect("duckdb idle pool mutex poisoned")
            .len()
    }

    #[must_use]
    pub fn db_path(&self) -> &Path {
        self.inner.db_path.as_path()
    }
}

/// A pooled connection that goes back to the pool when dropped.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    connection: Option<Connection>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        self.connection
            .as_ref()
            .expect("pooled connection unexpectedly missing")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection
            .as_mut()
            .expect("pooled connection unexpectedly missing")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        let Ok(mut idle) = self.pool.idle.lock() else {
            return;
        };
        if idle.len() < self.pool.max_idle {
            idle.push(connection);
        }
    }
}

fn configure_connection(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch("PRAGMA disable_progress_bar;")
}
