//! SQLite backend factory
//!
//! Hands out one store and one handler of each kind per connection
//! identity. Caches are `OnceMap`s: existing entries are served without
//! blocking, opening a store never stalls lookups of other connections,
//! and two callers never open the same store twice.

use std::sync::Arc;

use dbmirror_core::{
    Backend, Connection, ConnectionIdentity, Error, LogEntryHandler, OnceMap, Result, SqlHandler,
};

use crate::log_entries::SqliteLogEntries;
use crate::sql::SqliteSql;
use crate::store::{SqliteLocation, SqliteStore};

/// `Backend` producing SQLite-backed handlers
pub struct SqliteBackend {
    name: String,
    stores: OnceMap<ConnectionIdentity, Arc<SqliteStore>>,
    sql: OnceMap<ConnectionIdentity, Arc<SqliteSql>>,
    log_entries: OnceMap<ConnectionIdentity, Arc<SqliteLogEntries>>,
}

impl SqliteBackend {
    /// Create a backend registered under `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stores: OnceMap::new(),
            sql: OnceMap::new(),
            log_entries: OnceMap::new(),
        }
    }

    /// Store serving `conn`, opened on first use
    pub fn store(&self, conn: &Connection) -> Result<Arc<SqliteStore>> {
        self.stores.get_or_try_insert_with(conn.identity(), || {
            SqliteStore::open(&self.name, SqliteLocation::from_url(conn.url())).map(Arc::new)
        })
    }

    /// Number of stores opened so far
    pub fn store_count(&self) -> usize {
        self.stores.len()
    }
}

impl Backend for SqliteBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn sql_handler(&self, conn: &Connection) -> Result<Arc<dyn SqlHandler>> {
        let handler = self.sql.get_or_try_insert_with(conn.identity(), || {
            Ok::<_, Error>(Arc::new(SqliteSql::new(conn.clone(), self.store(conn)?)))
        })?;
        Ok(handler)
    }

    fn log_entry_handler(&self, conn: &Connection) -> Result<Arc<dyn LogEntryHandler>> {
        let handler = self.log_entries.get_or_try_insert_with(conn.identity(), || {
            SqliteLogEntries::open(conn.clone(), self.store(conn)?).map(Arc::new)
        })?;
        Ok(handler)
    }
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("name", &self.name)
            .field("stores", &self.stores.len())
            .finish()
    }
}
