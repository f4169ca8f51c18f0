//! A single SQLite database behind a mutex
//!
//! One `SqliteStore` exists per connection identity and is shared by the
//! SQL and log-entry handlers of that connection.

use parking_lot::Mutex;
use std::path::PathBuf;

use dbmirror_core::{Error, Result};
use tracing::debug;

/// Where a connection URL points to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqliteLocation {
    /// Private in-memory database
    Memory,
    /// Database file
    File(PathBuf),
}

impl SqliteLocation {
    /// Map a connection URL to a location
    ///
    /// `sqlite:<path>` and `sqlite://<path>` name a file; `sqlite::memory:`
    /// and URLs of any other scheme get a private in-memory database.
    pub fn from_url(url: &str) -> Self {
        let rest = match url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
        {
            Some(rest) => rest,
            None => return SqliteLocation::Memory,
        };
        if rest.is_empty() || rest == ":memory:" {
            SqliteLocation::Memory
        } else {
            SqliteLocation::File(PathBuf::from(rest))
        }
    }
}

/// An open SQLite connection
pub struct SqliteStore {
    backend: String,
    location: SqliteLocation,
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteStore {
    /// Open the database at `location` on behalf of `backend`
    pub fn open(backend: &str, location: SqliteLocation) -> Result<Self> {
        let conn = match &location {
            SqliteLocation::Memory => rusqlite::Connection::open_in_memory(),
            SqliteLocation::File(path) => rusqlite::Connection::open(path),
        }
        .map_err(|e| Error::store(backend, e.to_string()))?;
        debug!(target: "dbmirror::sqlite", backend, ?location, "Opened SQLite store");
        Ok(Self {
            backend: backend.to_string(),
            location,
            conn: Mutex::new(conn),
        })
    }

    /// Location of this store
    pub fn location(&self) -> &SqliteLocation {
        &self.location
    }

    /// Run `f` with exclusive access to the connection
    ///
    /// SQLite errors are reported as `Error::Store` tagged with the backend name.
    pub fn with_conn<R>(
        &self,
        f: impl FnOnce(&rusqlite::Connection) -> rusqlite::Result<R>,
    ) -> Result<R> {
        let conn = self.conn.lock();
        f(&conn).map_err(|e| self.error(e))
    }

    /// Store error tagged with this backend
    pub fn error(&self, e: impl ToString) -> Error {
        Error::store(&self.backend, e.to_string())
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("backend", &self.backend)
            .field("location", &self.location)
            .finish()
    }
}
