//! dbmirror - write mirroring for database table handlers
//!
//! dbmirror sits between an application and its table handlers. For
//! connections listed in its routing table, every write is applied to a
//! mirror store first and then to the primary store; reads only ever go
//! to the primary. All other connections reach their store unchanged.
//!
//! # Quick Start
//!
//! ```ignore
//! use dbmirror::{sqlite_catalog, MirrorConfig, MirrorContext};
//!
//! let config = MirrorConfig::from_file("mirror.toml".as_ref())?;
//! let ctx = MirrorContext::from_config(&config, &sqlite_catalog())?;
//!
//! let conn = ctx.connection("sqlite:///var/lib/app/main.db")?;
//! let sql = ctx.sql_handler(&conn)?;
//! sql.execute("INSERT INTO t VALUES (1)")?; // mirror first, then primary
//! ```
//!
//! # Architecture
//!
//! - `dbmirror-core`: connections, values, errors and the handler traits
//! - `dbmirror-storage`: the SQLite backend
//! - `dbmirror-engine`: dual-write wrapper, registry, router and config

use std::sync::Arc;

pub use dbmirror_core::*;
pub use dbmirror_engine::*;
pub use dbmirror_storage::{SqliteBackend, SqliteLocation, SqliteStore};

/// Name the SQLite backend is registered under by [`sqlite_catalog`]
pub const SQLITE_BACKEND: &str = "sqlite";

/// Catalog holding one SQLite backend named [`SQLITE_BACKEND`]
///
/// Matches the fallback of [`MirrorConfig::default`].
pub fn sqlite_catalog() -> BackendCatalog {
    BackendCatalog::new().with(Arc::new(SqliteBackend::new(SQLITE_BACKEND)))
}
