//! SQLite store client for the mirroring layer
//!
//! This crate implements a concrete backend with:
//! - SqliteBackend: `Backend` factory, one store per connection identity
//! - SqliteSql: Generic SQL execution handler
//! - SqliteLogEntries: Log-entry handler over the `log_entries` table
//!
//! It serves as the reference store for both primaries and mirrors.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod convert;

pub mod backend;
pub mod log_entries;
pub mod sql;
pub mod store;

pub use backend::SqliteBackend;
pub use log_entries::{SqliteLogEntries, LOG_ENTRY_TABLE};
pub use sql::{SqliteSql, GENERATED_KEY_COLUMN, GENERIC_SQL_TABLE};
pub use store::{SqliteLocation, SqliteStore};
