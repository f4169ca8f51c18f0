//! Core types and traits for the mirroring layer
//!
//! This crate defines the foundational types used throughout the system:
//! - OwnerId, Connection, ConnectionIdentity: who talks to which store
//! - Error: The single error type shared by all table kinds
//! - SqlValue, ResultSet: Materialized query results
//! - LogEntry, LogEntryFilter: The log-entry record model
//! - OnceMap: Concurrent build-once cache for handlers and wrappers
//! - Traits: Table-handler contracts and the backend factory

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod log_entry;
pub mod once_map;
pub mod traits;
pub mod types;
pub mod value;

pub use error::{Error, Result};
pub use log_entry::{LogEntry, LogEntryFilter};
pub use once_map::OnceMap;
pub use traits::{Backend, LogEntryHandler, SqlHandler, TableHandler};
pub use types::{Connection, ConnectionIdentity, OwnerId};
pub use value::{ResultSet, SqlValue};
