//! Table-handler and backend contracts
//!
//! This module defines the traits every table module implements so it
//! can take part in routing and mirroring:
//! - TableHandler: Identity and debug toggle shared by all table kinds
//! - SqlHandler: Generic SQL execution
//! - LogEntryHandler: Persistence of log entries
//! - Backend: Factory producing handlers for a connection
//!
//! Every operation is classified as a read or a write. The mirroring
//! layer sends writes to two stores and reads to one, so the split below
//! is part of the contract, not documentation.
//!
//! Thread safety: All handlers must be safe to call concurrently from
//! multiple threads (requires Send + Sync).

use std::sync::Arc;

use crate::error::Result;
use crate::log_entry::{LogEntry, LogEntryFilter};
use crate::types::Connection;
use crate::value::ResultSet;

/// Common surface of every table handler
pub trait TableHandler: Send + Sync {
    /// Name of the table this handler manages
    fn table_name(&self) -> &str;

    /// Connection this handler is bound to
    fn connection(&self) -> &Connection;

    /// Whether verbose logging is enabled
    fn debug(&self) -> bool;

    /// Enable or disable verbose logging
    fn set_debug(&self, value: bool);
}

/// Generic SQL execution against a connection
pub trait SqlHandler: TableHandler {
    // ---- reads ----

    /// Whether `table` exists
    fn table_exists(&self, table: &str) -> Result<bool>;

    /// Whether `column` exists in `table`
    fn column_exists(&self, table: &str, column: &str) -> Result<bool>;

    /// Names of all tables, sorted
    fn list_tables(&self) -> Result<Vec<String>>;

    /// `SELECT columns FROM tables [WHERE where_clause]`
    fn select(&self, columns: &str, tables: &str, where_clause: Option<&str>)
        -> Result<ResultSet>;

    /// `SELECT DISTINCT columns FROM tables [WHERE where_clause]`
    fn select_distinct(
        &self,
        columns: &str,
        tables: &str,
        where_clause: Option<&str>,
    ) -> Result<ResultSet>;

    /// Run an arbitrary query and materialize its rows
    fn query(&self, sql: &str) -> Result<ResultSet>;

    // ---- writes ----

    /// Execute a statement; returns true if it produced rows
    fn execute(&self, sql: &str) -> Result<bool>;

    /// Execute an insert and return the generated keys
    fn execute_generated_keys(&self, sql: &str) -> Result<ResultSet>;

    /// `UPDATE table SET assignments WHERE where_clause`; returns rows affected
    fn update(&self, assignments: &str, table: &str, where_clause: &str) -> Result<usize>;

    /// Remove all rows from `table`
    fn truncate(&self, table: &str) -> Result<()>;

    /// Drop `table`
    fn drop_table(&self, table: &str) -> Result<()>;
}

/// Persistence of log entries
pub trait LogEntryHandler: TableHandler {
    // ---- reads ----

    /// Whether an entry with `id` exists
    fn exists(&self, id: i64) -> Result<bool>;

    /// Load a single entry
    fn load(&self, id: i64) -> Result<Option<LogEntry>>;

    /// Load all entries matching `filter`, ordered by id
    fn load_filtered(&self, filter: &LogEntryFilter) -> Result<Vec<LogEntry>>;

    /// Number of stored entries
    fn count(&self) -> Result<usize>;

    // ---- writes ----

    /// Store a new entry; returns the stored copy carrying its id
    fn add(&self, entry: &LogEntry) -> Result<LogEntry>;

    /// Overwrite the entry with `entry.id`; returns false if it did not exist
    fn update(&self, entry: &LogEntry) -> Result<bool>;

    /// Remove one entry; returns false if it did not exist
    fn remove(&self, id: i64) -> Result<bool>;

    /// Remove all entries matching `filter`; returns the number removed
    fn remove_filtered(&self, filter: &LogEntryFilter) -> Result<usize>;

    /// Remove every entry
    fn truncate(&self) -> Result<()>;
}

/// Factory producing table handlers bound to a connection
///
/// Implementations hand out one handler per connection identity, so
/// repeated calls with the same connection return the same instance.
pub trait Backend: Send + Sync {
    /// Backend name, used in logs and configuration
    fn name(&self) -> &str;

    /// SQL handler for `conn`
    fn sql_handler(&self, conn: &Connection) -> Result<Arc<dyn SqlHandler>>;

    /// Log-entry handler for `conn`
    fn log_entry_handler(&self, conn: &Connection) -> Result<Arc<dyn LogEntryHandler>>;
}

impl std::fmt::Debug for dyn SqlHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlHandler").field("table", &self.table_name()).finish()
    }
}

impl std::fmt::Debug for dyn Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend").field("name", &self.name()).finish()
    }
}
