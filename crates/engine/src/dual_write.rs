//! Dual-write wrapper
//!
//! A `DualWrite` presents one table handler over two stores:
//! - Reads go to the primary only, without locking
//! - Writes take the wrapper's lock, run against the mirror, then
//!   against the primary, and return the primary's outcome
//!
//! ## Write Sequence
//!
//! ```text
//! 1. lock            - Idle -> Writing; one write per wrapper at a time
//! 2. mirror.op()     - result discarded
//! 3. IF mirror failed:
//!      Abort    -> unlock, return mirror error (primary untouched)
//!      Continue -> warn, go on
//! 4. primary.op()    - authoritative
//! 5. unlock          - Writing -> Idle, return primary result
//! ```
//!
//! The lock is private to each wrapper: writes through different wrappers
//! never wait for each other.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dbmirror_core::{
    Connection, LogEntry, LogEntryFilter, LogEntryHandler, ResultSet, Result, SqlHandler,
    TableHandler,
};
use tracing::warn;

/// What a write does when the mirror rejects it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorFailurePolicy {
    /// Fail the write with the mirror's error; the primary is not written
    #[default]
    Abort,
    /// Log the mirror's error and write the primary anyway
    Continue,
}

/// Observable state of a wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapperState {
    /// No write in progress
    Idle,
    /// A write holds the wrapper's lock
    Writing,
}

/// Write counters of a wrapper
///
/// Counters use Relaxed ordering; they are observational only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorStats {
    /// Writes forwarded to the primary
    pub writes: u64,
    /// Writes the mirror rejected
    pub mirror_failures: u64,
}

/// Table handler that mirrors writes into a second store
pub struct DualWrite<H: ?Sized> {
    connection: Connection,
    mirror: Arc<H>,
    primary: Arc<H>,
    policy: MirrorFailurePolicy,
    write_lock: Mutex<()>,
    writes: AtomicU64,
    mirror_failures: AtomicU64,
}

impl<H: ?Sized + TableHandler> DualWrite<H> {
    /// Wrap `primary` so its writes are replayed on `mirror` first
    pub fn new(
        connection: Connection,
        mirror: Arc<H>,
        primary: Arc<H>,
        policy: MirrorFailurePolicy,
    ) -> Self {
        Self {
            connection,
            mirror,
            primary,
            policy,
            write_lock: Mutex::new(()),
            writes: AtomicU64::new(0),
            mirror_failures: AtomicU64::new(0),
        }
    }

    /// Handler of the mirror store
    pub fn mirror(&self) -> &Arc<H> {
        &self.mirror
    }

    /// Handler of the primary store
    pub fn primary(&self) -> &Arc<H> {
        &self.primary
    }

    /// Policy applied when the mirror rejects a write
    pub fn policy(&self) -> MirrorFailurePolicy {
        self.policy
    }

    /// Whether a write currently holds the lock
    pub fn state(&self) -> WrapperState {
        if self.write_lock.is_locked() {
            WrapperState::Writing
        } else {
            WrapperState::Idle
        }
    }

    /// Snapshot of the write counters
    pub fn stats(&self) -> MirrorStats {
        MirrorStats {
            writes: self.writes.load(Ordering::Relaxed),
            mirror_failures: self.mirror_failures.load(Ordering::Relaxed),
        }
    }

    #[inline]
    fn read<R>(&self, op: impl FnOnce(&H) -> Result<R>) -> Result<R> {
        op(&self.primary)
    }

    fn write<R>(&self, op_name: &'static str, op: impl Fn(&H) -> Result<R>) -> Result<R> {
        let _writing = self.write_lock.lock();

        if let Err(e) = op(&self.mirror) {
            self.mirror_failures.fetch_add(1, Ordering::Relaxed);
            match self.policy {
                MirrorFailurePolicy::Abort => return Err(e),
                MirrorFailurePolicy::Continue => warn!(
                    target: "dbmirror::dual_write",
                    url = self.connection.url(),
                    mirror = self.mirror.connection().url(),
                    op = op_name,
                    error = %e,
                    "Mirror write failed, writing primary only"
                ),
            }
        }

        let result = op(&self.primary);
        self.writes.fetch_add(1, Ordering::Relaxed);
        result
    }
}

impl<H: ?Sized + TableHandler> TableHandler for DualWrite<H> {
    fn table_name(&self) -> &str {
        self.primary.table_name()
    }

    fn connection(&self) -> &Connection {
        &self.connection
    }

    fn debug(&self) -> bool {
        self.primary.debug()
    }

    fn set_debug(&self, value: bool) {
        self.mirror.set_debug(value);
        self.primary.set_debug(value);
    }
}

impl<H: ?Sized + SqlHandler> SqlHandler for DualWrite<H> {
    fn table_exists(&self, table: &str) -> Result<bool> {
        self.read(|h| h.table_exists(table))
    }

    fn column_exists(&self, table: &str, column: &str) -> Result<bool> {
        self.read(|h| h.column_exists(table, column))
    }

    fn list_tables(&self) -> Result<Vec<String>> {
        self.read(|h| h.list_tables())
    }

    fn select(&self, columns: &str, tables: &str, where_clause: Option<&str>) -> Result<ResultSet> {
        self.read(|h| h.select(columns, tables, where_clause))
    }

    fn select_distinct(
        &self,
        columns: &str,
        tables: &str,
        where_clause: Option<&str>,
    ) -> Result<ResultSet> {
        self.read(|h| h.select_distinct(columns, tables, where_clause))
    }

    fn query(&self, sql: &str) -> Result<ResultSet> {
        self.read(|h| h.query(sql))
    }

    fn execute(&self, sql: &str) -> Result<bool> {
        self.write("execute", |h| h.execute(sql))
    }

    fn execute_generated_keys(&self, sql: &str) -> Result<ResultSet> {
        self.write("execute_generated_keys", |h| h.execute_generated_keys(sql))
    }

    fn update(&self, assignments: &str, table: &str, where_clause: &str) -> Result<usize> {
        self.write("update", |h| h.update(assignments, table, where_clause))
    }

    fn truncate(&self, table: &str) -> Result<()> {
        self.write("truncate", |h| h.truncate(table))
    }

    fn drop_table(&self, table: &str) -> Result<()> {
        self.write("drop", |h| h.drop_table(table))
    }
}

impl<H: ?Sized + LogEntryHandler> LogEntryHandler for DualWrite<H> {
    fn exists(&self, id: i64) -> Result<bool> {
        self.read(|h| h.exists(id))
    }

    fn load(&self, id: i64) -> Result<Option<LogEntry>> {
        self.read(|h| h.load(id))
    }

    fn load_filtered(&self, filter: &LogEntryFilter) -> Result<Vec<LogEntry>> {
        self.read(|h| h.load_filtered(filter))
    }

    fn count(&self) -> Result<usize> {
        self.read(|h| h.count())
    }

    fn add(&self, entry: &LogEntry) -> Result<LogEntry> {
        self.write("add", |h| h.add(entry))
    }

    fn update(&self, entry: &LogEntry) -> Result<bool> {
        self.write("update", |h| h.update(entry))
    }

    fn remove(&self, id: i64) -> Result<bool> {
        self.write("remove", |h| h.remove(id))
    }

    fn remove_filtered(&self, filter: &LogEntryFilter) -> Result<usize> {
        self.write("remove_filtered", |h| h.remove_filtered(filter))
    }

    fn truncate(&self) -> Result<()> {
        self.write("truncate", |h| h.truncate())
    }
}

impl<H: ?Sized + TableHandler> std::fmt::Debug for DualWrite<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DualWrite")
            .field("connection", &self.connection.url())
            .field("mirror", &self.mirror.connection().url())
            .field("policy", &self.policy)
            .field("state", &self.state())
            .finish()
    }
}
