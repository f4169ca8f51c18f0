//! Table kinds known to the mirroring layer
//!
//! A `TableKind` ties a handler contract (`dyn SqlHandler`,
//! `dyn LogEntryHandler`) to the backend method that opens it, so that the
//! registry and router can be written once for every kind.

use std::sync::Arc;

use dbmirror_core::{Backend, Connection, LogEntryHandler, Result, SqlHandler, TableHandler};

use crate::dual_write::DualWrite;

/// A kind of table handler
pub trait TableKind: Send + Sync + 'static {
    /// Contract object handed to callers
    type Handler: ?Sized + TableHandler + 'static;

    /// Kind name used in logs
    const NAME: &'static str;

    /// Open the handler of this kind for `conn`
    fn open(backend: &dyn Backend, conn: &Connection) -> Result<Arc<Self::Handler>>;

    /// View a dual-write wrapper as the contract object
    fn mirrored(wrapper: Arc<DualWrite<Self::Handler>>) -> Arc<Self::Handler>;
}

/// Generic SQL execution
pub struct SqlTable;

impl TableKind for SqlTable {
    type Handler = dyn SqlHandler;

    const NAME: &'static str = "sql";

    fn open(backend: &dyn Backend, conn: &Connection) -> Result<Arc<dyn SqlHandler>> {
        backend.sql_handler(conn)
    }

    fn mirrored(wrapper: Arc<DualWrite<dyn SqlHandler>>) -> Arc<dyn SqlHandler> {
        wrapper
    }
}

/// Log entries
pub struct LogEntryTable;

impl TableKind for LogEntryTable {
    type Handler = dyn LogEntryHandler;

    const NAME: &'static str = "log_entries";

    fn open(backend: &dyn Backend, conn: &Connection) -> Result<Arc<dyn LogEntryHandler>> {
        backend.log_entry_handler(conn)
    }

    fn mirrored(wrapper: Arc<DualWrite<dyn LogEntryHandler>>) -> Arc<dyn LogEntryHandler> {
        wrapper
    }
}
