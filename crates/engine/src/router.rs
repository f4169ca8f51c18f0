//! Connection router
//!
//! Decides, for an inbound connection, whether its writes are mirrored.
//! Routing entries are matched by exact URL string equality; the first
//! matching entry wins. Connections without a complete match (mirror and
//! backend both present) get the fallback backend's handler directly,
//! without any wrapper.
//!
//! ## Parallel-list view
//!
//! Entries are stored as one list of `RoutingEntry`. The list can also be
//! configured as three parallel lists (mirrors, URL patterns, backends).
//! Setting any one of them resizes the entry list to its length; entries
//! added by the resize carry neutral defaults (empty pattern, no mirror,
//! no backend), so the three views always have the same length.

use parking_lot::RwLock;
use std::sync::Arc;

use dbmirror_core::{Backend, Connection, LogEntryHandler, Result, SqlHandler};
use tracing::trace;

use crate::kinds::{LogEntryTable, SqlTable, TableKind};
use crate::registry::HandlerRegistry;

/// One mirrored URL
#[derive(Clone, Default)]
pub struct RoutingEntry {
    /// URL matched against inbound connections
    pub url_pattern: String,
    /// Mirror receiving copies of the writes
    pub mirror: Option<Connection>,
    /// Backend opening both the mirror and the primary handlers
    pub backend: Option<Arc<dyn Backend>>,
}

impl RoutingEntry {
    /// Entry mirroring `url_pattern` into `mirror` through `backend`
    pub fn new(url_pattern: impl Into<String>, mirror: Connection, backend: Arc<dyn Backend>) -> Self {
        Self {
            url_pattern: url_pattern.into(),
            mirror: Some(mirror),
            backend: Some(backend),
        }
    }

    fn matches(&self, url: &str) -> bool {
        !self.url_pattern.is_empty() && self.url_pattern == url
    }
}

impl std::fmt::Debug for RoutingEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingEntry")
            .field("url_pattern", &self.url_pattern)
            .field("mirror", &self.mirror.as_ref().map(Connection::url))
            .field("backend", &self.backend.as_ref().map(|b| b.name().to_string()))
            .finish()
    }
}

/// Routes connections to mirrored or plain table handlers
pub struct ConnectionRouter {
    entries: RwLock<Vec<RoutingEntry>>,
    fallback: RwLock<Arc<dyn Backend>>,
    registry: Arc<HandlerRegistry>,
}

impl ConnectionRouter {
    /// Router with no entries; every connection uses `fallback`
    pub fn new(fallback: Arc<dyn Backend>, registry: Arc<HandlerRegistry>) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            fallback: RwLock::new(fallback),
            registry,
        }
    }

    /// Registry holding this router's wrappers
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    /// Replace all entries and the fallback
    pub fn configure(&self, entries: Vec<RoutingEntry>, fallback: Arc<dyn Backend>) {
        *self.entries.write() = entries;
        *self.fallback.write() = fallback;
    }

    /// Replace all entries, keeping the fallback
    pub fn set_entries(&self, entries: Vec<RoutingEntry>) {
        *self.entries.write() = entries;
    }

    /// Current entries
    pub fn entries(&self) -> Vec<RoutingEntry> {
        self.entries.read().clone()
    }

    /// Replace the fallback backend
    pub fn set_fallback(&self, fallback: Arc<dyn Backend>) {
        *self.fallback.write() = fallback;
    }

    /// Backend used for connections that are not mirrored
    pub fn fallback(&self) -> Arc<dyn Backend> {
        Arc::clone(&self.fallback.read())
    }

    /// Configure through the three parallel lists
    ///
    /// Applies `set_mirrors`, `set_url_patterns` and `set_backends` in that
    /// order, so the resulting length is that of `backends`.
    pub fn configure_lists(
        &self,
        mirrors: Vec<Connection>,
        url_patterns: Vec<String>,
        backends: Vec<Arc<dyn Backend>>,
        fallback: Arc<dyn Backend>,
    ) {
        self.set_mirrors(mirrors);
        self.set_url_patterns(url_patterns);
        self.set_backends(backends);
        self.set_fallback(fallback);
    }

    /// Set the mirror of every entry, resizing the entry list
    pub fn set_mirrors(&self, mirrors: Vec<Connection>) {
        let mut entries = self.entries.write();
        entries.resize_with(mirrors.len(), RoutingEntry::default);
        for (entry, mirror) in entries.iter_mut().zip(mirrors) {
            entry.mirror = Some(mirror);
        }
    }

    /// Set the URL pattern of every entry, resizing the entry list
    pub fn set_url_patterns(&self, url_patterns: Vec<String>) {
        let mut entries = self.entries.write();
        entries.resize_with(url_patterns.len(), RoutingEntry::default);
        for (entry, pattern) in entries.iter_mut().zip(url_patterns) {
            entry.url_pattern = pattern;
        }
    }

    /// Set the backend of every entry, resizing the entry list
    pub fn set_backends(&self, backends: Vec<Arc<dyn Backend>>) {
        let mut entries = self.entries.write();
        entries.resize_with(backends.len(), RoutingEntry::default);
        for (entry, backend) in entries.iter_mut().zip(backends) {
            entry.backend = Some(backend);
        }
    }

    /// Mirror view of the entries
    pub fn mirrors(&self) -> Vec<Option<Connection>> {
        self.entries.read().iter().map(|e| e.mirror.clone()).collect()
    }

    /// URL-pattern view of the entries
    pub fn url_patterns(&self) -> Vec<String> {
        self.entries.read().iter().map(|e| e.url_pattern.clone()).collect()
    }

    /// Backend view of the entries
    pub fn backends(&self) -> Vec<Option<Arc<dyn Backend>>> {
        self.entries.read().iter().map(|e| e.backend.clone()).collect()
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    fn first_match<R>(&self, conn: &Connection, pick: impl FnOnce(&RoutingEntry) -> R) -> Option<R> {
        self.entries
            .read()
            .iter()
            .find(|e| e.matches(conn.url()))
            .map(pick)
    }

    /// Mirror of the first entry whose pattern equals `conn`'s URL
    pub fn resolve_mirror(&self, conn: &Connection) -> Option<Connection> {
        self.first_match(conn, |e| e.mirror.clone()).flatten()
    }

    /// Backend of the first entry whose pattern equals `conn`'s URL
    pub fn resolve_backend(&self, conn: &Connection) -> Option<Arc<dyn Backend>> {
        self.first_match(conn, |e| e.backend.clone()).flatten()
    }

    /// Mirror and backend of the first matching entry, if both are set
    pub fn resolve(&self, conn: &Connection) -> Option<(Connection, Arc<dyn Backend>)> {
        self.first_match(conn, |e| match (&e.mirror, &e.backend) {
            (Some(mirror), Some(backend)) => Some((mirror.clone(), Arc::clone(backend))),
            _ => None,
        })
        .flatten()
    }

    /// Whether writes through `conn` are mirrored
    pub fn can_mirror(&self, conn: &Connection) -> bool {
        self.resolve(conn).is_some()
    }

    // ========================================================================
    // Handlers
    // ========================================================================

    /// Table handler of kind `K` for `conn`
    ///
    /// Mirrored connections get their registry wrapper; all others get
    /// the fallback backend's handler unwrapped. A mirrored URL opened
    /// under another owner than the registry's is an `InvalidConnection`.
    pub fn table_handler<K: TableKind>(&self, conn: &Connection) -> Result<Arc<K::Handler>> {
        match self.resolve(conn) {
            Some((mirror, backend)) => {
                trace!(
                    target: "dbmirror::router",
                    kind = K::NAME,
                    url = conn.url(),
                    mirror = mirror.url(),
                    "Routing to mirrored handler"
                );
                self.registry.get_or_create::<K>(conn, &mirror, backend.as_ref())
            }
            None => {
                let fallback = self.fallback();
                trace!(
                    target: "dbmirror::router",
                    kind = K::NAME,
                    url = conn.url(),
                    backend = fallback.name(),
                    "Routing to fallback handler"
                );
                K::open(fallback.as_ref(), conn)
            }
        }
    }

    /// SQL handler for `conn`
    pub fn sql_handler(&self, conn: &Connection) -> Result<Arc<dyn SqlHandler>> {
        self.table_handler::<SqlTable>(conn)
    }

    /// Log-entry handler for `conn`
    pub fn log_entry_handler(&self, conn: &Connection) -> Result<Arc<dyn LogEntryHandler>> {
        self.table_handler::<LogEntryTable>(conn)
    }
}

impl std::fmt::Debug for ConnectionRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRouter")
            .field("entries", &*self.entries.read())
            .field("fallback", &self.fallback.read().name().to_string())
            .finish()
    }
}
