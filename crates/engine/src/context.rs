//! Application context for mirroring
//!
//! A `MirrorContext` owns everything one application instance needs:
//! its owner id, the wrapper registry and the router. Dropping the
//! context drops its wrappers.

use std::sync::Arc;

use dbmirror_core::{Backend, Connection, LogEntryHandler, OwnerId, Result, SqlHandler};
use tracing::info;

use crate::config::{BackendCatalog, MirrorConfig};
use crate::dual_write::MirrorFailurePolicy;
use crate::kinds::TableKind;
use crate::registry::HandlerRegistry;
use crate::router::{ConnectionRouter, RoutingEntry};

/// Owner-scoped registry and router
pub struct MirrorContext {
    owner: OwnerId,
    registry: Arc<HandlerRegistry>,
    router: ConnectionRouter,
}

impl MirrorContext {
    /// Context without routes; every connection uses `fallback`
    pub fn new(fallback: Arc<dyn Backend>, policy: MirrorFailurePolicy) -> Self {
        let owner = OwnerId::new();
        let registry = Arc::new(HandlerRegistry::new(owner, policy));
        let router = ConnectionRouter::new(fallback, Arc::clone(&registry));
        Self {
            owner,
            registry,
            router,
        }
    }

    /// Context configured from `config`, resolving backends in `catalog`
    pub fn from_config(config: &MirrorConfig, catalog: &BackendCatalog) -> Result<Self> {
        let context = Self::new(catalog.get(&config.fallback)?, config.failure_policy());
        let entries = config
            .routes
            .iter()
            .map(|route| {
                Ok(RoutingEntry::new(
                    route.url.clone(),
                    context.connection(&route.mirror)?,
                    catalog.get(&route.backend)?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        info!(
            target: "dbmirror::router",
            owner = %context.owner,
            routes = entries.len(),
            fallback = %config.fallback,
            policy = ?config.failure_policy(),
            "Configured mirroring"
        );
        context.router.set_entries(entries);
        Ok(context)
    }

    /// Owner of every connection made by this context
    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    /// Connection to `url` owned by this context
    pub fn connection(&self, url: &str) -> Result<Connection> {
        Connection::new(url, self.owner)
    }

    /// The router
    pub fn router(&self) -> &ConnectionRouter {
        &self.router
    }

    /// The wrapper registry
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Table handler of kind `K` for `conn`
    pub fn table_handler<K: TableKind>(&self, conn: &Connection) -> Result<Arc<K::Handler>> {
        self.router.table_handler::<K>(conn)
    }

    /// SQL handler for `conn`
    pub fn sql_handler(&self, conn: &Connection) -> Result<Arc<dyn SqlHandler>> {
        self.router.sql_handler(conn)
    }

    /// Log-entry handler for `conn`
    pub fn log_entry_handler(&self, conn: &Connection) -> Result<Arc<dyn LogEntryHandler>> {
        self.router.log_entry_handler(conn)
    }

    /// Forget the wrappers of `conn`; returns how many were dropped
    pub fn release(&self, conn: &Connection) -> usize {
        self.registry.evict(conn)
    }
}

impl std::fmt::Debug for MirrorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorContext")
            .field("owner", &self.owner)
            .field("registry", &self.registry)
            .field("router", &self.router)
            .finish()
    }
}
