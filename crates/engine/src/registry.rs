//! Per-connection registry of dual-write wrappers
//!
//! Ensures only one `DualWrite` exists per (table kind, connection).
//! The registry is an explicit object owned by the application context;
//! there is no process-wide static.
//!
//! Wrappers are kept in a `OnceMap`: lookups of an existing wrapper never
//! wait, not even for a wrapper of another connection whose stores are
//! being opened. Two concurrent callers for the same key observe the same
//! instance. A construction that fails inserts nothing and the next call
//! tries again.

use std::any::{Any, TypeId};
use std::sync::Arc;

use dbmirror_core::{Backend, Connection, ConnectionIdentity, Error, OnceMap, OwnerId, Result};
use tracing::debug;

use crate::dual_write::{DualWrite, MirrorFailurePolicy};
use crate::kinds::TableKind;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RegistryKey {
    kind: TypeId,
    connection: ConnectionIdentity,
}

impl RegistryKey {
    fn of<K: TableKind>(conn: &Connection) -> Self {
        Self {
            kind: TypeId::of::<K>(),
            connection: conn.identity(),
        }
    }
}

type AnyWrapper = Arc<dyn Any + Send + Sync>;

/// Registry of dual-write wrappers for one owner
///
/// Only connections created by this registry's owner are accepted;
/// connections of any other owner are rejected with
/// `Error::InvalidConnection`.
pub struct HandlerRegistry {
    owner: OwnerId,
    policy: MirrorFailurePolicy,
    wrappers: OnceMap<RegistryKey, AnyWrapper>,
}

impl HandlerRegistry {
    /// Create an empty registry; new wrappers use `policy`
    pub fn new(owner: OwnerId, policy: MirrorFailurePolicy) -> Self {
        Self {
            owner,
            policy,
            wrappers: OnceMap::new(),
        }
    }

    /// Owner this registry belongs to
    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    /// Failure policy given to new wrappers
    pub fn policy(&self) -> MirrorFailurePolicy {
        self.policy
    }

    /// Wrapper for `conn`, created on first request
    ///
    /// On creation the wrapper opens the mirror handler for `mirror` and
    /// the primary handler for `conn`, both through `backend`.
    pub fn wrapper<K: TableKind>(
        &self,
        conn: &Connection,
        mirror: &Connection,
        backend: &dyn Backend,
    ) -> Result<Arc<DualWrite<K::Handler>>> {
        if conn.owner() != self.owner {
            return Err(Error::InvalidConnection(format!(
                "{} belongs to owner {}, registry owner is {}",
                conn.url(),
                conn.owner(),
                self.owner
            )));
        }

        let entry = self.wrappers.get_or_try_insert_with(RegistryKey::of::<K>(conn), || {
            let wrapper = Arc::new(DualWrite::new(
                conn.clone(),
                K::open(backend, mirror)?,
                K::open(backend, conn)?,
                self.policy,
            ));
            debug!(
                target: "dbmirror::registry",
                kind = K::NAME,
                url = conn.url(),
                mirror = mirror.url(),
                backend = backend.name(),
                owner = %self.owner,
                "Created dual-write wrapper"
            );
            Ok::<_, Error>(wrapper as AnyWrapper)
        })?;
        downcast::<K>(&entry)
    }

    /// Same as [`wrapper`](Self::wrapper), viewed as the table-handler contract
    pub fn get_or_create<K: TableKind>(
        &self,
        conn: &Connection,
        mirror: &Connection,
        backend: &dyn Backend,
    ) -> Result<Arc<K::Handler>> {
        self.wrapper::<K>(conn, mirror, backend).map(K::mirrored)
    }

    /// Existing wrapper for `conn`, if any
    pub fn get<K: TableKind>(&self, conn: &Connection) -> Option<Arc<DualWrite<K::Handler>>> {
        let entry = self.wrappers.get(&RegistryKey::of::<K>(conn))?;
        downcast::<K>(&entry).ok()
    }

    /// Whether a wrapper of kind `K` exists for `conn`
    pub fn contains<K: TableKind>(&self, conn: &Connection) -> bool {
        self.wrappers.contains_key(&RegistryKey::of::<K>(conn))
    }

    /// Drop every wrapper of `conn`; returns how many were removed
    ///
    /// Callers still holding a wrapper keep using it; the next request
    /// for `conn` builds a fresh one.
    pub fn evict(&self, conn: &Connection) -> usize {
        let identity = conn.identity();
        let removed = self
            .wrappers
            .keys()
            .into_iter()
            .filter(|key| key.connection == identity)
            .filter(|key| self.wrappers.remove(key).is_some())
            .count();
        if removed > 0 {
            debug!(target: "dbmirror::registry", url = conn.url(), removed, "Evicted wrappers");
        }
        removed
    }

    /// Drop every wrapper
    pub fn clear(&self) {
        self.wrappers.clear();
    }

    /// Number of live wrappers
    pub fn len(&self) -> usize {
        self.wrappers.len()
    }

    /// True if no wrapper exists
    pub fn is_empty(&self) -> bool {
        self.wrappers.is_empty()
    }
}

fn downcast<K: TableKind>(value: &AnyWrapper) -> Result<Arc<DualWrite<K::Handler>>> {
    Arc::clone(value)
        .downcast::<DualWrite<K::Handler>>()
        .map_err(|_| Error::internal(format!("registry entry is not a {} wrapper", K::NAME)))
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("owner", &self.owner)
            .field("policy", &self.policy)
            .field("wrappers", &self.wrappers.len())
            .finish()
    }
}
