//! Mirroring engine
//!
//! This crate decides, per connection, whether table operations go to a
//! single store or are mirrored into a second one:
//! - Dual-write wrapper: writes to mirror then primary, reads from primary
//! - Registry: one wrapper per (table kind, connection), created lazily
//! - Router: maps connection URLs to a mirror connection and a backend
//! - Context and config: owner-scoped setup from `mirror.toml`
//!
//! Stores themselves live behind the `Backend` trait from `dbmirror-core`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod context;
pub mod dual_write;
pub mod kinds;
pub mod registry;
pub mod router;
pub mod testing;

pub use config::{BackendCatalog, MirrorConfig, RouteConfig, CONFIG_FILE_NAME};
pub use context::MirrorContext;
pub use dual_write::{DualWrite, MirrorFailurePolicy, MirrorStats, WrapperState};
pub use kinds::{LogEntryTable, SqlTable, TableKind};
pub use registry::HandlerRegistry;
pub use router::{ConnectionRouter, RoutingEntry};
