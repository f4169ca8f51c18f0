//! Mirroring configuration via `mirror.toml`
//!
//! Routes, the fallback backend and the mirror failure policy are read
//! from a TOML file. Backends are referred to by name and looked up in a
//! `BackendCatalog` when the configuration is applied; unknown names are
//! configuration errors.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use dbmirror_core::{Backend, Error, Result};

use crate::dual_write::MirrorFailurePolicy;

/// Conventional config file name
pub const CONFIG_FILE_NAME: &str = "mirror.toml";

/// One mirrored URL
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteConfig {
    /// Primary URL, matched exactly
    pub url: String,
    /// URL of the mirror store
    pub mirror: String,
    /// Name of the backend opening both stores
    pub backend: String,
}

/// Mirroring configuration loaded from `mirror.toml`.
///
/// # Example
///
/// ```toml
/// fallback = "sqlite"
/// on_mirror_failure = "abort"   # or "continue"
///
/// [[route]]
/// url = "db://primary/a"
/// mirror = "db://mirror/a"
/// backend = "sqlite"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MirrorConfig {
    /// Backend for connections without a route
    #[serde(default = "default_fallback")]
    pub fallback: String,
    /// What a write does when the mirror rejects it
    #[serde(default)]
    pub on_mirror_failure: MirrorFailurePolicy,
    /// Mirrored URLs
    #[serde(default, rename = "route", skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<RouteConfig>,
}

fn default_fallback() -> String {
    "sqlite".to_string()
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            fallback: default_fallback(),
            on_mirror_failure: MirrorFailurePolicy::default(),
            routes: Vec::new(),
        }
    }
}

impl MirrorConfig {
    /// Parse and validate a configuration
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: MirrorConfig = toml::from_str(content)
            .map_err(|e| Error::config(format!("Failed to parse mirror config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Serialize this configuration to TOML and write it to `path`
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::internal(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Policy for mirror failures
    pub fn failure_policy(&self) -> MirrorFailurePolicy {
        self.on_mirror_failure
    }

    fn validate(&self) -> Result<()> {
        if self.fallback.trim().is_empty() {
            return Err(Error::config("fallback backend name must not be empty"));
        }
        for (i, route) in self.routes.iter().enumerate() {
            if route.url.trim().is_empty() || route.mirror.trim().is_empty() {
                return Err(Error::config(format!(
                    "route #{} needs both 'url' and 'mirror'",
                    i + 1
                )));
            }
            if route.backend.trim().is_empty() {
                return Err(Error::config(format!("route #{} needs a 'backend'", i + 1)));
            }
        }
        Ok(())
    }
}

/// Named backends available to a configuration
#[derive(Default)]
pub struct BackendCatalog {
    backends: BTreeMap<String, Arc<dyn Backend>>,
}

impl BackendCatalog {
    /// Empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `backend` under its own name, replacing any previous one
    pub fn register(&mut self, backend: Arc<dyn Backend>) {
        self.backends.insert(backend.name().to_string(), backend);
    }

    /// Builder form of [`register`](Self::register)
    pub fn with(mut self, backend: Arc<dyn Backend>) -> Self {
        self.register(backend);
        self
    }

    /// Backend registered as `name`
    pub fn get(&self, name: &str) -> Result<Arc<dyn Backend>> {
        self.backends.get(name).cloned().ok_or_else(|| {
            Error::config(format!(
                "unknown backend '{}' (known: {})",
                name,
                self.names().join(", ")
            ))
        })
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }
}

impl std::fmt::Debug for BackendCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendCatalog")
            .field("backends", &self.names())
            .finish()
    }
}
