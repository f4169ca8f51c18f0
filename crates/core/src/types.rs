//! Connection types for the mirroring layer
//!
//! This module defines the foundational types:
//! - OwnerId: Scope of the application instance that created a connection
//! - Connection: A database connection as seen by table handlers
//! - ConnectionIdentity: (URL, owner) pair used for routing and caching

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Unique identifier for an owning application instance
///
/// An OwnerId is a wrapper around a UUID v4. Every connection belongs to
/// exactly one owner, and the same URL opened by two owners yields two
/// distinct connection identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerId(Uuid);

impl OwnerId {
    /// Create a new random OwnerId using UUID v4
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an OwnerId from a string representation
    ///
    /// Returns None if the string is not a valid UUID.
    pub fn from_string(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }

    /// Get the raw bytes of this OwnerId
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for OwnerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a physical connection: its URL under its owner
///
/// Two identities are equal iff they carry the same URL string and the
/// same owner. Used as the key for handler caches and wrapper registries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionIdentity {
    url: String,
    owner: OwnerId,
}

impl ConnectionIdentity {
    /// URL part of the identity
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Owner part of the identity
    pub fn owner(&self) -> OwnerId {
        self.owner
    }
}

impl fmt::Display for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.url, self.owner)
    }
}

/// A database connection
///
/// Carries the URL used to reach the store, an optional user, and the
/// owner that created it. The URL is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connection {
    url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user: Option<String>,
    owner: OwnerId,
}

impl Connection {
    /// Create a connection for `url` owned by `owner`
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConnection` if the URL is empty or blank.
    pub fn new(url: impl Into<String>, owner: OwnerId) -> Result<Self> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(Error::InvalidConnection(
                "connection URL must not be empty".to_string(),
            ));
        }
        Ok(Self {
            url,
            user: None,
            owner,
        })
    }

    /// Attach a user name to the connection
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// The connection URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The user, if any
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// The owning application instance
    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    /// The (URL, owner) identity of this connection
    pub fn identity(&self) -> ConnectionIdentity {
        ConnectionIdentity {
            url: self.url.clone(),
            owner: self.owner,
        }
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.user {
            Some(user) => write!(f, "{}@{}", user, self.url),
            None => f.write_str(&self.url),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_owner_id_unique() {
        assert_ne!(OwnerId::new(), OwnerId::new());
    }

    #[test]
    fn test_owner_id_string_roundtrip() {
        let owner = OwnerId::new();
        assert_eq!(OwnerId::from_string(&owner.to_string()), Some(owner));
        assert_eq!(OwnerId::from_string("not-a-uuid"), None);
    }

    #[test]
    fn test_connection_rejects_empty_url() {
        let owner = OwnerId::new();
        assert!(matches!(
            Connection::new("", owner),
            Err(Error::InvalidConnection(_))
        ));
        assert!(matches!(
            Connection::new("   ", owner),
            Err(Error::InvalidConnection(_))
        ));
    }

    #[test]
    fn test_identity_equal_for_same_url_and_owner() {
        let owner = OwnerId::new();
        let a = Connection::new("db://primary/a", owner).unwrap();
        let b = Connection::new("db://primary/a", owner)
            .unwrap()
            .with_user("admin");
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn test_identity_differs_by_owner() {
        let a = Connection::new("db://primary/a", OwnerId::new()).unwrap();
        let b = Connection::new("db://primary/a", OwnerId::new()).unwrap();
        assert_ne!(a.identity(), b.identity());
    }

    #[test]
    fn test_identity_differs_by_url() {
        let owner = OwnerId::new();
        let a = Connection::new("db://primary/a", owner).unwrap();
        let b = Connection::new("db://primary/b", owner).unwrap();
        let set: HashSet<_> = [a.identity(), b.identity()].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_connection_display() {
        let owner = OwnerId::new();
        let conn = Connection::new("db://primary/a", owner).unwrap();
        assert_eq!(conn.to_string(), "db://primary/a");
        let conn = conn.with_user("bob");
        assert_eq!(conn.to_string(), "bob@db://primary/a");
        assert_eq!(conn.user(), Some("bob"));
    }
}
