//! Connection hash identifiers.
//!
//! The hash is handed to the connection by the client API and carried
//! opaquely; it only shows up in logs.

use std::fmt;
use uuid::Uuid;

/// Opaque session hash of a client connection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionHash(String);

impl ConnectionHash {
    /// Create a new random hash
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ConnectionHash {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionHash {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for ConnectionHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
