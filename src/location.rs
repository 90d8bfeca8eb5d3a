//! Storage locations for embedded engines.
//!
//! A location is the registry key for a running engine: either the in-memory
//! sentinel or a directory on disk.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Directory string that selects in-memory mode.
pub const MEMORY_SENTINEL: &str = ":memory:";

/// Prefix of every embedded connection URL.
pub const URL_PREFIX: &str = "jdbc:swanlake:embedded:";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum StorageLocation {
    InMemory,
    Directory(PathBuf),
}

impl StorageLocation {
    /// Build a location from an optional directory string.
    ///
    /// `None`, an empty string and the literal `:memory:` all select
    /// in-memory mode. Directories are made absolute so that spellings of
    /// the same directory map to one registry key.
    pub fn from_directory(directory: Option<&str>) -> Self {
        match directory.map(str::trim) {
            None | Some("") => StorageLocation::InMemory,
            Some(MEMORY_SENTINEL) => StorageLocation::InMemory,
            Some(dir) => StorageLocation::Directory(normalize(Path::new(dir))),
        }
    }

    pub fn is_in_memory(&self) -> bool {
        matches!(self, StorageLocation::InMemory)
    }

    pub fn directory(&self) -> Option<&Path> {
        match self {
            StorageLocation::InMemory => None,
            StorageLocation::Directory(path) => Some(path.as_path()),
        }
    }

    /// Canonical connection URL for this location.
    pub fn jdbc_url(&self) -> String {
        match self {
            StorageLocation::InMemory => format!("{URL_PREFIX}{MEMORY_SENTINEL}"),
            StorageLocation::Directory(path) => format!("{URL_PREFIX}{}", path.display()),
        }
    }

    /// Parse a URL produced by [`StorageLocation::jdbc_url`].
    ///
    /// Returns `None` when the prefix is missing or nothing follows it.
    pub fn from_jdbc_url(url: &str) -> Option<Self> {
        let rest = url.strip_prefix(URL_PREFIX)?;
        if rest.is_empty() {
            return None;
        }
        Some(Self::from_directory(Some(rest)))
    }
}

/// Absolute, with `.` components and trailing separators dropped. `..` is
/// kept: resolving it lexically is wrong across symlinks.
fn normalize(path: &Path) -> PathBuf {
    std::path::absolute(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .components()
        .collect()
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageLocation::InMemory => f.write_str(MEMORY_SENTINEL),
            StorageLocation::Directory(path) => write!(f, "{}", path.display()),
        }
    }
}
