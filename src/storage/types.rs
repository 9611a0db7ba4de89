//! Storage data structures and traits.
//!
//! Defines the backend contract shared by the memory and disk tiers.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which backend currently holds a set's elements.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// In-process hash map
    Memory,
    /// SQLite database in a private scratch directory
    Disk,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Memory => f.write_str("memory"),
            Mode::Disk => f.write_str("disk"),
        }
    }
}

/// Set primitives implemented by every storage tier.
///
/// Elements handed to a backend are already in canonical form (see
/// [`canonicalize`]). None of these methods fail: each backend decides how to
/// absorb its own errors.
pub trait Backend: Send {
    /// Returns true iff `element` is present.
    fn has(&self, element: &str) -> bool;

    /// Adds `element`. Adding an existing element is a no-op.
    fn insert(&mut self, element: &str);

    /// Adds every element of `elements`.
    fn insert_many(&mut self, elements: &[String]) {
        for element in elements {
            self.insert(element);
        }
    }

    /// Deletes `element`. Deleting an absent element is a no-op.
    fn remove(&mut self, element: &str);

    /// Unordered snapshot of every element.
    fn all(&self) -> Vec<String>;

    /// Number of elements.
    fn count(&self) -> usize;
}

/// Lowercase form used for every comparison and storage key.
#[inline]
pub fn canonicalize(element: &str) -> String {
    element.to_lowercase()
}

/// Point-in-time view of a set's storage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    /// Active backend
    pub mode: Mode,
    /// Number of elements in the active backend
    pub elements: usize,
    /// Scratch directory of the disk backend, once migrated
    pub scratch_dir: Option<PathBuf>,
}
