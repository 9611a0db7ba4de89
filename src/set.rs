//! Case-insensitive, thread-safe string set.
//!
//! Elements are lowercased before storage, so `"Test"` and `"TEST"` are the
//! same member. A [`StringSet`] keeps its elements in a HashMap until the
//! background memory monitor decides the process is short on memory; it then
//! moves them into a SQLite store in a private scratch directory. The move is
//! one way and happens at most once. Callers see the same results before and
//! after.
//!
//! # Thread Safety
//! Every operation, including the migration, holds one exclusive lock for its
//! whole duration. Operations that take another set (`union`, `subtract`,
//! `intersect`) snapshot it first under its own lock and only then lock the
//! receiver, so two sets are never locked at once.

use log::{debug, info};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{Result, StringSetError};
use crate::monitor::{
    MemoryMonitor, MemorySampler, MonitorConfig, MonitorHandle, ProcessMemory, TickOutcome,
};
use crate::storage::{canonicalize, DiskBackend, Mode, Storage, StorageStats};

const SEPARATOR: char = ',';

// ================================================================================================
// CONFIGURATION
// ================================================================================================

/// Configuration for a [`StringSet`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetConfig {
    /// Memory monitor settings
    pub monitor: MonitorConfig,
    /// Directory in which the disk store's scratch directory is created.
    /// Defaults to the system temp directory.
    pub scratch_root: Option<PathBuf>,
}

// ================================================================================================
// SHARED STATE
// ================================================================================================

/// Everything guarded by the set lock.
#[derive(Debug)]
pub(crate) struct SetState {
    storage: Storage,
    scratch_root: Option<PathBuf>,
}

impl SetState {
    fn new(scratch_root: Option<PathBuf>) -> Self {
        Self {
            storage: Storage::default(),
            scratch_root,
        }
    }

    pub(crate) fn mode(&self) -> Mode {
        self.storage.mode()
    }

    pub(crate) fn len(&self) -> usize {
        self.storage.backend().count()
    }

    /// Move all elements to a freshly provisioned disk store.
    ///
    /// If provisioning or the copy fails the set is left in memory, untouched.
    /// Returns the number of elements moved; 0 if already on disk.
    pub(crate) fn migrate(&mut self) -> Result<usize> {
        if self.mode() == Mode::Disk {
            return Ok(0);
        }

        let disk = DiskBackend::open(self.scratch_root.as_deref())?;
        let path = disk.path().to_path_buf();
        let moved = self.storage.spill(disk)?;

        info!("Moved {} set elements to disk store at {}", moved, path.display());
        Ok(moved)
    }
}

// ================================================================================================
// STRING SET
// ================================================================================================

/// Case-insensitive string set that moves to disk under memory pressure.
pub struct StringSet {
    state: Arc<Mutex<SetState>>,
    monitor: MemoryMonitor,
    handle: Mutex<Option<MonitorHandle>>,
}

impl fmt::Debug for StringSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("StringSet")
            .field("mode", &state.mode())
            .field("len", &state.len())
            .finish()
    }
}

impl Default for StringSet {
    fn default() -> Self {
        Self::new()
    }
}

impl StringSet {
    /// Empty set with the default configuration and a running monitor.
    pub fn new() -> Self {
        Self::with_config(SetConfig::default(), Arc::new(ProcessMemory::new()))
    }

    /// Set pre-populated with `elements`.
    pub fn from_elements<I, S>(elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set = Self::new();
        set.extend_from(elements);
        set
    }

    /// Empty set with explicit configuration and memory sampler.
    pub fn with_config(config: SetConfig, sampler: Arc<dyn MemorySampler>) -> Self {
        let state = Arc::new(Mutex::new(SetState::new(config.scratch_root)));
        let monitor = MemoryMonitor::new(Arc::clone(&state), config.monitor, sampler);
        let handle = monitor.clone().spawn();

        Self {
            state,
            monitor,
            handle: Mutex::new(handle),
        }
    }

    // ============================================================================================
    // MEMBERSHIP
    // ============================================================================================

    /// Returns true if the set contains `element`, ignoring case.
    pub fn has(&self, element: &str) -> bool {
        let element = canonicalize(element);
        self.state.lock().storage.backend().has(&element)
    }

    /// Adds `element`.
    pub fn insert(&self, element: &str) {
        let element = canonicalize(element);
        self.state.lock().storage.backend_mut().insert(&element);
    }

    /// Adds every element in `elements`.
    pub fn insert_many<I, S>(&self, elements: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extend_from(elements);
    }

    /// Deletes `element`. Absent elements are ignored.
    pub fn remove(&self, element: &str) {
        let element = canonicalize(element);
        self.state.lock().storage.backend_mut().remove(&element);
    }

    /// Every element, in no particular order.
    pub fn slice(&self) -> Vec<String> {
        self.state.lock().storage.backend().all()
    }

    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ============================================================================================
    // SET ALGEBRA
    // ============================================================================================

    /// Adds every element of `other`.
    pub fn union(&self, other: &StringSet) {
        let elements = other.slice();
        self.state.lock().storage.backend_mut().insert_many(&elements);
    }

    /// Removes every element of `other`.
    pub fn subtract(&self, other: &StringSet) {
        let elements = other.slice();
        let mut state = self.state.lock();
        let backend = state.storage.backend_mut();
        for element in &elements {
            backend.remove(element);
        }
    }

    /// Keeps only the elements also found in `other`.
    pub fn intersect(&self, other: &StringSet) {
        let missing: Vec<String> = self
            .slice()
            .into_iter()
            .filter(|element| !other.has(element))
            .collect();
        if missing.is_empty() {
            return;
        }

        let mut state = self.state.lock();
        let backend = state.storage.backend_mut();
        for element in &missing {
            backend.remove(element);
        }
    }

    // ============================================================================================
    // PARSING
    // ============================================================================================

    /// Inserts each comma-separated, whitespace-trimmed token of `input`.
    ///
    /// Only a wholly empty `input` is rejected; empty tokens such as the one
    /// in `"a,,b"` are inserted as the empty element.
    pub fn parse_and_insert(&self, input: &str) -> Result<()> {
        if input.is_empty() {
            return Err(StringSetError::EmptyInput);
        }

        let elements: Vec<String> = input
            .split(SEPARATOR)
            .map(|token| canonicalize(token.trim()))
            .collect();
        self.state.lock().storage.backend_mut().insert_many(&elements);
        Ok(())
    }

    // ============================================================================================
    // STORAGE
    // ============================================================================================

    /// Which backend currently holds the elements.
    pub fn mode(&self) -> Mode {
        self.state.lock().mode()
    }

    pub fn stats(&self) -> StorageStats {
        self.state.lock().storage.stats()
    }

    /// Move the set to disk now, without waiting for memory pressure.
    ///
    /// Returns the number of elements moved (0 if already on disk). Unlike
    /// the monitor, this reports provisioning and copy failures; the set stays in
    /// memory when it fails.
    pub fn migrate_to_disk(&self) -> Result<usize> {
        self.state.lock().migrate()
    }

    /// Run one memory check immediately, as the monitor would on its next
    /// tick.
    pub fn poll_memory(&self) -> TickOutcome {
        self.monitor.tick()
    }

    /// Whether the background monitor task is still running.
    pub fn is_monitoring(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stops the monitor and releases all storage. Disk stores are closed and
    /// their scratch directory deleted.
    ///
    /// The set must not be used afterwards. Calling `close` again is a no-op.
    pub fn close(&self) {
        // Taken out first: the monitor may need the set lock to finish a tick.
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            handle.stop();
        }

        let mut state = self.state.lock();
        if state.mode() == Mode::Disk {
            debug!("Closing disk-backed set");
        }
        state.storage.release();
    }

    fn extend_from<I, S>(&self, elements: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let elements: Vec<String> = elements
            .into_iter()
            .map(|element| canonicalize(element.as_ref()))
            .collect();
        if elements.is_empty() {
            return;
        }
        self.state.lock().storage.backend_mut().insert_many(&elements);
    }
}

impl Drop for StringSet {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Display for StringSet {
    /// Comma-joined elements, in no particular order.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let elements = self.slice();
        f.write_str(&elements.join(","))
    }
}

impl FromStr for StringSet {
    type Err = StringSetError;

    fn from_str(s: &str) -> Result<Self> {
        let set = Self::new();
        set.parse_and_insert(s)?;
        Ok(set)
    }
}

impl<S: AsRef<str>> FromIterator<S> for StringSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::from_elements(iter)
    }
}

impl<S: AsRef<str>> Extend<S> for StringSet {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        self.extend_from(iter);
    }
}

/// Unique elements of `input`, compared case-insensitively, in no particular
/// order. Results are lowercased.
pub fn deduplicate<S: AsRef<str>>(input: &[S]) -> Vec<String> {
    let config = SetConfig {
        monitor: MonitorConfig::disabled(),
        ..SetConfig::default()
    };
    let set = StringSet::with_config(config, Arc::new(ProcessMemory::new()));
    set.insert_many(input);
    let elements = set.slice();
    set.close();
    elements
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn quiet_set(scratch_root: &std::path::Path) -> StringSet {
        let config = SetConfig {
            monitor: MonitorConfig::disabled(),
            scratch_root: Some(scratch_root.to_path_buf()),
        };
        StringSet::with_config(config, Arc::new(|| -> Option<u64> { None }))
    }

    fn members(set: &StringSet) -> HashSet<String> {
        set.slice().into_iter().collect()
    }

    #[test]
    fn test_migrate_keeps_members() {
        let root = tempfile::tempdir().unwrap();
        let set = quiet_set(root.path());
        set.insert_many(["Test1", "test2", "TEST3"]);

        assert_eq!(set.migrate_to_disk().unwrap(), 3);
        assert_eq!(set.mode(), Mode::Disk);
        assert_eq!(set.len(), 3);
        assert!(set.has("test1"));
        assert!(set.has("Test3"));
    }

    #[test]
    fn test_migrate_twice_is_noop() {
        let root = tempfile::tempdir().unwrap();
        let set = quiet_set(root.path());
        set.insert("a");

        set.migrate_to_disk().unwrap();
        let dir = set.stats().scratch_dir.unwrap();
        assert_eq!(set.migrate_to_disk().unwrap(), 0);
        assert_eq!(set.stats().scratch_dir.unwrap(), dir);
    }

    #[test]
    fn test_migrate_failure_leaves_set_in_memory() {
        let root = tempfile::tempdir().unwrap();
        let set = quiet_set(&root.path().join("missing"));
        set.insert_many(["a", "b"]);

        assert!(set.migrate_to_disk().is_err());
        assert_eq!(set.mode(), Mode::Memory);
        assert_eq!(members(&set), HashSet::from(["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn test_parse_rejects_empty_input_without_mutation() {
        let root = tempfile::tempdir().unwrap();
        let set = quiet_set(root.path());
        set.insert("keep");

        let err = set.parse_and_insert("").unwrap_err();
        assert!(matches!(err, StringSetError::EmptyInput));
        assert_eq!(set.slice(), vec!["keep".to_string()]);
    }

    #[test]
    fn test_parse_keeps_empty_tokens() {
        let root = tempfile::tempdir().unwrap();
        let set = quiet_set(root.path());

        set.parse_and_insert("a,, B ").unwrap();
        assert_eq!(set.len(), 3);
        assert!(set.has(""));
        assert!(set.has("b"));
    }

    #[test]
    fn test_union_with_self() {
        let root = tempfile::tempdir().unwrap();
        let set = quiet_set(root.path());
        set.insert_many(["a", "b"]);

        set.union(&set);
        set.intersect(&set);
        assert_eq!(set.len(), 2);

        set.subtract(&set);
        assert!(set.is_empty());
    }

    #[test]
    fn test_close_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let set = quiet_set(root.path());
        set.insert("a");
        set.migrate_to_disk().unwrap();
        let dir = set.stats().scratch_dir.unwrap();

        set.close();
        set.close();
        assert!(!dir.exists());
        assert_eq!(set.mode(), Mode::Memory);
    }

    #[test]
    fn test_set_config_from_json() {
        let config: SetConfig = serde_json::from_str(
            r#"{"monitor": {"size_floor": 5}, "scratch_root": "/tmp/scratch"}"#,
        )
        .unwrap();
        assert_eq!(config.monitor.size_floor, 5);
        assert!(config.monitor.enabled);
        assert_eq!(config.scratch_root, Some(PathBuf::from("/tmp/scratch")));
    }
}
