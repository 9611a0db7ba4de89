//! Two-tier storage for set elements.
//!
//! - **Memory**: In-process HashMap, where every set starts
//! - **Disk**: SQLite database in a scratch directory, used after migration
//!
//! A set owns exactly one tier at a time. [`Storage`] is the tagged variant
//! that records which; every operation dispatches through it.

pub mod disk_backend;
pub mod memory_backend;
pub mod types;

pub use disk_backend::DiskBackend;
pub use memory_backend::MemoryBackend;
pub use types::{canonicalize, Backend, Mode, StorageStats};

use crate::error::Result;

/// Active storage tier of a set.
#[derive(Debug)]
pub enum Storage {
    Memory(MemoryBackend),
    Disk(DiskBackend),
}

impl Default for Storage {
    fn default() -> Self {
        Storage::Memory(MemoryBackend::new())
    }
}

impl Storage {
    pub fn mode(&self) -> Mode {
        match self {
            Storage::Memory(_) => Mode::Memory,
            Storage::Disk(_) => Mode::Disk,
        }
    }

    /// The active backend.
    pub fn backend(&self) -> &dyn Backend {
        match self {
            Storage::Memory(memory) => memory,
            Storage::Disk(disk) => disk,
        }
    }

    /// The active backend, mutably.
    pub fn backend_mut(&mut self) -> &mut dyn Backend {
        match self {
            Storage::Memory(memory) => memory,
            Storage::Disk(disk) => disk,
        }
    }

    pub fn stats(&self) -> StorageStats {
        StorageStats {
            mode: self.mode(),
            elements: self.backend().count(),
            scratch_dir: match self {
                Storage::Memory(_) => None,
                Storage::Disk(disk) => Some(disk.path().to_path_buf()),
            },
        }
    }

    /// Move every element into `disk` and make it the active tier.
    ///
    /// The in-memory map is emptied so its allocation is released. Returns the
    /// number of elements copied. If the copy fails, `disk` is closed and the
    /// elements go back into the map, leaving the storage as it was. Calling
    /// this on a storage that is already on disk leaves it untouched and
    /// closes `disk`.
    pub fn spill(&mut self, mut disk: DiskBackend) -> Result<usize> {
        let memory = match self {
            Storage::Memory(memory) => memory,
            Storage::Disk(_) => {
                disk.close();
                return Ok(0);
            }
        };

        let elements = memory.take_all();
        if let Err(e) = disk.try_insert_many(elements.iter().map(String::as_str)) {
            memory.insert_many(&elements);
            disk.close();
            return Err(e);
        }

        *self = Storage::Disk(disk);
        Ok(elements.len())
    }

    /// Release everything held by the active tier and fall back to an empty
    /// in-memory map. Disk stores are closed and their directories removed.
    pub fn release(&mut self) {
        match std::mem::take(self) {
            Storage::Memory(mut memory) => memory.clear(),
            Storage::Disk(disk) => disk.close(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spill_moves_elements_to_disk() {
        let root = tempfile::tempdir().unwrap();
        let mut storage = Storage::default();
        storage.backend_mut().insert("a");
        storage.backend_mut().insert("b");

        let disk = DiskBackend::open(Some(root.path())).unwrap();
        assert_eq!(storage.spill(disk).unwrap(), 2);

        assert_eq!(storage.mode(), Mode::Disk);
        assert!(storage.backend().has("a"));
        assert_eq!(storage.backend().count(), 2);
        assert!(storage.stats().scratch_dir.is_some());
    }

    #[test]
    fn test_spill_on_disk_storage_is_noop() {
        let root = tempfile::tempdir().unwrap();
        let mut storage = Storage::default();
        storage.backend_mut().insert("a");
        storage.spill(DiskBackend::open(Some(root.path())).unwrap()).unwrap();
        let first_dir = storage.stats().scratch_dir.unwrap();

        let second = DiskBackend::open(Some(root.path())).unwrap();
        let second_dir = second.path().to_path_buf();
        assert_eq!(storage.spill(second).unwrap(), 0);

        assert_eq!(storage.stats().scratch_dir.unwrap(), first_dir);
        assert!(!second_dir.exists());
    }

    #[test]
    fn test_release_removes_scratch_dir() {
        let root = tempfile::tempdir().unwrap();
        let mut storage = Storage::default();
        storage.spill(DiskBackend::open(Some(root.path())).unwrap()).unwrap();
        let dir = storage.stats().scratch_dir.unwrap();

        storage.release();
        assert_eq!(storage.mode(), Mode::Memory);
        assert!(!dir.exists());
    }

    #[test]
    fn test_failed_copy_keeps_elements_in_memory() {
        let root = tempfile::tempdir().unwrap();
        let mut storage = Storage::default();
        storage.backend_mut().insert("a");
        storage.backend_mut().insert("b");

        let disk = DiskBackend::open(Some(root.path())).unwrap();
        let dir = disk.path().to_path_buf();
        disk.drop_table();

        assert!(storage.spill(disk).is_err());
        assert_eq!(storage.mode(), Mode::Memory);
        assert_eq!(storage.backend().count(), 2);
        assert!(storage.backend().has("a"));
        assert!(storage.backend().has("b"));
        assert!(!dir.exists());
    }
}
