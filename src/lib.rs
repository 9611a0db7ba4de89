//! # stringset
//!
//! Concurrency-safe, case-insensitive set of strings that moves its elements
//! from an in-process HashMap to an on-disk SQLite store once the process is
//! under memory pressure.
//!
//! - [`storage`]: memory and disk backends behind one [`Backend`] contract
//! - [`monitor`]: background task that samples process memory and triggers
//!   the one-way migration
//! - [`StringSet`]: thread-safe facade dispatching to the active backend
//!
//! ```rust,no_run
//! use stringset::StringSet;
//!
//! let set = StringSet::from_elements(["Example.com", "example.COM", "other.org"]);
//! assert_eq!(set.len(), 2);
//! assert!(set.has("EXAMPLE.com"));
//! set.close();
//! ```

pub mod error;
pub mod monitor;
pub mod set;
pub mod storage;

pub use error::{Result, StringSetError};
pub use monitor::{MemorySampler, MonitorConfig, ProcessMemory, TickOutcome};
pub use set::{deduplicate, SetConfig, StringSet};
pub use storage::{Backend, Mode, StorageStats};
