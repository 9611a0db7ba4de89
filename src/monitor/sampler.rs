//! Process memory sampling.

use log::warn;
use parking_lot::Mutex;
use sysinfo::{Pid, System};

/// Source of the process memory figure the monitor compares against its
/// ceiling.
///
/// `None` means no sample could be taken; the monitor never migrates on a
/// missing sample.
pub trait MemorySampler: Send + Sync {
    fn allocated_bytes(&self) -> Option<u64>;
}

impl<F> MemorySampler for F
where
    F: Fn() -> Option<u64> + Send + Sync,
{
    fn allocated_bytes(&self) -> Option<u64> {
        self()
    }
}

/// Resident memory of the current process, read through `sysinfo`.
pub struct ProcessMemory {
    pid: Option<Pid>,
    system: Mutex<System>,
}

impl std::fmt::Debug for ProcessMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessMemory").field("pid", &self.pid).finish()
    }
}

impl Default for ProcessMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessMemory {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!("Process memory sampling unavailable: {}", e);
                None
            }
        };

        Self {
            pid,
            system: Mutex::new(System::new()),
        }
    }
}

impl MemorySampler for ProcessMemory {
    fn allocated_bytes(&self) -> Option<u64> {
        let pid = self.pid?;
        let mut system = self.system.lock();
        if !system.refresh_process(pid) {
            return None;
        }
        system.process(pid).map(|process| process.memory())
    }
}
