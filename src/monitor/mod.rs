//! Background memory monitor.
//!
//! Every set starts one monitor. It samples process memory on a fixed
//! interval and, once the set is large enough and the process is over its
//! memory ceiling, moves the set onto disk exactly once.

pub mod sampler;
pub mod scheduler;

pub use sampler::{MemorySampler, ProcessMemory};
pub use scheduler::{MonitorConfig, TickOutcome};
pub(crate) use scheduler::{MemoryMonitor, MonitorHandle};
