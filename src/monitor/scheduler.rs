//! Memory monitor task - periodic check that moves a set onto disk.
//!
//! The monitor runs on its own named thread driving a current-thread tokio
//! runtime, so sets can be created from synchronous code as well as from
//! inside another runtime. Each iteration waits for either the next tick or
//! the shutdown signal sent by [`crate::StringSet::close`].
//!
//! # Tick
//! 1. Read mode and element count under the set lock, then release it.
//! 2. Skip if already on disk, or if the set is at or below `size_floor`.
//! 3. Sample process memory (lock not held).
//! 4. At or above `memory_ceiling`, migrate under the set lock.
//!
//! The task ends after a successful migration. A failed migration keeps the
//! task alive and is retried on the next tick.

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::sampler::MemorySampler;
use crate::set::SetState;
use crate::storage::Mode;

const MIB: u64 = 1024 * 1024;
const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for the memory monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Whether a monitor task is started for each set
    pub enabled: bool,
    /// Time between memory samples, written as `"10s"`, `"250ms"` or a
    /// number of seconds
    #[serde(with = "duration_format")]
    pub sample_interval: Duration,
    /// Sets with this many elements or fewer are never migrated
    pub size_floor: usize,
    /// Process memory (bytes) at which a set is migrated
    pub memory_ceiling: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_interval: Duration::from_secs(10),
            size_floor: 1000,
            memory_ceiling: 750 * MIB,
        }
    }
}

impl MonitorConfig {
    /// Config with no background task; `poll_memory` still works.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

mod duration_format {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&humantime::format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum DurIn {
            Str(String),
            Secs(u64),
            FloatSecs(f64),
        }
        match DurIn::deserialize(deserializer)? {
            DurIn::Str(s) => humantime::parse_duration(&s)
                .map_err(|e| D::Error::custom(format!("invalid duration {s:?}: {e}"))),
            DurIn::Secs(n) => Ok(Duration::from_secs(n)),
            DurIn::FloatSecs(f) => {
                if !f.is_finite() || f < 0.0 {
                    return Err(D::Error::custom("duration must be a finite, non-negative number of seconds"));
                }
                Ok(Duration::from_secs_f64(f))
            }
        }
    }
}

/// What a single monitor tick decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The set was already on disk
    AlreadyOnDisk,
    /// The set has `size_floor` elements or fewer
    BelowFloor,
    /// The sampler returned no figure
    SampleUnavailable,
    /// Process memory is under the ceiling
    BelowCeiling,
    /// The set was moved to disk
    Migrated,
    /// Provisioning the disk store failed; the set stays in memory
    MigrationFailed,
}

impl TickOutcome {
    /// Whether the monitor has nothing left to do.
    pub fn is_final(self) -> bool {
        matches!(self, TickOutcome::AlreadyOnDisk | TickOutcome::Migrated)
    }
}

/// Periodic memory check bound to one set.
#[derive(Clone)]
pub(crate) struct MemoryMonitor {
    state: Arc<Mutex<SetState>>,
    config: MonitorConfig,
    sampler: Arc<dyn MemorySampler>,
}

impl MemoryMonitor {
    pub(crate) fn new(
        state: Arc<Mutex<SetState>>,
        config: MonitorConfig,
        sampler: Arc<dyn MemorySampler>,
    ) -> Self {
        Self {
            state,
            config,
            sampler,
        }
    }

    /// Run one check.
    pub(crate) fn tick(&self) -> TickOutcome {
        let (mode, count) = {
            let state = self.state.lock();
            (state.mode(), state.len())
        };

        if mode == Mode::Disk {
            return TickOutcome::AlreadyOnDisk;
        }
        if count <= self.config.size_floor {
            return TickOutcome::BelowFloor;
        }

        let Some(allocated) = self.sampler.allocated_bytes() else {
            return TickOutcome::SampleUnavailable;
        };
        if allocated < self.config.memory_ceiling {
            debug!(
                "Process memory {} bytes below ceiling {} bytes, set stays in memory",
                allocated, self.config.memory_ceiling
            );
            return TickOutcome::BelowCeiling;
        }

        info!(
            "Process memory {} bytes reached ceiling {} bytes, moving set of {} elements to disk",
            allocated, self.config.memory_ceiling, count
        );
        match self.state.lock().migrate() {
            Ok(_) => TickOutcome::Migrated,
            Err(e) => {
                warn!("Set migration failed, will retry on next tick: {}", e);
                TickOutcome::MigrationFailed
            }
        }
    }

    /// Start the background task. Returns `None` when the monitor is disabled
    /// or its thread could not be started.
    pub(crate) fn spawn(self) -> Option<MonitorHandle> {
        if !self.config.enabled {
            debug!("Memory monitor is disabled, skipping");
            return None;
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let spawned = std::thread::Builder::new()
            .name("stringset-monitor".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!("Failed to build memory monitor runtime: {}", e);
                        return;
                    }
                };
                runtime.block_on(self.run(shutdown_rx));
            });

        match spawned {
            Ok(thread) => Some(MonitorHandle {
                shutdown: Some(shutdown_tx),
                thread: Some(thread),
            }),
            Err(e) => {
                error!("Failed to start memory monitor thread: {}", e);
                None
            }
        }
    }

    async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        let period = self.config.sample_interval.max(MIN_SAMPLE_INTERVAL);
        debug!(
            "Starting memory monitor with {}ms interval",
            period.as_millis()
        );

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    debug!("Memory monitor received shutdown signal");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let outcome = self.tick();
            if outcome.is_final() {
                debug!("Memory monitor finished: {:?}", outcome);
                return;
            }
        }
    }
}

/// Owner's side of a running monitor.
#[derive(Debug)]
pub(crate) struct MonitorHandle {
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Signal the task and wait for its thread to exit.
    ///
    /// Must not be called while holding the set lock: a tick in progress may
    /// be waiting on it.
    pub(crate) fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            // The task may already have exited after migrating.
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Memory monitor thread panicked");
            }
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }
}
