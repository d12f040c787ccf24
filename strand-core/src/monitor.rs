//! Process monitors.
//!
//! A [`Monitor`] observes every hash and compute process on every thread.
//! Monitors register globally; notification happens outside the registry
//! lock so a monitor may itself trigger evaluation (and hence nested
//! notifications) without deadlocking.
//!
//! [`PerformanceMonitor`] is the bundled implementation: it counts hash and
//! compute invocations per plug, which is the cheapest way to answer "did
//! the cache actually save us work here".

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::graph::PlugId;
use crate::process::{Process, ProcessKind};

/// Observer of hash and compute processes.
///
/// Callbacks run on the evaluating thread, inside the process they report
/// on, so implementations must be cheap and must not block.
pub trait Monitor: Send + Sync {
    /// Called after a process is pushed, before any work runs.
    fn process_started(&self, process: &Process) {
        let _ = process;
    }

    /// Called after the work finishes, before the process is popped.
    /// Runs during unwinding too, when the work failed or panicked.
    fn process_finished(&self, process: &Process) {
        let _ = process;
    }
}

fn registry() -> &'static RwLock<Vec<Arc<dyn Monitor>>> {
    static REGISTRY: OnceLock<RwLock<Vec<Arc<dyn Monitor>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(Vec::new()))
}

/// Registers a monitor for all subsequent processes, on all threads.
pub fn register_monitor(monitor: Arc<dyn Monitor>) {
    registry().write().push(monitor);
}

/// Removes a previously registered monitor. Identity is by allocation:
/// pass a clone of the `Arc` given to [`register_monitor`].
pub fn deregister_monitor(monitor: &Arc<dyn Monitor>) {
    registry()
        .write()
        .retain(|m| !Arc::ptr_eq(m, monitor));
}

fn snapshot() -> Vec<Arc<dyn Monitor>> {
    registry().read().clone()
}

pub(crate) fn notify_started(process: &Process) {
    for monitor in snapshot() {
        monitor.process_started(process);
    }
}

pub(crate) fn notify_finished(process: &Process) {
    for monitor in snapshot() {
        monitor.process_finished(process);
    }
}

/// Per-plug invocation counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlugStatistics {
    /// Number of hash processes run for the plug.
    pub hash_count: u64,
    /// Number of compute processes run for the plug.
    pub compute_count: u64,
}

/// A [`Monitor`] that counts hash and compute invocations per plug.
///
/// Register it, evaluate, then read [`statistics`](Self::statistics): a
/// compute count that stays flat across repeated evaluations is a cache
/// doing its job.
#[derive(Default)]
pub struct PerformanceMonitor {
    statistics: DashMap<PlugId, PlugStatistics>,
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts recorded for `plug` so far; zeros if it was never processed.
    pub fn statistics(&self, plug: PlugId) -> PlugStatistics {
        self.statistics
            .get(&plug)
            .map(|s| *s)
            .unwrap_or_default()
    }

    /// Total counts across every plug seen.
    pub fn totals(&self) -> PlugStatistics {
        let mut totals = PlugStatistics::default();
        for entry in self.statistics.iter() {
            totals.hash_count += entry.hash_count;
            totals.compute_count += entry.compute_count;
        }
        totals
    }

    /// Discards all recorded counts.
    pub fn reset(&self) {
        self.statistics.clear();
    }
}

impl Monitor for PerformanceMonitor {
    fn process_started(&self, process: &Process) {
        let mut stats = self.statistics.entry(process.plug()).or_default();
        match process.kind() {
            ProcessKind::Hash => stats.hash_count += 1,
            ProcessKind::Compute => stats.compute_count += 1,
        }
    }
}
