//! Which processes are frozen, and for which launching package.
//!
//! Only the sequencer writes. The locks let other threads read a
//! consistent view; lock order is always `packages` then `reasons`.

use crate::types::{FreezeReason, ProcessHandle};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use tracing::error;

/// Everything frozen on behalf of one launching package
#[derive(Debug, Clone, PartialEq)]
pub struct FreezeRecord {
    pub package: String,
    pub reason: FreezeReason,
    pub processes: Vec<ProcessHandle>,
}

/// Result of dropping a single process from the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRemoval {
    pub package: String,
    /// The process was the last one; the package entry is gone too.
    pub package_released: bool,
}

#[derive(Debug, Default)]
pub struct StateRegistry {
    packages: Mutex<HashMap<String, BTreeMap<u32, ProcessHandle>>>,
    reasons: Mutex<HashMap<String, FreezeReason>>,
}

impl StateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `processes` for `package`. Nothing is recorded for an
    /// empty set, so a tracked package always has at least one process.
    pub fn record(&self, package: &str, reason: FreezeReason, processes: Vec<ProcessHandle>) -> bool {
        if processes.is_empty() {
            return false;
        }
        let set: BTreeMap<u32, ProcessHandle> =
            processes.into_iter().map(|p| (p.pid, p)).collect();

        let mut packages = self.packages.lock();
        let mut reasons = self.reasons.lock();
        packages.insert(package.to_string(), set);
        reasons.insert(package.to_string(), reason);
        true
    }

    /// Stop tracking `package`, returning what was frozen for it.
    pub fn take(&self, package: &str) -> Option<FreezeRecord> {
        let mut packages = self.packages.lock();
        let mut reasons = self.reasons.lock();
        let processes = packages.remove(package)?;
        let reason = match reasons.remove(package) {
            Some(reason) => reason,
            None => {
                // Same delay policy as any launch that is not warm
                error!("No freeze reason logged for {}", package);
                FreezeReason::ColdLaunch
            }
        };

        Some(FreezeRecord {
            package: package.to_string(),
            reason,
            processes: processes.into_values().collect(),
        })
    }

    /// Drop one process from whichever package froze it.
    pub fn remove_process(&self, process: &ProcessHandle) -> Option<ProcessRemoval> {
        let mut packages = self.packages.lock();
        let package = packages
            .iter()
            .find(|(_, set)| Self::holds(set, process))
            .map(|(name, _)| name.clone())?;

        let now_empty = match packages.get_mut(&package) {
            Some(set) => {
                set.remove(&process.pid);
                set.is_empty()
            }
            None => false,
        };

        if now_empty {
            packages.remove(&package);
            self.reasons.lock().remove(&package);
        }

        Some(ProcessRemoval {
            package,
            package_released: now_empty,
        })
    }

    pub fn contains_package(&self, package: &str) -> bool {
        self.packages.lock().contains_key(package)
    }

    pub fn contains_process(&self, process: &ProcessHandle) -> bool {
        self.package_of(process).is_some()
    }

    /// The package whose launch froze `process`, if any.
    pub fn package_of(&self, process: &ProcessHandle) -> Option<String> {
        self.packages
            .lock()
            .iter()
            .find(|(_, set)| Self::holds(set, process))
            .map(|(name, _)| name.clone())
    }

    pub fn tracked_packages(&self) -> Vec<String> {
        let mut names: Vec<String> = self.packages.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn frozen_processes(&self, package: &str) -> Vec<ProcessHandle> {
        self.packages
            .lock()
            .get(package)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn last_reason(&self, package: &str) -> Option<FreezeReason> {
        self.reasons.lock().get(package).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.lock().is_empty()
    }

    fn holds(set: &BTreeMap<u32, ProcessHandle>, process: &ProcessHandle) -> bool {
        set.get(&process.pid)
            .map_or(false, |tracked| tracked.same_process(process))
    }
}
