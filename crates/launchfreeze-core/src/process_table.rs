//! In-memory process table maintained by the process lifecycle caller.

use crate::platform::ProcessRegistry;
use crate::types::ProcessHandle;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::debug;

/// Adjustment level reported for processes the table does not know.
/// It is below every threshold, so unknown processes are never frozen.
pub const UNKNOWN_ADJ: i32 = i32::MIN;

#[derive(Debug, Clone)]
struct ProcessEntry {
    handle: ProcessHandle,
    adj: i32,
    frozen: bool,
    bound_clients: Vec<String>,
}

/// Live processes keyed by pid
#[derive(Debug, Default)]
pub struct ProcessTable {
    entries: RwLock<BTreeMap<u32, ProcessEntry>>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a started process. A previous entry with the same pid is
    /// replaced.
    pub fn add_process(&self, handle: ProcessHandle, adj: i32) {
        debug!("Process table: add {} adj={}", handle, adj);
        self.entries.write().insert(
            handle.pid,
            ProcessEntry {
                handle,
                adj,
                frozen: false,
                bound_clients: Vec::new(),
            },
        );
    }

    /// Remove a process that died. Ignored when the pid has since been
    /// reused by a process with another start sequence.
    pub fn remove_process(&self, pid: u32, start_seq: u64) -> bool {
        let mut entries = self.entries.write();
        match entries.get(&pid) {
            Some(entry) if entry.handle.start_seq == start_seq => {
                entries.remove(&pid);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, pid: u32) -> Option<ProcessHandle> {
        self.entries.read().get(&pid).map(|e| e.handle.clone())
    }

    pub fn find_by_name(&self, process_name: &str) -> Option<ProcessHandle> {
        self.entries
            .read()
            .values()
            .find(|e| e.handle.process_name == process_name)
            .map(|e| e.handle.clone())
    }

    pub fn set_adjustment_level(&self, pid: u32, adj: i32) -> bool {
        self.with_entry(pid, |entry| entry.adj = adj)
    }

    /// Mark the process as frozen (or thawed) by the default freezer.
    pub fn set_frozen(&self, pid: u32, frozen: bool) -> bool {
        self.with_entry(pid, |entry| entry.frozen = frozen)
    }

    pub fn bind_client(&self, pid: u32, client_package: &str) -> bool {
        self.with_entry(pid, |entry| {
            if !entry.bound_clients.iter().any(|c| c == client_package) {
                entry.bound_clients.push(client_package.to_string());
            }
        })
    }

    pub fn unbind_client(&self, pid: u32, client_package: &str) -> bool {
        self.with_entry(pid, |entry| entry.bound_clients.retain(|c| c != client_package))
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn with_entry(&self, pid: u32, f: impl FnOnce(&mut ProcessEntry)) -> bool {
        match self.entries.write().get_mut(&pid) {
            Some(entry) => {
                f(entry);
                true
            }
            None => false,
        }
    }

    fn lookup<T>(&self, process: &ProcessHandle, f: impl FnOnce(&ProcessEntry) -> T) -> Option<T> {
        self.entries
            .read()
            .get(&process.pid)
            .filter(|e| e.handle.start_seq == process.start_seq)
            .map(f)
    }
}

impl ProcessRegistry for ProcessTable {
    fn live_processes(&self) -> Vec<ProcessHandle> {
        self.entries.read().values().map(|e| e.handle.clone()).collect()
    }

    fn adjustment_level(&self, process: &ProcessHandle) -> i32 {
        self.lookup(process, |e| e.adj).unwrap_or(UNKNOWN_ADJ)
    }

    fn is_frozen(&self, process: &ProcessHandle) -> bool {
        self.lookup(process, |e| e.frozen).unwrap_or(false)
    }

    fn bound_service_clients(&self, process: &ProcessHandle) -> Vec<String> {
        self.lookup(process, |e| e.bound_clients.clone())
            .unwrap_or_default()
    }

    fn is_alive(&self, process: &ProcessHandle) -> bool {
        process.pid != 0 && self.lookup(process, |_| ()).is_some()
    }
}
