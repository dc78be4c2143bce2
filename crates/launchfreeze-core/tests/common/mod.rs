// Shared fakes for the launch scenario tests

#![allow(dead_code)]

use launchfreeze_core::{
    CpuAvailabilityInfo, CpuAvailabilityListener, CpuAvailabilitySource, CpuMonitoringConfig,
    Error, FreezePrimitive, FreezerConfig, Platform, ProcessHandle, ProcessTable, Result,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    FreezeBinder(u32),
    ThawBinder(u32),
    Freeze(u32),
    Thaw(u32),
}

#[derive(Default)]
pub struct Recorder {
    calls: Mutex<Vec<Call>>,
    broken: Mutex<HashSet<u32>>,
}

impl Recorder {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Make the process-level freeze fail for `pid`.
    pub fn break_pid(&self, pid: u32) {
        self.broken.lock().insert(pid);
    }

    pub fn frozen(&self) -> HashSet<u32> {
        let mut frozen = HashSet::new();
        for call in self.calls.lock().iter() {
            match *call {
                Call::Freeze(pid) => {
                    frozen.insert(pid);
                }
                Call::Thaw(pid) => {
                    frozen.remove(&pid);
                }
                _ => {}
            }
        }
        frozen
    }

    pub fn count(&self, wanted: Call) -> usize {
        self.calls.lock().iter().filter(|c| **c == wanted).count()
    }
}

impl FreezePrimitive for Recorder {
    fn freeze_binder(&self, pid: u32, freeze: bool, _timeout: Duration) -> Result<i32> {
        let call = if freeze {
            Call::FreezeBinder(pid)
        } else {
            Call::ThawBinder(pid)
        };
        self.calls.lock().push(call);
        Ok(0)
    }

    fn set_process_frozen(&self, pid: u32, _uid: u32, frozen: bool) -> Result<()> {
        if frozen && self.broken.lock().contains(&pid) {
            return Err(Error::Primitive(format!("freezer write failed for {}", pid)));
        }
        let call = if frozen { Call::Freeze(pid) } else { Call::Thaw(pid) };
        self.calls.lock().push(call);
        Ok(())
    }
}

#[derive(Default)]
pub struct PushCpuSource {
    listeners: Mutex<Vec<Arc<dyn CpuAvailabilityListener>>>,
}

impl PushCpuSource {
    pub fn push(&self, availability_percent: u32) {
        for listener in self.listeners.lock().iter() {
            listener.on_availability_changed(CpuAvailabilityInfo {
                cpuset: launchfreeze_core::CpuSet::Background,
                latest_avg_availability_percent: availability_percent,
            });
        }
    }
}

impl CpuAvailabilitySource for PushCpuSource {
    fn subscribe(
        &self,
        _config: CpuMonitoringConfig,
        listener: Arc<dyn CpuAvailabilityListener>,
    ) -> Result<()> {
        self.listeners.lock().push(listener);
        Ok(())
    }
}

pub struct Host {
    pub table: Arc<ProcessTable>,
    pub recorder: Arc<Recorder>,
}

impl Host {
    pub fn new() -> Self {
        Self {
            table: Arc::new(ProcessTable::new()),
            recorder: Arc::new(Recorder::default()),
        }
    }

    pub fn platform(&self) -> Platform {
        Platform::new(self.table.clone(), self.recorder.clone())
    }

    /// Register a live process and return its handle.
    pub fn launch(&self, pid: u32, name: &str, adj: i32) -> ProcessHandle {
        let package = name.split(':').next().unwrap_or(name);
        let handle = ProcessHandle::new(pid, 10_000 + pid, name, package, u64::from(pid) * 7);
        self.table.add_process(handle.clone(), adj);
        handle
    }
}

pub fn enabled_config() -> FreezerConfig {
    FreezerConfig {
        enabled: true,
        ..FreezerConfig::default()
    }
}
