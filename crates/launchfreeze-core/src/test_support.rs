//! Fakes shared by the unit tests.

use crate::error::{Error, Result};
use crate::platform::{
    CpuAvailabilityListener, CpuAvailabilitySource, CpuMonitoringConfig, FreezePrimitive,
};
use crate::types::ProcessHandle;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveCall {
    Binder { pid: u32, freeze: bool },
    Process { pid: u32, frozen: bool },
}

/// Records every primitive call; individual pids can be made to fail.
#[derive(Debug, Default)]
pub struct RecordingPrimitive {
    calls: Mutex<Vec<PrimitiveCall>>,
    failing_binder: Mutex<HashSet<u32>>,
    failing_process: Mutex<HashSet<u32>>,
    thaw_delay: Option<Duration>,
}

impl RecordingPrimitive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each process-level thaw blocks the caller for `delay` before it lands.
    pub fn with_thaw_delay(delay: Duration) -> Self {
        Self {
            thaw_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn fail_binder(&self, pid: u32) {
        self.failing_binder.lock().insert(pid);
    }

    pub fn fail_process(&self, pid: u32) {
        self.failing_process.lock().insert(pid);
    }

    pub fn calls(&self) -> Vec<PrimitiveCall> {
        self.calls.lock().clone()
    }

    /// Pids whose last process-level call froze them.
    pub fn frozen_pids(&self) -> HashSet<u32> {
        let mut frozen = HashSet::new();
        for call in self.calls.lock().iter() {
            if let PrimitiveCall::Process { pid, frozen: f } = *call {
                if f {
                    frozen.insert(pid);
                } else {
                    frozen.remove(&pid);
                }
            }
        }
        frozen
    }
}

impl FreezePrimitive for RecordingPrimitive {
    fn freeze_binder(&self, pid: u32, freeze: bool, _timeout: Duration) -> Result<i32> {
        self.calls.lock().push(PrimitiveCall::Binder { pid, freeze });
        if freeze && self.failing_binder.lock().contains(&pid) {
            return Ok(-11);
        }
        Ok(0)
    }

    fn set_process_frozen(&self, pid: u32, _uid: u32, frozen: bool) -> Result<()> {
        if self.failing_process.lock().contains(&pid) {
            return Err(Error::Primitive(format!("cgroup write failed for {}", pid)));
        }
        if let (false, Some(delay)) = (frozen, self.thaw_delay) {
            std::thread::sleep(delay);
        }
        self.calls.lock().push(PrimitiveCall::Process { pid, frozen });
        Ok(())
    }
}

/// CPU source that keeps the listener so tests can push samples.
#[derive(Default)]
pub struct ManualCpuSource {
    pub unavailable: bool,
    subscriptions: Mutex<Vec<(CpuMonitoringConfig, Arc<dyn CpuAvailabilityListener>)>>,
}

impl ManualCpuSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    pub fn last_config(&self) -> Option<CpuMonitoringConfig> {
        self.subscriptions.lock().last().map(|(c, _)| *c)
    }

    pub fn push(&self, availability_percent: u32) {
        for (config, listener) in self.subscriptions.lock().iter() {
            listener.on_availability_changed(crate::platform::CpuAvailabilityInfo {
                cpuset: config.cpuset,
                latest_avg_availability_percent: availability_percent,
            });
        }
    }
}

impl CpuAvailabilitySource for ManualCpuSource {
    fn subscribe(
        &self,
        config: CpuMonitoringConfig,
        listener: Arc<dyn CpuAvailabilityListener>,
    ) -> Result<()> {
        if self.unavailable {
            return Err(Error::CpuMonitorUnavailable("no cpu monitor service".to_string()));
        }
        self.subscriptions.lock().push((config, listener));
        Ok(())
    }
}

pub fn process(pid: u32, name: &str) -> ProcessHandle {
    let package = name.split(':').next().unwrap_or(name);
    ProcessHandle::new(pid, 10000 + pid, name, package, u64::from(pid))
}
