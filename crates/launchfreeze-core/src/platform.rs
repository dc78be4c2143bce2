//! Capabilities the freezer consumes from its host.
//!
//! The process registry, the kernel freeze primitive and the CPU availability
//! service are owned by the host; the freezer only calls through these traits.

use crate::error::Result;
use crate::types::{CpuSet, ProcessHandle};
use std::sync::Arc;
use std::time::Duration;

/// Read-only view of live processes and their service bindings.
pub trait ProcessRegistry: Send + Sync {
    fn live_processes(&self) -> Vec<ProcessHandle>;

    /// Lower is more important.
    fn adjustment_level(&self, process: &ProcessHandle) -> i32;

    /// Frozen by the host's default freezer (not by this crate).
    fn is_frozen(&self, process: &ProcessHandle) -> bool;

    /// Package names of clients bound to services hosted by `process`.
    fn bound_service_clients(&self, process: &ProcessHandle) -> Vec<String>;

    fn is_alive(&self, process: &ProcessHandle) -> bool {
        process.pid != 0
    }
}

/// Kernel-level freeze operations.
pub trait FreezePrimitive: Send + Sync {
    /// Freeze or thaw the binder (IPC) channel of `pid`. Returns the driver's
    /// result code, 0 on success.
    fn freeze_binder(&self, pid: u32, freeze: bool, timeout: Duration) -> Result<i32>;

    fn set_process_frozen(&self, pid: u32, uid: u32, frozen: bool) -> Result<()>;
}

/// One availability sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CpuAvailabilityInfo {
    pub cpuset: CpuSet,
    /// Average idle share of the monitored cores, 0-100.
    pub latest_avg_availability_percent: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CpuMonitoringConfig {
    pub cpuset: CpuSet,
    pub threshold_percent: u32,
}

/// Receives availability samples on the source's own thread.
pub trait CpuAvailabilityListener: Send + Sync {
    fn on_availability_changed(&self, info: CpuAvailabilityInfo);

    fn on_monitoring_interval_changed(&self, _interval: Duration) {}
}

/// Periodic CPU availability samples.
pub trait CpuAvailabilitySource: Send + Sync {
    /// Fails with [`crate::Error::CpuMonitorUnavailable`] when the service is
    /// not running.
    fn subscribe(
        &self,
        config: CpuMonitoringConfig,
        listener: Arc<dyn CpuAvailabilityListener>,
    ) -> Result<()>;
}

/// The set of host capabilities a manager is built from.
#[derive(Clone)]
pub struct Platform {
    pub registry: Arc<dyn ProcessRegistry>,
    pub primitive: Arc<dyn FreezePrimitive>,
    pub cpu_source: Option<Arc<dyn CpuAvailabilitySource>>,
}

impl Platform {
    pub fn new(registry: Arc<dyn ProcessRegistry>, primitive: Arc<dyn FreezePrimitive>) -> Self {
        Self {
            registry,
            primitive,
            cpu_source: None,
        }
    }

    pub fn with_cpu_source(mut self, source: Arc<dyn CpuAvailabilitySource>) -> Self {
        self.cpu_source = Some(source);
        self
    }
}
