use crate::error::{Error, Result};
use crate::types::{CpuSet, FOREGROUND_APP_ADJ, PERCEPTIBLE_APP_ADJ};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_LAUNCH_TIMEOUT_MS: u64 = 2000;
pub const DEFAULT_DELAY_UNFREEZE_MS: u64 = 1000;
pub const DEFAULT_CPU_USAGE_THRESHOLD: u32 = 60;
pub const DEFAULT_FREEZE_ADJ_THRESHOLD: i32 = PERCEPTIBLE_APP_ADJ + 1;
pub const DEFAULT_BINDER_TIMEOUT_MS: u64 = 2;

/// Freezer policy, loaded once and handed to the manager at construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FreezerConfig {
    /// Global feature switch (default: false)
    pub enabled: bool,

    /// Processes below this adjustment level are never frozen (default: 201)
    pub freeze_adj_threshold: i32,

    /// Only processes at or above this level are candidates (default: 0)
    pub foreground_adj_threshold: i32,

    /// At or below this level a process with bound clients is kept running
    /// (default: 200)
    pub perceptible_adj: i32,

    /// Automatic unfreeze when no launch-complete arrives (default: 2000)
    pub launch_timeout_ms: u64,

    /// Settle time before unfreezing after a non-warm launch (default: 1000)
    pub delay_unfreeze_ms: u64,

    /// Timeout for each binder freeze/unfreeze call (default: 2)
    pub binder_timeout_ms: u64,

    /// CPU load gating
    pub cpu_load_monitor: CpuLoadMonitorConfig,
}

/// CPU load gating configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuLoadMonitorConfig {
    /// Only freeze while the CPU is under high load (default: false)
    pub enabled: bool,

    /// CPU usage in percent above which the load counts as high (default: 60)
    pub usage_threshold: u32,

    /// Watch the background cpuset instead of all cores (default: true)
    pub background_cpuset: bool,
}

impl Default for FreezerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            freeze_adj_threshold: DEFAULT_FREEZE_ADJ_THRESHOLD,
            foreground_adj_threshold: FOREGROUND_APP_ADJ,
            perceptible_adj: PERCEPTIBLE_APP_ADJ,
            launch_timeout_ms: DEFAULT_LAUNCH_TIMEOUT_MS,
            delay_unfreeze_ms: DEFAULT_DELAY_UNFREEZE_MS,
            binder_timeout_ms: DEFAULT_BINDER_TIMEOUT_MS,
            cpu_load_monitor: CpuLoadMonitorConfig::default(),
        }
    }
}

impl Default for CpuLoadMonitorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            usage_threshold: DEFAULT_CPU_USAGE_THRESHOLD,
            background_cpuset: true,
        }
    }
}

impl CpuLoadMonitorConfig {
    pub fn cpuset(&self) -> CpuSet {
        if self.background_cpuset {
            CpuSet::Background
        } else {
            CpuSet::All
        }
    }
}

impl FreezerConfig {
    pub fn launch_timeout(&self) -> Duration {
        Duration::from_millis(self.launch_timeout_ms)
    }

    pub fn delay_unfreeze(&self) -> Duration {
        Duration::from_millis(self.delay_unfreeze_ms)
    }

    pub fn binder_timeout(&self) -> Duration {
        Duration::from_millis(self.binder_timeout_ms)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.cpu_load_monitor.usage_threshold > 100 {
            return Err(Error::Config(format!(
                "CPU usage threshold must be 0-100, got: {}",
                self.cpu_load_monitor.usage_threshold
            )));
        }

        if self.launch_timeout_ms == 0 {
            return Err(Error::Config("Launch timeout must be > 0".to_string()));
        }

        if self.delay_unfreeze_ms == 0 {
            return Err(Error::Config("Unfreeze delay must be > 0".to_string()));
        }

        if self.binder_timeout_ms == 0 {
            return Err(Error::Config("Binder timeout must be > 0".to_string()));
        }

        if self.foreground_adj_threshold > self.freeze_adj_threshold {
            return Err(Error::Config(format!(
                "Foreground adj threshold {} is above freeze adj threshold {}",
                self.foreground_adj_threshold, self.freeze_adj_threshold
            )));
        }

        Ok(())
    }
}
