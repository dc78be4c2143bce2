//! LaunchFreeze Core Library
//!
//! Freezes background processes for the duration of an app launch so the
//! launching app gets the CPU, and unfreezes them when the launch completes,
//! is interrupted or times out.

pub mod config;
pub mod cpu_monitor;
pub mod decision;
pub mod error;
pub mod executor;
pub mod manager;
pub mod platform;
pub mod process_table;
pub mod registry;
mod sequencer;
pub mod types;

#[cfg(test)]
mod test_support;

pub use config::{CpuLoadMonitorConfig, FreezerConfig};
pub use cpu_monitor::CpuLoadMonitor;
pub use decision::{DecisionEngine, Eligibility};
pub use error::{Error, Result};
pub use executor::{FreezeExecutor, FreezeOutcome, UnfreezeOutcome};
pub use manager::FreezerManager;
pub use platform::{
    CpuAvailabilityInfo, CpuAvailabilityListener, CpuAvailabilitySource, CpuMonitoringConfig,
    FreezePrimitive, Platform, ProcessRegistry,
};
pub use process_table::ProcessTable;
pub use registry::{FreezeRecord, StateRegistry};
pub use types::{
    is_main_process, CpuSet, FreezeReason, FreezerStats, ProcessHandle, UnfreezeReason,
    FOREGROUND_APP_ADJ, PERCEPTIBLE_APP_ADJ, PROCESS_NAME_SEPARATOR,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
