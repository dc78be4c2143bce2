use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Adjustment level of the process currently in the foreground.
pub const FOREGROUND_APP_ADJ: i32 = 0;

/// Highest adjustment level still considered perceptible to the user.
pub const PERCEPTIBLE_APP_ADJ: i32 = 200;

/// Separator between a package name and a secondary process suffix
/// (`com.example.app:remote`).
pub const PROCESS_NAME_SEPARATOR: char = ':';

/// A live OS process as reported by the process registry.
///
/// The adjustment level and the default freezer's frozen flag change over
/// time, so they are queried from the registry instead of being cached here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessHandle {
    pub pid: u32,
    pub uid: u32,
    pub process_name: String,
    pub package_name: String,
    /// Distinguishes two processes that were given the same pid.
    pub start_seq: u64,
}

impl ProcessHandle {
    pub fn new(pid: u32, uid: u32, process_name: &str, package_name: &str, start_seq: u64) -> Self {
        Self {
            pid,
            uid,
            process_name: process_name.to_string(),
            package_name: package_name.to_string(),
            start_seq,
        }
    }

    /// A process whose name carries no secondary suffix.
    pub fn is_main_process(&self) -> bool {
        is_main_process(&self.process_name)
    }

    /// Same pid and same start sequence.
    pub fn same_process(&self, other: &ProcessHandle) -> bool {
        self.pid == other.pid && self.start_seq == other.start_seq
    }
}

impl fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (pid={}, uid={})",
            self.process_name, self.pid, self.uid
        )
    }
}

/// Whether `name` denotes a package's main process.
pub fn is_main_process(name: &str) -> bool {
    !name.contains(PROCESS_NAME_SEPARATOR)
}

/// Why a freeze was requested for a launching package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreezeReason {
    FirstLaunch,
    WarmLaunch,
    ColdLaunch,
}

impl fmt::Display for FreezeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FirstLaunch => "First launch",
            Self::WarmLaunch => "Warm launch",
            Self::ColdLaunch => "Cold launch",
        };
        f.write_str(name)
    }
}

/// Why frozen processes are being released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnfreezeReason {
    CompleteLaunch,
    InterruptLaunch,
    Timeout,
    ProcessRemoved,
    CrossLaunch,
    DependentLaunch,
    Shutdown,
}

impl fmt::Display for UnfreezeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CompleteLaunch => "Complete launch",
            Self::InterruptLaunch => "Interrupt launch",
            Self::Timeout => "Launch timeout",
            Self::ProcessRemoved => "Remove main process",
            Self::CrossLaunch => "Cross launch process",
            Self::DependentLaunch => "Dependent launch",
            Self::Shutdown => "Freezer shutdown",
        };
        f.write_str(name)
    }
}

/// Which group of cores the CPU availability samples describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CpuSet {
    All,
    Background,
}

/// Freezer statistics
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreezerStats {
    pub freeze_requests: u64,
    pub skipped_requests: u64,
    pub packages_frozen: u64,
    pub processes_frozen: u64,
    pub processes_unfrozen: u64,
    pub freeze_failures: u64,
    pub unfreeze_failures: u64,
    pub timeouts: u64,
    pub cross_launch_flushes: u64,
    pub last_freeze_at: Option<DateTime<Utc>>,
    pub last_unfreeze_at: Option<DateTime<Utc>>,
}

impl FreezerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&mut self) {
        self.freeze_requests += 1;
    }

    pub fn record_skip(&mut self) {
        self.skipped_requests += 1;
    }

    // One package entered the Frozen state with `processes` frozen.
    pub fn record_package_frozen(&mut self, processes: usize) {
        self.packages_frozen += 1;
        self.processes_frozen += processes as u64;
        self.last_freeze_at = Some(Utc::now());
    }

    pub fn record_freeze_failure(&mut self) {
        self.freeze_failures += 1;
    }

    pub fn record_unfrozen(&mut self, processes: usize) {
        self.processes_unfrozen += processes as u64;
        if processes > 0 {
            self.last_unfreeze_at = Some(Utc::now());
        }
    }

    pub fn record_unfreeze_failure(&mut self) {
        self.unfreeze_failures += 1;
    }

    pub fn record_timeout(&mut self) {
        self.timeouts += 1;
    }

    pub fn record_cross_launch(&mut self) {
        self.cross_launch_flushes += 1;
    }
}
