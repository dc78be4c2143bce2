//! Freezer capabilities backed by a plain Linux host.
//!
//! Processes come from `/proc`, importance is `oom_score_adj`, and freezing is
//! job-control signals. There is no binder driver and no service binding
//! graph on Linux, so those parts report success and "no clients".

use launchfreeze_core::process_table::UNKNOWN_ADJ;
use launchfreeze_core::{
    Error, FreezePrimitive, ProcessHandle, ProcessRegistry, Result, PROCESS_NAME_SEPARATOR,
};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use procfs::process::Process;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

const CGROUP_V2_ROOT: &str = "/sys/fs/cgroup";

/// [`ProcessRegistry`] over `/proc`
pub struct ProcfsRegistry {
    cgroup_root: PathBuf,
    own_pid: u32,
}

impl ProcfsRegistry {
    pub fn new() -> Self {
        Self {
            cgroup_root: PathBuf::from(CGROUP_V2_ROOT),
            own_pid: std::process::id(),
        }
    }

    /// Build a handle for one `/proc` entry. Kernel threads (empty cmdline)
    /// and init are left out.
    fn handle_for(&self, process: &Process) -> Option<ProcessHandle> {
        let pid = u32::try_from(process.pid).ok()?;
        if pid <= 1 || pid == self.own_pid {
            return None;
        }

        let stat = process.stat().ok()?;
        let uid = process.uid().ok()?;
        let cmdline = process.cmdline().ok()?;
        let first = cmdline.into_iter().next()?;

        let name = match first.rsplit('/').next() {
            Some(base) if !base.is_empty() => base.to_string(),
            _ => stat.comm.clone(),
        };
        let package = package_of(&name);

        Some(ProcessHandle::new(pid, uid, &name, package, stat.starttime))
    }

    fn lookup(&self, handle: &ProcessHandle) -> Option<Process> {
        let process = Process::new(i32::try_from(handle.pid).ok()?).ok()?;
        let stat = process.stat().ok()?;
        (stat.starttime == handle.start_seq && stat.state != 'Z').then_some(process)
    }

    /// Path of the cgroup v2 `cgroup.freeze` file for `pid`, if the process
    /// sits in the unified hierarchy.
    fn freeze_file(&self, pid: u32) -> Option<PathBuf> {
        let cgroups = fs::read_to_string(format!("/proc/{}/cgroup", pid)).ok()?;
        let path = cgroups
            .lines()
            .find_map(|line| line.strip_prefix("0::"))?
            .trim_start_matches('/');
        Some(self.cgroup_root.join(path).join("cgroup.freeze"))
    }
}

impl Default for ProcfsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRegistry for ProcfsRegistry {
    fn live_processes(&self) -> Vec<ProcessHandle> {
        match procfs::process::all_processes() {
            Ok(all) => all
                .filter_map(|entry| entry.ok())
                .filter_map(|process| self.handle_for(&process))
                .collect(),
            Err(e) => {
                debug!("Failed to list /proc: {}", e);
                Vec::new()
            }
        }
    }

    fn adjustment_level(&self, process: &ProcessHandle) -> i32 {
        self.lookup(process)
            .and_then(|p| fs::read_to_string(format!("/proc/{}/oom_score_adj", p.pid)).ok())
            .and_then(|raw| parse_adj(&raw))
            .unwrap_or(UNKNOWN_ADJ)
    }

    fn is_frozen(&self, process: &ProcessHandle) -> bool {
        self.freeze_file(process.pid)
            .and_then(|path| fs::read_to_string(path).ok())
            .map_or(false, |value| value.trim() == "1")
    }

    fn bound_service_clients(&self, _process: &ProcessHandle) -> Vec<String> {
        Vec::new()
    }

    fn is_alive(&self, process: &ProcessHandle) -> bool {
        self.lookup(process).is_some()
    }
}

/// Package part of a process name (`com.app:worker` -> `com.app`)
pub fn package_of(process_name: &str) -> &str {
    process_name
        .split(PROCESS_NAME_SEPARATOR)
        .next()
        .unwrap_or(process_name)
}

/// Contents of `/proc/<pid>/oom_score_adj`
fn parse_adj(raw: &str) -> Option<i32> {
    raw.trim().parse().ok()
}

/// [`FreezePrimitive`] using SIGSTOP / SIGCONT
#[derive(Debug, Default)]
pub struct SignalFreezer;

impl SignalFreezer {
    pub fn new() -> Self {
        Self
    }

    fn signal(pid: u32, signal: Signal) -> Result<()> {
        let raw = i32::try_from(pid)
            .map_err(|_| Error::Primitive(format!("Invalid pid {}", pid)))?;

        kill(Pid::from_raw(raw), signal).map_err(|e| {
            Error::Primitive(format!("Failed to send {:?} to process {}: {}", signal, pid, e))
        })
    }
}

impl FreezePrimitive for SignalFreezer {
    fn freeze_binder(&self, _pid: u32, _freeze: bool, _timeout: Duration) -> Result<i32> {
        Ok(0)
    }

    fn set_process_frozen(&self, pid: u32, _uid: u32, frozen: bool) -> Result<()> {
        let signal = if frozen {
            Signal::SIGSTOP
        } else {
            Signal::SIGCONT
        };
        Self::signal(pid, signal)
    }
}
