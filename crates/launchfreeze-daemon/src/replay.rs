//! Replay a scripted sequence of launch events against a running manager.
//!
//! ```toml
//! [[event]]
//! at_ms = 0
//! action = "start_freeze"
//! package = "org.example.browser"
//! reason = "cold_launch"
//!
//! [[event]]
//! at_ms = 800
//! action = "start_unfreeze"
//! package = "org.example.browser"
//! reason = "complete_launch"
//! ```

use anyhow::{anyhow, bail, Context, Result};
use launchfreeze_core::{FreezeReason, FreezerManager, ProcessHandle, UnfreezeReason};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::{info, warn};

/// A parsed replay script
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Script {
    #[serde(default, rename = "event")]
    pub events: Vec<ScriptEvent>,
}

/// One `[[event]]` entry as written in the file
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptEvent {
    /// Offset from the start of the replay
    #[serde(default)]
    pub at_ms: u64,
    pub action: String,
    pub package: Option<String>,
    pub pid: Option<u32>,
    pub reason: toml::Value,
}

/// A validated event
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    StartFreeze {
        package: String,
        reason: FreezeReason,
    },
    StartUnfreeze {
        package: String,
        reason: UnfreezeReason,
    },
    UnfreezeDependent {
        pid: u32,
        reason: UnfreezeReason,
    },
}

impl ScriptEvent {
    pub fn to_action(&self) -> Result<Action> {
        match self.action.as_str() {
            "start_freeze" => Ok(Action::StartFreeze {
                package: self.require_package()?,
                reason: self.reason.clone().try_into::<FreezeReason>().with_context(|| {
                    format!("Invalid freeze reason at {}ms", self.at_ms)
                })?,
            }),
            "start_unfreeze" => Ok(Action::StartUnfreeze {
                package: self.require_package()?,
                reason: self.unfreeze_reason()?,
            }),
            "unfreeze_dependent" => Ok(Action::UnfreezeDependent {
                pid: self
                    .pid
                    .ok_or_else(|| anyhow!("Event at {}ms needs a pid", self.at_ms))?,
                reason: self.unfreeze_reason()?,
            }),
            other => bail!("Unknown action '{}' at {}ms", other, self.at_ms),
        }
    }

    fn require_package(&self) -> Result<String> {
        self.package
            .clone()
            .ok_or_else(|| anyhow!("Event at {}ms needs a package", self.at_ms))
    }

    fn unfreeze_reason(&self) -> Result<UnfreezeReason> {
        self.reason
            .clone()
            .try_into::<UnfreezeReason>()
            .with_context(|| format!("Invalid unfreeze reason at {}ms", self.at_ms))
    }
}

impl Script {
    pub fn parse(content: &str) -> Result<Self> {
        let script: Script = toml::from_str(content).context("Failed to parse replay script")?;
        for event in &script.events {
            event.to_action()?;
        }
        Ok(script)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content)
    }

    /// Validated actions in time order
    pub fn timeline(&self) -> Result<Vec<(Duration, Action)>> {
        let mut timeline = self
            .events
            .iter()
            .map(|e| Ok((Duration::from_millis(e.at_ms), e.to_action()?)))
            .collect::<Result<Vec<_>>>()?;
        timeline.sort_by_key(|(at, _)| *at);
        Ok(timeline)
    }
}

/// Feed `script` to `manager` at the scripted offsets; returns how many
/// events were dispatched.
pub async fn replay(manager: &FreezerManager, script: &Script) -> Result<usize> {
    let timeline = script.timeline()?;
    let start = Instant::now();
    let mut dispatched = 0;

    for (at, action) in timeline {
        sleep_until(start + at).await;

        match action {
            Action::StartFreeze { package, reason } => {
                info!("[{:?}] start freeze for {} ({})", at, package, reason);
                manager.start_freeze(&package, reason);
            }
            Action::StartUnfreeze { package, reason } => {
                info!("[{:?}] start unfreeze for {} ({})", at, package, reason);
                manager.start_unfreeze(&package, reason);
            }
            Action::UnfreezeDependent { pid, reason } => match tracked_process(manager, pid) {
                Some(process) => {
                    info!("[{:?}] unfreeze dependent {} ({})", at, process, reason);
                    manager.start_unfreeze_for_dependent_process(&process, reason);
                }
                None => {
                    warn!("[{:?}] pid {} is not on any freeze list, skipped", at, pid);
                    continue;
                }
            },
        }
        dispatched += 1;
    }

    manager.flush().await?;
    Ok(dispatched)
}

fn tracked_process(manager: &FreezerManager, pid: u32) -> Option<ProcessHandle> {
    manager
        .tracked_packages()
        .iter()
        .flat_map(|package| manager.frozen_processes(package))
        .find(|process| process.pid == pid)
}
