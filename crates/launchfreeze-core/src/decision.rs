//! Which background processes may be frozen for a launch.

use crate::config::FreezerConfig;
use crate::platform::ProcessRegistry;
use crate::types::ProcessHandle;
use std::fmt;
use std::sync::Arc;

/// Outcome of the per-process freeze gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    FrozenByDefaultFreezer,
    Dead,
    BelowAdjThreshold { adj: i32 },
    HasBoundClient { adj: i32 },
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Self::Eligible)
    }
}

impl fmt::Display for Eligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eligible => write!(f, "eligible"),
            Self::FrozenByDefaultFreezer => write!(f, "process is frozen by default freezer"),
            Self::Dead => write!(f, "process is dead"),
            Self::BelowAdjThreshold { adj } => write!(f, "process's adj {} is below threshold", adj),
            Self::HasBoundClient { adj } => {
                write!(f, "process's service has bound client (adj {})", adj)
            }
        }
    }
}

/// Candidate selection and the per-process freeze gate
#[derive(Clone)]
pub struct DecisionEngine {
    registry: Arc<dyn ProcessRegistry>,
    foreground_adj_threshold: i32,
    freeze_adj_threshold: i32,
    perceptible_adj: i32,
}

impl DecisionEngine {
    pub fn new(registry: Arc<dyn ProcessRegistry>, config: &FreezerConfig) -> Self {
        Self {
            registry,
            foreground_adj_threshold: config.foreground_adj_threshold,
            freeze_adj_threshold: config.freeze_adj_threshold,
            perceptible_adj: config.perceptible_adj,
        }
    }

    pub fn registry(&self) -> &Arc<dyn ProcessRegistry> {
        &self.registry
    }

    pub fn freeze_adj_threshold(&self) -> i32 {
        self.freeze_adj_threshold
    }

    /// Live processes at or above the foreground threshold that do not
    /// belong to `launching_package`. No side effects.
    pub fn select_freeze_candidates(&self, launching_package: &str) -> Vec<ProcessHandle> {
        self.registry
            .live_processes()
            .into_iter()
            .filter(|p| p.package_name != launching_package)
            .filter(|p| self.registry.adjustment_level(p) >= self.foreground_adj_threshold)
            .collect()
    }

    /// Evaluated at freeze time; state may have moved since selection.
    pub fn evaluate(&self, process: &ProcessHandle) -> Eligibility {
        if self.registry.is_frozen(process) {
            return Eligibility::FrozenByDefaultFreezer;
        }
        if !self.registry.is_alive(process) {
            return Eligibility::Dead;
        }

        let adj = self.registry.adjustment_level(process);
        if adj < self.freeze_adj_threshold {
            return Eligibility::BelowAdjThreshold { adj };
        }
        if adj <= self.perceptible_adj && self.has_any_bound_client(process) {
            return Eligibility::HasBoundClient { adj };
        }

        Eligibility::Eligible
    }

    pub fn is_eligible_to_freeze(&self, process: &ProcessHandle) -> bool {
        self.evaluate(process).is_eligible()
    }

    /// Unfreeze gate: skipped only when the default freezer owns the
    /// process or it is gone. There is no policy gate on unfreeze.
    pub fn should_skip_unfreeze(&self, process: &ProcessHandle) -> Option<Eligibility> {
        if self.registry.is_frozen(process) {
            Some(Eligibility::FrozenByDefaultFreezer)
        } else if !self.registry.is_alive(process) {
            Some(Eligibility::Dead)
        } else {
            None
        }
    }

    /// Any client at all is bound to a service hosted by `process`.
    pub fn has_any_bound_client(&self, process: &ProcessHandle) -> bool {
        !self.registry.bound_service_clients(process).is_empty()
    }

    /// A client from exactly `package` is bound to a service hosted by
    /// `process`.
    pub fn is_bound_to_package(&self, process: &ProcessHandle, package: &str) -> bool {
        self.registry
            .bound_service_clients(process)
            .iter()
            .any(|client| client == package)
    }
}
