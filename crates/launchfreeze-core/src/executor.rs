use crate::decision::{DecisionEngine, Eligibility};
use crate::platform::FreezePrimitive;
use crate::types::ProcessHandle;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Result of one freeze attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreezeOutcome {
    Frozen,
    Skipped(Eligibility),
    Failed,
}

/// Result of one unfreeze attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnfreezeOutcome {
    Unfrozen,
    /// Owned by the default freezer, or already dead
    Skipped,
    /// At least one stage reported an error
    Failed,
}

/// Drives the freeze primitive for single processes
#[derive(Clone)]
pub struct FreezeExecutor {
    primitive: Arc<dyn FreezePrimitive>,
    engine: DecisionEngine,
    binder_timeout: Duration,
}

impl FreezeExecutor {
    pub fn new(
        primitive: Arc<dyn FreezePrimitive>,
        engine: DecisionEngine,
        binder_timeout: Duration,
    ) -> Self {
        Self {
            primitive,
            engine,
            binder_timeout,
        }
    }

    /// Freeze one process
    ///
    /// Algorithm:
    /// 1. Re-check the freeze gate (state may have changed since selection)
    /// 2. Freeze the binder channel with a short timeout; stop on failure
    /// 3. Freeze the process itself; on failure thaw the binder again
    ///
    /// Returns true only when both stages succeeded. Failures are logged and
    /// never retried.
    pub fn freeze(&self, process: &ProcessHandle) -> bool {
        self.try_freeze(process) == FreezeOutcome::Frozen
    }

    /// [`FreezeExecutor::freeze`], telling a skip apart from a failure.
    pub fn try_freeze(&self, process: &ProcessHandle) -> FreezeOutcome {
        let verdict = self.engine.evaluate(process);
        if !verdict.is_eligible() {
            debug!(" *skip freeze: {}. {}", verdict, process);
            return FreezeOutcome::Skipped(verdict);
        }

        match self
            .primitive
            .freeze_binder(process.pid, true, self.binder_timeout)
        {
            Ok(0) => debug!("  freeze binder: {}", process),
            Ok(rc) => {
                warn!(" *unable to freeze binder for {}: rc={}", process, rc);
                return FreezeOutcome::Failed;
            }
            Err(e) => {
                warn!(" *unable to freeze binder for {}: {}", process, e);
                return FreezeOutcome::Failed;
            }
        }

        if let Err(e) = self
            .primitive
            .set_process_frozen(process.pid, process.uid, true)
        {
            warn!(" *unable to freeze process {}: {}", process, e);
            self.thaw_binder(process);
            return FreezeOutcome::Failed;
        }

        debug!("  freeze process: {}", process);
        FreezeOutcome::Frozen
    }

    /// Unfreeze one process: process stage first, then binder.
    ///
    /// Both stages run regardless of how the earlier freeze went, so calling
    /// this for a process that is not frozen is harmless.
    pub fn unfreeze(&self, process: &ProcessHandle) -> UnfreezeOutcome {
        if let Some(reason) = self.engine.should_skip_unfreeze(process) {
            debug!(" *skip unfreeze: {}. {}", reason, process);
            return UnfreezeOutcome::Skipped;
        }

        let mut outcome = UnfreezeOutcome::Unfrozen;

        match self
            .primitive
            .set_process_frozen(process.pid, process.uid, false)
        {
            Ok(()) => debug!("  unfreeze process: {}", process),
            Err(e) => {
                warn!(" *unable to unfreeze process {}: {}", process, e);
                outcome = UnfreezeOutcome::Failed;
            }
        }

        if !self.thaw_binder(process) {
            outcome = UnfreezeOutcome::Failed;
        }

        outcome
    }

    fn thaw_binder(&self, process: &ProcessHandle) -> bool {
        match self
            .primitive
            .freeze_binder(process.pid, false, self.binder_timeout)
        {
            Ok(0) => {
                debug!("  unfreeze binder: {}", process);
                true
            }
            Ok(rc) => {
                warn!(" *unable to unfreeze binder for {}: rc={}", process, rc);
                false
            }
            Err(e) => {
                warn!(" *unable to unfreeze binder for {}: {}", process, e);
                false
            }
        }
    }
}
