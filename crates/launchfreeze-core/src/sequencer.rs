//! Serial worker that owns every freeze/unfreeze transition.
//!
//! Requests from any thread are queued on one channel and handled in order
//! by a single task. Launch timeouts and delayed unfreezes sit in a
//! [`DelayQueue`] keyed by `(package, TimerKind)` so a competing request for
//! the same package can cancel them.
//!
//! Per package: Idle -> Freezing -> Frozen -> Unfreezing -> Idle.

use crate::config::FreezerConfig;
use crate::cpu_monitor::CpuLoadMonitor;
use crate::decision::DecisionEngine;
use crate::executor::{FreezeExecutor, FreezeOutcome, UnfreezeOutcome};
use crate::platform::CpuAvailabilityInfo;
use crate::registry::StateRegistry;
use crate::types::{is_main_process, FreezeReason, FreezerStats, ProcessHandle, UnfreezeReason};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::poll_fn;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::time::{delay_queue, DelayQueue};
use tracing::{debug, debug_span, error, info};

/// Messages handled by the worker
#[derive(Debug)]
pub(crate) enum Command {
    BeginFreeze {
        package: String,
        reason: FreezeReason,
    },
    EndFreezeForPackage {
        package: String,
        reason: UnfreezeReason,
    },
    EndFreezeForProcess {
        process: ProcessHandle,
        reason: UnfreezeReason,
    },
    CpuSample(CpuAvailabilityInfo),
    /// Acknowledged once everything queued before it has run
    Flush(oneshot::Sender<()>),
    /// Release every package, acknowledge, stop
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TimerKind {
    LaunchTimeout,
    DelayedUnfreeze,
}

enum Event {
    Timer(String, TimerKind),
    Command(Option<Command>),
}

pub(crate) struct Sequencer {
    config: FreezerConfig,
    engine: DecisionEngine,
    executor: FreezeExecutor,
    state: Arc<StateRegistry>,
    cpu_monitor: Arc<CpuLoadMonitor>,
    stats: Arc<Mutex<FreezerStats>>,
    timers: DelayQueue<(String, TimerKind)>,
    timer_keys: HashMap<(String, TimerKind), delay_queue::Key>,
}

impl Sequencer {
    pub(crate) fn new(
        config: FreezerConfig,
        engine: DecisionEngine,
        executor: FreezeExecutor,
        state: Arc<StateRegistry>,
        cpu_monitor: Arc<CpuLoadMonitor>,
        stats: Arc<Mutex<FreezerStats>>,
    ) -> Self {
        Self {
            config,
            engine,
            executor,
            state,
            cpu_monitor,
            stats,
            timers: DelayQueue::new(),
            timer_keys: HashMap::new(),
        }
    }

    /// Process commands until shutdown or until every sender is dropped.
    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        info!("Freezer sequencer started");

        loop {
            let event = tokio::select! {
                biased;

                // Expired deadlines go first; they were due before anything
                // still waiting in the channel.
                Some(expired) = poll_fn(|cx| self.timers.poll_expired(cx)) => {
                    let (package, kind) = expired.into_inner();
                    Event::Timer(package, kind)
                }

                command = commands.recv() => Event::Command(command),
            };

            match event {
                Event::Timer(package, kind) => self.on_timer(package, kind),
                Event::Command(Some(Command::Shutdown(ack))) => {
                    self.release_all(UnfreezeReason::Shutdown);
                    let _ = ack.send(());
                    break;
                }
                Event::Command(Some(command)) => self.handle(command),
                Event::Command(None) => {
                    self.release_all(UnfreezeReason::Shutdown);
                    break;
                }
            }
        }

        info!("Freezer sequencer stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::BeginFreeze { package, reason } => self.begin_freeze(package, reason),
            Command::EndFreezeForPackage { package, reason } => {
                self.request_unfreeze(package, reason)
            }
            Command::EndFreezeForProcess { process, reason } => {
                self.unfreeze_process(&process, reason)
            }
            Command::CpuSample(info) => {
                self.cpu_monitor.record_sample(&info);
            }
            Command::Flush(ack) => {
                let _ = ack.send(());
            }
            Command::Shutdown(ack) => {
                let _ = ack.send(());
            }
        }
    }

    fn on_timer(&mut self, package: String, kind: TimerKind) {
        self.timer_keys.remove(&(package.clone(), kind));
        match kind {
            TimerKind::LaunchTimeout => {
                self.stats.lock().record_timeout();
                self.end_freeze(&package, UnfreezeReason::Timeout);
            }
            TimerKind::DelayedUnfreeze => {
                self.end_freeze(&package, UnfreezeReason::CompleteLaunch);
            }
        }
    }

    /// Idle -> Freezing -> Frozen, or stay Idle when a guard fails.
    fn begin_freeze(&mut self, package: String, reason: FreezeReason) {
        self.stats.lock().record_request();

        if !is_main_process(&package) {
            debug!("Skip freeze: {} is not a main process", package);
            return self.skip();
        }

        if self.state.contains_package(&package) {
            debug!("Already triggered freeze for {}", package);
            return self.skip();
        }

        if self.config.cpu_load_monitor.enabled && !self.cpu_monitor.is_high_load() {
            debug!(
                "Skip freeze: skip reason: CPU load is low when launching {}",
                package
            );
            return self.skip();
        }

        // At most one launch holds a freeze set at any time
        for other in self.state.tracked_packages() {
            self.stats.lock().record_cross_launch();
            self.end_freeze(&other, UnfreezeReason::CrossLaunch);
        }

        let candidates = self.engine.select_freeze_candidates(&package);
        if candidates.is_empty() {
            debug!(
                "Skip freeze: skip reason: No proper processes to freeze for {}",
                package
            );
            return self.skip();
        }

        let span = debug_span!("freeze_package", package = %package, reason = %reason);
        let _enter = span.enter();
        debug!(
            "# start freeze processes which adj >= {} for {}, reason: {}",
            self.engine.freeze_adj_threshold(),
            package,
            reason
        );

        let mut frozen = Vec::with_capacity(candidates.len());
        let mut failures = 0;
        for candidate in candidates {
            match self.executor.try_freeze(&candidate) {
                FreezeOutcome::Frozen => frozen.push(candidate),
                FreezeOutcome::Failed => failures += 1,
                FreezeOutcome::Skipped(_) => {}
            }
        }

        let count = frozen.len();
        {
            let mut stats = self.stats.lock();
            for _ in 0..failures {
                stats.record_freeze_failure();
            }
        }

        if !self.state.record(&package, reason, frozen) {
            debug!("Skip freeze: no process could be frozen for {}", package);
            return self.skip();
        }

        debug!("# number of processes to freeze is {} for {}", count, package);
        self.stats.lock().record_package_frozen(count);
        self.arm(&package, TimerKind::LaunchTimeout, self.config.launch_timeout());
    }

    /// Caller-requested unfreeze; a complete cold or first launch waits for
    /// the settle delay first.
    fn request_unfreeze(&mut self, package: String, reason: UnfreezeReason) {
        if !self.state.contains_package(&package) {
            debug!("No freeze in effect for {}, ignoring {}", package, reason);
            return;
        }

        self.cancel(&package, TimerKind::LaunchTimeout);

        let warm = self.state.last_reason(&package) == Some(FreezeReason::WarmLaunch);
        if reason == UnfreezeReason::CompleteLaunch && !warm {
            if self.is_armed(&package, TimerKind::DelayedUnfreeze) {
                debug!("Delayed unfreeze already pending for {}", package);
                return;
            }
            debug!(
                "Delay unfreeze for {} by {:?}",
                package,
                self.config.delay_unfreeze()
            );
            self.arm(&package, TimerKind::DelayedUnfreeze, self.config.delay_unfreeze());
        } else {
            self.end_freeze(&package, reason);
        }
    }

    /// Frozen -> Unfreezing -> Idle. The record is dropped only after its
    /// timers are cancelled and every process has been unfrozen.
    fn end_freeze(&mut self, package: &str, reason: UnfreezeReason) {
        if !self.state.contains_package(package) {
            error!("Already triggered unfreeze for {}", package);
            return;
        }

        self.cancel(package, TimerKind::LaunchTimeout);
        self.cancel(package, TimerKind::DelayedUnfreeze);

        let span = debug_span!("unfreeze_package", package = %package, reason = %reason);
        let _enter = span.enter();
        debug!("= start unfreeze processes for {}, reason: {}", package, reason);

        let processes = self.state.frozen_processes(package);
        let (mut unfrozen, mut failures) = (0, 0);
        for process in &processes {
            match self.executor.unfreeze(process) {
                UnfreezeOutcome::Unfrozen => unfrozen += 1,
                UnfreezeOutcome::Failed => failures += 1,
                UnfreezeOutcome::Skipped => {}
            }
        }
        debug!(
            "= number of processes to unfreeze is {} for {}",
            processes.len(),
            package
        );

        self.state.take(package);

        let mut stats = self.stats.lock();
        stats.record_unfrozen(unfrozen);
        for _ in 0..failures {
            stats.record_unfreeze_failure();
        }
    }

    /// Release a single process; the rest of its package stays frozen.
    fn unfreeze_process(&mut self, process: &ProcessHandle, reason: UnfreezeReason) {
        let Some(package) = self.state.package_of(process) else {
            debug!(
                "Skip unfreeze service: {} has been removed from freeze list",
                process
            );
            return;
        };

        let span = debug_span!("unfreeze_process", pid = process.pid, reason = %reason);
        let _enter = span.enter();
        debug!("= start unfreeze service: {}, reason: {}", process, reason);

        let outcome = self.executor.unfreeze(process);
        {
            let mut stats = self.stats.lock();
            match outcome {
                UnfreezeOutcome::Unfrozen => stats.record_unfrozen(1),
                UnfreezeOutcome::Failed => stats.record_unfreeze_failure(),
                UnfreezeOutcome::Skipped => {}
            }
        }

        // Last process out: cancel timers before the record goes
        if self.state.frozen_processes(&package).len() == 1 {
            debug!("No frozen processes left for {}", package);
            self.cancel(&package, TimerKind::LaunchTimeout);
            self.cancel(&package, TimerKind::DelayedUnfreeze);
        }
        self.state.remove_process(process);
    }

    fn release_all(&mut self, reason: UnfreezeReason) {
        for package in self.state.tracked_packages() {
            self.end_freeze(&package, reason);
        }
    }

    fn skip(&self) {
        self.stats.lock().record_skip();
    }

    fn arm(&mut self, package: &str, kind: TimerKind, delay: Duration) {
        self.cancel(package, kind);
        let key = self.timers.insert((package.to_string(), kind), delay);
        self.timer_keys.insert((package.to_string(), kind), key);
    }

    fn cancel(&mut self, package: &str, kind: TimerKind) {
        if let Some(key) = self.timer_keys.remove(&(package.to_string(), kind)) {
            self.timers.remove(&key);
        }
    }

    fn is_armed(&self, package: &str, kind: TimerKind) -> bool {
        self.timer_keys.contains_key(&(package.to_string(), kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CpuLoadMonitorConfig;
    use crate::process_table::ProcessTable;
    use crate::test_support::{process, PrimitiveCall, RecordingPrimitive};
    use crate::types::CpuSet;

    struct Harness {
        table: Arc<ProcessTable>,
        primitive: Arc<RecordingPrimitive>,
        state: Arc<StateRegistry>,
        stats: Arc<Mutex<FreezerStats>>,
        commands: mpsc::UnboundedSender<Command>,
    }

    fn sequencer(
        config: FreezerConfig,
        table: Arc<ProcessTable>,
        primitive: Arc<RecordingPrimitive>,
    ) -> Sequencer {
        let engine = DecisionEngine::new(table, &config);
        let executor = FreezeExecutor::new(primitive, engine.clone(), config.binder_timeout());
        let cpu_monitor = Arc::new(CpuLoadMonitor::new(&config.cpu_load_monitor));
        Sequencer::new(
            config,
            engine,
            executor,
            Arc::new(StateRegistry::new()),
            cpu_monitor,
            Arc::new(Mutex::new(FreezerStats::new())),
        )
    }

    impl Harness {
        fn start(config: FreezerConfig) -> Self {
            let table = Arc::new(ProcessTable::new());
            let primitive = Arc::new(RecordingPrimitive::new());
            let sequencer = sequencer(config, table.clone(), primitive.clone());
            let state = sequencer.state.clone();
            let stats = sequencer.stats.clone();

            let (commands, rx) = mpsc::unbounded_channel();
            tokio::spawn(sequencer.run(rx));

            Self {
                table,
                primitive,
                state,
                stats,
                commands,
            }
        }

        fn send(&self, command: Command) {
            self.commands.send(command).unwrap();
        }

        fn freeze(&self, package: &str, reason: FreezeReason) {
            self.send(Command::BeginFreeze {
                package: package.to_string(),
                reason,
            });
        }

        fn unfreeze(&self, package: &str, reason: UnfreezeReason) {
            self.send(Command::EndFreezeForPackage {
                package: package.to_string(),
                reason,
            });
        }

        async fn flush(&self) {
            let (tx, rx) = oneshot::channel();
            self.send(Command::Flush(tx));
            rx.await.unwrap();
        }
    }

    fn config() -> FreezerConfig {
        FreezerConfig {
            enabled: true,
            ..FreezerConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_freeze_records_and_arms_timeout() {
        let h = Harness::start(config());
        h.table.add_process(process(200, "com.app.b"), 900);

        h.freeze("com.app.a", FreezeReason::ColdLaunch);
        h.flush().await;

        assert_eq!(h.state.tracked_packages(), vec!["com.app.a"]);
        assert!(h.primitive.frozen_pids().contains(&200));

        tokio::time::sleep(Duration::from_millis(2001)).await;
        h.flush().await;

        assert!(h.state.is_empty());
        assert!(h.primitive.frozen_pids().is_empty());
        assert_eq!(h.stats.lock().timeouts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_secondary_process_name_is_ignored() {
        let h = Harness::start(config());
        h.table.add_process(process(200, "com.app.b"), 900);

        h.freeze("com.app.a:remote", FreezeReason::ColdLaunch);
        h.flush().await;

        assert!(h.state.is_empty());
        assert!(h.primitive.calls().is_empty());
        assert_eq!(h.stats.lock().skipped_requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_freeze_is_noop() {
        let h = Harness::start(config());
        h.table.add_process(process(200, "com.app.b"), 900);

        h.freeze("com.app.a", FreezeReason::ColdLaunch);
        h.freeze("com.app.a", FreezeReason::WarmLaunch);
        h.flush().await;

        assert_eq!(h.primitive.calls().len(), 2);
        assert_eq!(h.state.last_reason("com.app.a"), Some(FreezeReason::ColdLaunch));
    }

    #[tokio::test(start_paused = true)]
    async fn test_warm_launch_complete_unfreezes_immediately() {
        let h = Harness::start(config());
        h.table.add_process(process(200, "com.app.b"), 900);

        h.freeze("com.app.a", FreezeReason::WarmLaunch);
        h.unfreeze("com.app.a", UnfreezeReason::CompleteLaunch);
        h.flush().await;

        assert!(h.state.is_empty());
        assert!(h.primitive.frozen_pids().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cold_launch_complete_waits_for_delay() {
        let h = Harness::start(config());
        h.table.add_process(process(200, "com.app.b"), 900);

        h.freeze("com.app.a", FreezeReason::ColdLaunch);
        h.unfreeze("com.app.a", UnfreezeReason::CompleteLaunch);
        h.flush().await;
        assert!(h.primitive.frozen_pids().contains(&200));

        tokio::time::sleep(Duration::from_millis(999)).await;
        h.flush().await;
        assert!(h.state.contains_package("com.app.a"));

        tokio::time::sleep(Duration::from_millis(2)).await;
        h.flush().await;
        assert!(h.state.is_empty());
        assert!(h.primitive.frozen_pids().is_empty());

        // The launch timeout was cancelled by the complete-launch request
        tokio::time::sleep(Duration::from_millis(3000)).await;
        h.flush().await;
        assert_eq!(h.stats.lock().timeouts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_cancels_pending_delayed_unfreeze() {
        let h = Harness::start(config());
        h.table.add_process(process(200, "com.app.b"), 900);

        h.freeze("com.app.a", FreezeReason::FirstLaunch);
        h.unfreeze("com.app.a", UnfreezeReason::CompleteLaunch);
        h.unfreeze("com.app.a", UnfreezeReason::InterruptLaunch);
        h.flush().await;
        assert!(h.state.is_empty());

        let calls_after_interrupt = h.primitive.calls().len();
        tokio::time::sleep(Duration::from_millis(5000)).await;
        h.flush().await;

        assert_eq!(h.primitive.calls().len(), calls_after_interrupt);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cross_launch_unfreezes_before_freezing() {
        let h = Harness::start(config());
        h.table.add_process(process(200, "com.app.b"), 900);
        h.table.add_process(process(300, "com.app.c"), 900);

        h.freeze("com.app.a", FreezeReason::ColdLaunch);
        h.freeze("com.app.b", FreezeReason::ColdLaunch);
        h.flush().await;

        assert_eq!(h.state.tracked_packages(), vec!["com.app.b"]);
        assert_eq!(h.state.frozen_processes("com.app.b").len(), 1);
        assert_eq!(h.stats.lock().cross_launch_flushes, 1);

        let calls = h.primitive.calls();
        let last_unfreeze = calls
            .iter()
            .rposition(|c| matches!(c, PrimitiveCall::Process { frozen: false, .. }))
            .unwrap();
        let second_freeze = calls
            .iter()
            .enumerate()
            .filter(|(_, c)| matches!(c, PrimitiveCall::Process { frozen: true, .. }))
            .map(|(i, _)| i)
            .nth(2)
            .unwrap();
        assert!(last_unfreeze < second_freeze);
        assert_eq!(h.primitive.frozen_pids(), [300].into_iter().collect());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cpu_gate_blocks_freeze_under_low_load() {
        let mut config = config();
        config.cpu_load_monitor = CpuLoadMonitorConfig {
            enabled: true,
            ..CpuLoadMonitorConfig::default()
        };
        let h = Harness::start(config);
        h.table.add_process(process(200, "com.app.b"), 900);

        h.freeze("com.app.a", FreezeReason::ColdLaunch);
        h.flush().await;
        assert!(h.state.is_empty());

        h.send(Command::CpuSample(CpuAvailabilityInfo {
            cpuset: CpuSet::Background,
            latest_avg_availability_percent: 10,
        }));
        h.freeze("com.app.a", FreezeReason::ColdLaunch);
        h.flush().await;
        assert!(h.state.contains_package("com.app.a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_eligible_candidates_stays_idle() {
        let h = Harness::start(config());
        h.table.add_process(process(200, "com.app.b"), 100);

        h.freeze("com.app.a", FreezeReason::ColdLaunch);
        h.flush().await;

        assert!(h.state.is_empty());
        assert!(h.primitive.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_freeze_is_not_tracked() {
        let h = Harness::start(config());
        h.table.add_process(process(200, "com.app.b"), 900);
        h.table.add_process(process(300, "com.app.c"), 900);
        h.primitive.fail_binder(300);

        h.freeze("com.app.a", FreezeReason::ColdLaunch);
        h.flush().await;

        let tracked: Vec<u32> = h
            .state
            .frozen_processes("com.app.a")
            .iter()
            .map(|p| p.pid)
            .collect();
        assert_eq!(tracked, vec![200]);
        assert_eq!(h.stats.lock().freeze_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_process_unfreeze_keeps_package() {
        let h = Harness::start(config());
        let b = process(200, "com.app.b");
        h.table.add_process(b.clone(), 900);
        h.table.add_process(process(300, "com.app.c"), 900);

        h.freeze("com.app.a", FreezeReason::ColdLaunch);
        h.send(Command::EndFreezeForProcess {
            process: b,
            reason: UnfreezeReason::DependentLaunch,
        });
        h.flush().await;

        assert!(h.state.contains_package("com.app.a"));
        assert_eq!(h.primitive.frozen_pids(), [300].into_iter().collect());
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_process_unfreeze_releases_package_and_timer() {
        let h = Harness::start(config());
        let b = process(200, "com.app.b");
        h.table.add_process(b.clone(), 900);

        h.freeze("com.app.a", FreezeReason::ColdLaunch);
        h.send(Command::EndFreezeForProcess {
            process: b,
            reason: UnfreezeReason::DependentLaunch,
        });
        h.flush().await;
        assert!(h.state.is_empty());

        tokio::time::sleep(Duration::from_millis(3000)).await;
        h.flush().await;
        assert_eq!(h.stats.lock().timeouts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_process_release_cancels_timers_before_record() {
        let table = Arc::new(ProcessTable::new());
        let b = process(200, "com.app.b");
        let c = process(300, "com.app.c");
        table.add_process(b.clone(), 900);
        table.add_process(c.clone(), 900);
        let mut seq = sequencer(config(), table, Arc::new(RecordingPrimitive::new()));

        seq.begin_freeze("com.app.a".to_string(), FreezeReason::ColdLaunch);
        assert!(seq.is_armed("com.app.a", TimerKind::LaunchTimeout));

        seq.unfreeze_process(&b, UnfreezeReason::DependentLaunch);
        assert!(seq.is_armed("com.app.a", TimerKind::LaunchTimeout));
        assert_eq!(seq.state.frozen_processes("com.app.a"), vec![c.clone()]);

        seq.unfreeze_process(&c, UnfreezeReason::DependentLaunch);
        assert!(!seq.is_armed("com.app.a", TimerKind::LaunchTimeout));
        assert!(!seq.is_armed("com.app.a", TimerKind::DelayedUnfreeze));
        assert!(seq.timers.is_empty());
        assert!(seq.state.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_releases_everything() {
        let h = Harness::start(config());
        h.table.add_process(process(200, "com.app.b"), 900);

        h.freeze("com.app.a", FreezeReason::ColdLaunch);
        let (tx, rx) = oneshot::channel();
        h.send(Command::Shutdown(tx));
        rx.await.unwrap();

        assert!(h.state.is_empty());
        assert!(h.primitive.frozen_pids().is_empty());
        assert!(h.commands.send(Command::CpuSample(CpuAvailabilityInfo {
            cpuset: CpuSet::All,
            latest_avg_availability_percent: 50,
        }))
        .is_err());
    }
}
