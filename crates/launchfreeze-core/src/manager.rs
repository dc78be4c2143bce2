//! Public entry point for the launch lifecycle.
//!
//! A [`FreezerManager`] is built once from a [`FreezerConfig`] and the host
//! [`Platform`], and handed to whatever drives app launches. Every
//! state-changing operation is queued to the sequencer and returns at once;
//! the read-only queries look at the shared registry directly.

use crate::config::FreezerConfig;
use crate::cpu_monitor::CpuLoadMonitor;
use crate::decision::DecisionEngine;
use crate::error::{Error, Result};
use crate::executor::FreezeExecutor;
use crate::platform::{CpuAvailabilityInfo, CpuAvailabilitySource, Platform};
use crate::registry::StateRegistry;
use crate::sequencer::{Command, Sequencer};
use crate::types::{is_main_process, FreezeReason, FreezerStats, ProcessHandle, UnfreezeReason};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

const WORKER_THREAD_NAME: &str = "freezer-manager";

enum Worker {
    /// Dedicated OS thread running its own current-thread runtime
    Thread(thread::JoinHandle<()>),
    /// Task on the caller's runtime
    Task(tokio::task::JoinHandle<()>),
}

/// Freezes background processes while an app launches
pub struct FreezerManager {
    config: FreezerConfig,
    commands: mpsc::UnboundedSender<Command>,
    engine: DecisionEngine,
    state: Arc<StateRegistry>,
    cpu_monitor: Arc<CpuLoadMonitor>,
    cpu_source: Option<Arc<dyn CpuAvailabilitySource>>,
    stats: Arc<Mutex<FreezerStats>>,
    worker: Option<Worker>,
}

impl FreezerManager {
    /// Start the manager with its sequencer on a dedicated thread.
    pub fn start(config: FreezerConfig, platform: Platform) -> Result<Self> {
        let (mut manager, sequencer, rx) = Self::assemble(config, platform)?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;
        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || runtime.block_on(sequencer.run(rx)))?;

        manager.worker = Some(Worker::Thread(handle));
        Ok(manager)
    }

    /// Start the manager with its sequencer as a task on the current tokio
    /// runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn spawn(config: FreezerConfig, platform: Platform) -> Result<Self> {
        let (mut manager, sequencer, rx) = Self::assemble(config, platform)?;
        manager.worker = Some(Worker::Task(tokio::spawn(sequencer.run(rx))));
        Ok(manager)
    }

    fn assemble(
        config: FreezerConfig,
        platform: Platform,
    ) -> Result<(Self, Sequencer, mpsc::UnboundedReceiver<Command>)> {
        config.validate()?;

        let engine = DecisionEngine::new(platform.registry.clone(), &config);
        let executor = FreezeExecutor::new(
            platform.primitive.clone(),
            engine.clone(),
            config.binder_timeout(),
        );
        let state = Arc::new(StateRegistry::new());
        let cpu_monitor = Arc::new(CpuLoadMonitor::new(&config.cpu_load_monitor));
        let stats = Arc::new(Mutex::new(FreezerStats::new()));

        let sequencer = Sequencer::new(
            config.clone(),
            engine.clone(),
            executor,
            state.clone(),
            cpu_monitor.clone(),
            stats.clone(),
        );
        let (commands, rx) = mpsc::unbounded_channel();

        if config.cpu_load_monitor.enabled && platform.cpu_source.is_none() {
            warn!("CPU load monitor is enabled but no CPU availability source was provided");
        }

        let manager = Self {
            config,
            commands,
            engine,
            state,
            cpu_monitor,
            cpu_source: platform.cpu_source,
            stats,
            worker: None,
        };
        manager.log_settings();

        Ok((manager, sequencer, rx))
    }

    fn log_settings(&self) {
        let c = &self.config;
        info!("Launch freezer settings:");
        info!("  enabled: {}", c.enabled);
        info!(
            "  adj thresholds: foreground={}, freeze={}, perceptible={}",
            c.foreground_adj_threshold, c.freeze_adj_threshold, c.perceptible_adj
        );
        info!(
            "  launch timeout: {}ms, unfreeze delay: {}ms, binder timeout: {}ms",
            c.launch_timeout_ms, c.delay_unfreeze_ms, c.binder_timeout_ms
        );
        info!(
            "  CPU load monitor: enabled={}, usage threshold={}%, cpuset={:?}",
            c.cpu_load_monitor.enabled,
            c.cpu_load_monitor.usage_threshold,
            c.cpu_load_monitor.cpuset()
        );
    }

    /// Freeze background processes for a launching package.
    pub fn start_freeze(&self, package: &str, reason: FreezeReason) {
        if !self.config.enabled {
            return;
        }

        if self.config.cpu_load_monitor.enabled {
            self.ensure_cpu_monitor();
        }

        self.send(Command::BeginFreeze {
            package: package.to_string(),
            reason,
        });
    }

    /// End the freeze held for `package`.
    pub fn start_unfreeze(&self, package: &str, reason: UnfreezeReason) {
        if !self.config.enabled {
            return;
        }

        self.send(Command::EndFreezeForPackage {
            package: package.to_string(),
            reason,
        });
    }

    /// Unfreeze one process that a launching package now depends on.
    pub fn start_unfreeze_for_dependent_process(
        &self,
        process: &ProcessHandle,
        reason: UnfreezeReason,
    ) {
        if !self.config.enabled {
            return;
        }

        self.send(Command::EndFreezeForProcess {
            process: process.clone(),
            reason,
        });
    }

    /// Feed a CPU sample through the queue instead of a subscription.
    pub fn report_cpu_sample(&self, info: CpuAvailabilityInfo) {
        self.send(Command::CpuSample(info));
    }

    pub fn is_feature_enabled(&self) -> bool {
        self.config.enabled
    }

    /// False for secondary processes (`package:component`).
    pub fn is_package_eligible_for_freeze_tracking(&self, package: &str) -> bool {
        is_main_process(package)
    }

    /// Whether `process` is on any package's freeze list.
    pub fn is_process_tracked(&self, process: &ProcessHandle) -> bool {
        self.state.contains_process(process)
    }

    /// True when `process` is frozen for some package and a client from that
    /// same package is bound to one of its services.
    pub fn needs_dependency_unfreeze(&self, process: &ProcessHandle) -> bool {
        match self.state.package_of(process) {
            Some(package) => self.engine.is_bound_to_package(process, &package),
            None => false,
        }
    }

    pub fn tracked_packages(&self) -> Vec<String> {
        self.state.tracked_packages()
    }

    pub fn frozen_processes(&self, package: &str) -> Vec<ProcessHandle> {
        self.state.frozen_processes(package)
    }

    pub fn is_cpu_high_load(&self) -> bool {
        self.cpu_monitor.is_high_load()
    }

    pub fn config(&self) -> &FreezerConfig {
        &self.config
    }

    pub fn stats(&self) -> FreezerStats {
        self.stats.lock().clone()
    }

    /// Resolves once every request queued before this call has been handled.
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Flush(tx))
            .map_err(|_| Error::WorkerStopped)?;
        rx.await.map_err(|_| Error::WorkerStopped)
    }

    /// Unfreeze everything still tracked and stop the sequencer.
    pub async fn shutdown(mut self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Shutdown(tx))
            .map_err(|_| Error::WorkerStopped)?;
        rx.await.map_err(|_| Error::WorkerStopped)?;

        match self.worker.take() {
            Some(Worker::Thread(handle)) => {
                tokio::task::spawn_blocking(move || handle.join())
                    .await
                    .map_err(|_| Error::WorkerStopped)?
                    .map_err(|_| Error::WorkerStopped)?;
            }
            Some(Worker::Task(handle)) => {
                handle.await.map_err(|_| Error::WorkerStopped)?;
            }
            None => {}
        }

        info!("Launch freezer shut down");
        Ok(())
    }

    fn ensure_cpu_monitor(&self) {
        if self.cpu_monitor.is_started() {
            return;
        }
        match &self.cpu_source {
            Some(source) => {
                if let Err(e) = self.cpu_monitor.start(source.as_ref()) {
                    warn!("Failed to start CPU load monitor: {}", e);
                }
            }
            None => debug!("No CPU availability source; CPU load stays low"),
        }
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("Freezer sequencer is not running, request dropped");
        }
    }
}

impl Drop for FreezerManager {
    fn drop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        let (tx, _rx) = oneshot::channel();
        let _ = self.commands.send(Command::Shutdown(tx));

        // A spawned task cannot be awaited here; its runtime finishes the
        // release on its own.
        if let Worker::Thread(handle) = worker {
            if handle.join().is_err() {
                warn!("Freezer worker thread panicked during shutdown");
            }
        }
    }
}
