use anyhow::Result;
use clap::{Parser, Subcommand};
use launchfreeze_core::{is_main_process, DecisionEngine, FreezerManager, Platform, VERSION};
use launchfreeze_daemon::{Config, ProcfsRegistry, Script, SignalFreezer, SysinfoCpuSource};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// LaunchFreeze - freeze background processes while an app launches
#[derive(Parser, Debug)]
#[command(name = "launchfreeze")]
#[command(version = VERSION)]
#[command(about = "LaunchFreeze - launch-time background process freezer", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = launchfreeze_daemon::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show which processes would be frozen for a launching package
    Candidates {
        /// Launching package name
        package: String,
    },

    /// Replay a scripted launch sequence against the live system
    Replay {
        /// Path to the TOML event script
        script: PathBuf,

        /// Keep the manager running this long after the last event
        #[arg(long, default_value_t = 0)]
        hold_ms: u64,
    },

    /// Generate default configuration file
    GenerateConfig {
        /// Output path for config file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,
    },

    /// Load and validate the configuration
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, found) = load_config(&cli.config)?;

    // Keep the file writer alive until exit
    let _guard = init_logging(&config)?;

    info!("LaunchFreeze v{} starting...", VERSION);
    if !found {
        warn!(
            "Configuration file not found: {:?}, using defaults",
            cli.config
        );
    }

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Configuration validation failed: {}", e))?;

    info!("Configuration loaded and validated successfully");

    match cli.command {
        Some(Commands::Candidates { package }) => show_candidates(&config, &package)?,
        Some(Commands::Replay { script, hold_ms }) => run_replay(config, &script, hold_ms).await?,
        Some(Commands::GenerateConfig { output }) => generate_config(&output)?,
        Some(Commands::CheckConfig) | None => check_config(&config),
    }

    Ok(())
}

/// Dry run: list candidates and the verdict the freeze gate would give each
fn show_candidates(config: &Config, package: &str) -> Result<()> {
    if !is_main_process(package) {
        warn!("{} is a secondary process; launches of it never freeze", package);
        return Ok(());
    }

    let engine = DecisionEngine::new(Arc::new(ProcfsRegistry::new()), &config.freezer);
    let candidates = engine.select_freeze_candidates(package);

    info!("=== Freeze candidates for {} ===", package);
    let mut eligible = 0;
    for process in &candidates {
        let verdict = engine.evaluate(process);
        if verdict.is_eligible() {
            eligible += 1;
        }
        info!(
            "  {} adj={} -> {}",
            process,
            engine.registry().adjustment_level(process),
            verdict
        );
    }
    info!(
        "{} candidates, {} would be frozen",
        candidates.len(),
        eligible
    );

    Ok(())
}

/// Run a replay script with the real Linux platform
async fn run_replay(config: Config, script: &Path, hold_ms: u64) -> Result<()> {
    let script = Script::load(script)?;

    if !config.freezer.enabled {
        warn!("Freezer is disabled in configuration; replay will not freeze anything");
    }

    let mut platform = Platform::new(Arc::new(ProcfsRegistry::new()), Arc::new(SignalFreezer::new()));
    if config.freezer.cpu_load_monitor.enabled {
        platform = platform.with_cpu_source(Arc::new(SysinfoCpuSource::new(
            Duration::from_millis(config.sampler.interval_ms),
            config.sampler.background_cores.clone(),
        )));
    }

    let manager = FreezerManager::start(config.freezer, platform)?;

    // Frozen processes are released on every exit path, Ctrl-C included
    let outcome = tokio::select! {
        result = replay_and_hold(&manager, &script, hold_ms) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, releasing frozen processes");
            Ok(())
        }
    };

    let stopped = manager.shutdown().await;
    outcome?;
    stopped?;
    Ok(())
}

async fn replay_and_hold(manager: &FreezerManager, script: &Script, hold_ms: u64) -> Result<()> {
    let dispatched = launchfreeze_daemon::replay::replay(manager, script).await?;
    info!("Replayed {} events", dispatched);

    if hold_ms > 0 {
        tokio::time::sleep(Duration::from_millis(hold_ms)).await;
        manager.flush().await?;
    }

    let stats = manager.stats();
    info!("=== Freezer Statistics ===");
    info!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

/// Generate default configuration file
fn generate_config(output: &Path) -> Result<()> {
    info!("Generating default configuration file: {:?}", output);

    Config::default()
        .save_to_file(output)
        .map_err(|e| anyhow::anyhow!("Failed to save configuration file: {}", e))?;

    info!("Configuration file generated successfully");
    Ok(())
}

fn check_config(config: &Config) {
    let freezer = &config.freezer;
    info!("=== Effective configuration ===");
    info!("Freezer enabled: {}", freezer.enabled);
    info!(
        "Adj thresholds: foreground={}, freeze={}, perceptible={}",
        freezer.foreground_adj_threshold, freezer.freeze_adj_threshold, freezer.perceptible_adj
    );
    info!(
        "Timeouts: launch={}ms, unfreeze delay={}ms, binder={}ms",
        freezer.launch_timeout_ms, freezer.delay_unfreeze_ms, freezer.binder_timeout_ms
    );
    info!(
        "CPU load gating: enabled={}, usage threshold={}%, cpuset={:?}, sample every {}ms",
        freezer.cpu_load_monitor.enabled,
        freezer.cpu_load_monitor.usage_threshold,
        freezer.cpu_load_monitor.cpuset(),
        config.sampler.interval_ms
    );
    info!("Log file: {:?}", config.log_path());
}

/// Load configuration; the flag is false when the file does not exist
fn load_config(path: &Path) -> Result<(Config, bool)> {
    let found = path.exists();
    let config = Config::load_from_file(path)
        .map_err(|e| anyhow::anyhow!("Failed to load configuration file: {:#}", e))?;
    Ok((config, found))
}

/// Initialize logging with file and stdout output
fn init_logging(config: &Config) -> Result<WorkerGuard> {
    std::fs::create_dir_all(&config.logging.log_dir)?;

    let file_appender =
        tracing_appender::rolling::daily(&config.logging.log_dir, &config.logging.file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_ansi(true)
                .with_target(false),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter().into()),
        )
        .init();

    info!("Logging initialized");

    Ok(guard)
}
