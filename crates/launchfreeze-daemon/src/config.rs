use anyhow::{Context, Result};
use launchfreeze_core::FreezerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default location of the daemon configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/launchfreeze/config.toml";

/// Prefix for environment overrides, e.g. `LAUNCHFREEZE__FREEZER__ENABLED=true`
pub const ENV_PREFIX: &str = "LAUNCHFREEZE";

/// Main configuration for the launchfreeze daemon
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Freezer policy handed to the manager
    pub freezer: FreezerConfig,

    /// Logging configuration
    pub logging: LogConfig,

    /// CPU availability sampling
    pub sampler: SamplerConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log directory path (default: ./logs)
    pub log_dir: PathBuf,

    /// Log file name, rotated daily (default: launchfreeze.log)
    pub file_name: String,

    /// Default filter when RUST_LOG is unset (default: info)
    pub level: String,

    /// Verbose freeze/unfreeze tracing (default: false)
    pub debug: bool,
}

/// CPU availability sampler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Sampling interval in milliseconds (default: 1000)
    pub interval_ms: u64,

    /// Core indices that make up the background cpuset; empty means all
    /// cores (default: empty)
    pub background_cores: Vec<usize>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("./logs"),
            file_name: "launchfreeze.log".to_string(),
            level: "info".to_string(),
            debug: false,
        }
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            background_cores: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then apply `LAUNCHFREEZE__*`
    /// environment overrides.
    ///
    /// A missing file yields the defaults (plus any overrides).
    ///
    /// # Example
    /// ```no_run
    /// use launchfreeze_daemon::config::Config;
    ///
    /// let config = Config::load_from_file("/etc/launchfreeze/config.toml").unwrap();
    /// println!("Launch timeout: {}ms", config.freezer.launch_timeout_ms);
    /// ```
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::load_with_env(path.as_ref(), Self::environment())
    }

    /// `LAUNCHFREEZE__SECTION__KEY` overrides; list values are comma separated
    fn environment() -> ::config::Environment {
        ::config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("sampler.background_cores")
    }

    fn load_with_env(path: &Path, environment: ::config::Environment) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(environment)
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path.display()))?;

        settings
            .try_deserialize()
            .with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    /// Save configuration to a TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write {}", path.as_ref().display()))?;
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        self.freezer.validate().map_err(|e| e.to_string())?;

        if self.sampler.interval_ms == 0 {
            return Err("Sampler interval must be > 0".to_string());
        }

        if self.logging.file_name.is_empty() {
            return Err("Log file name must not be empty".to_string());
        }

        Ok(())
    }

    /// Filter used when RUST_LOG is unset
    pub fn log_filter(&self) -> &str {
        if self.logging.debug {
            "debug"
        } else {
            &self.logging.level
        }
    }

    /// Full path to the current log file
    pub fn log_path(&self) -> PathBuf {
        self.logging.log_dir.join(&self.logging.file_name)
    }
}
