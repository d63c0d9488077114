//! Configuration for the seqserve server.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;
use seqserve_core::compose::{BatchSettings, BatchStrategy, DEFAULT_COST_MARGIN, DEFAULT_SIMPLE_MARGIN};
use seqserve_core::ProcessorConfig;

/// Config file read when `--conf` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "server.toml";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("Invalid configuration for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: ServerSettings,
    #[serde(default)]
    pub batching: BatchingConfig,
    #[serde(default)]
    pub processor: ProcessorSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// Model descriptor. Relative paths are resolved against the config
    /// file's directory.
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Seconds a request may take end to end.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: f64,
    /// Longest accepted query, in characters.
    #[serde(default = "default_max_query_len")]
    pub max_query_len: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            host: default_host(),
            port: default_port(),
            request_timeout: default_request_timeout(),
            max_query_len: default_max_query_len(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchingConfig {
    #[serde(default)]
    pub strategy: BatchStrategy,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Seconds a request may wait to be batched.
    #[serde(default = "default_batch_wait_timeout")]
    pub batch_wait_timeout: f64,
    /// Upper bound on `batch count x max length`.
    #[serde(default = "default_parallel_size")]
    pub parallel_size: usize,
    #[serde(default = "default_simple_margin")]
    pub simple_margin: f64,
    #[serde(default = "default_cost_margin")]
    pub cost_margin: f64,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            strategy: BatchStrategy::default(),
            batch_size: default_batch_size(),
            batch_wait_timeout: default_batch_wait_timeout(),
            parallel_size: default_parallel_size(),
            simple_margin: default_simple_margin(),
            cost_margin: default_cost_margin(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorSettings {
    #[serde(default = "default_pending_capacity")]
    pub pending_capacity: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        let defaults = ProcessorConfig::default();
        Self {
            pending_capacity: defaults.pending_capacity,
            queue_capacity: defaults.queue_capacity,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default values
fn default_model_path() -> PathBuf {
    PathBuf::from("model.json")
}
fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    2352
}
fn default_request_timeout() -> f64 {
    10.0
}
fn default_max_query_len() -> usize {
    50
}
fn default_batch_size() -> usize {
    64
}
fn default_batch_wait_timeout() -> f64 {
    4.0
}
fn default_parallel_size() -> usize {
    1000
}
fn default_simple_margin() -> f64 {
    DEFAULT_SIMPLE_MARGIN
}
fn default_cost_margin() -> f64 {
    DEFAULT_COST_MARGIN
}
fn default_pending_capacity() -> usize {
    ProcessorConfig::default().pending_capacity
}
fn default_queue_capacity() -> usize {
    ProcessorConfig::default().queue_capacity
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (SEQSERVE__SECTION__KEY format)
    /// 2. The config file: `path` if given (must exist), else `server.toml`
    ///    if present
    /// 3. Built-in defaults
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let (path, required) = match path {
            Some(path) => (path, true),
            None => (Path::new(DEFAULT_CONFIG_PATH), false),
        };

        let loaded = ConfigLoader::builder()
            .set_default("settings.host", default_host())?
            .set_default("settings.port", default_port() as i64)?
            .add_source(File::from(path).required(required))
            .add_source(
                Environment::with_prefix("SEQSERVE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: Config = loaded.try_deserialize()?;
        if config.settings.model_path.is_relative() {
            if let Some(dir) = path.parent() {
                config.settings.model_path = dir.join(&config.settings.model_path);
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.settings.port == 0 {
            return Err(invalid("settings.port", "must be a positive integer"));
        }
        positive_secs("settings.request_timeout", self.settings.request_timeout)?;
        positive("settings.max_query_len", self.settings.max_query_len)?;

        positive("batching.batch_size", self.batching.batch_size)?;
        positive_secs("batching.batch_wait_timeout", self.batching.batch_wait_timeout)?;
        positive("batching.parallel_size", self.batching.parallel_size)?;
        fraction("batching.simple_margin", self.batching.simple_margin)?;
        fraction("batching.cost_margin", self.batching.cost_margin)?;

        positive("processor.pending_capacity", self.processor.pending_capacity)?;
        positive("processor.queue_capacity", self.processor.queue_capacity)?;
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.settings.host, self.settings.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.settings.request_timeout)
    }

    pub fn batch_settings(&self) -> BatchSettings {
        BatchSettings {
            strategy: self.batching.strategy,
            batch_size: self.batching.batch_size,
            wait_timeout: Duration::from_secs_f64(self.batching.batch_wait_timeout),
            parallel_size: self.batching.parallel_size,
            simple_margin: self.batching.simple_margin,
            cost_margin: self.batching.cost_margin,
        }
    }

    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            pending_capacity: self.processor.pending_capacity,
            queue_capacity: self.processor.queue_capacity,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            settings: ServerSettings::default(),
            batching: BatchingConfig::default(),
            processor: ProcessorSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn invalid(field: &'static str, reason: &str) -> SettingsError {
    SettingsError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

fn positive(field: &'static str, value: usize) -> Result<(), SettingsError> {
    if value == 0 {
        return Err(invalid(field, "must be a positive integer"));
    }
    Ok(())
}

fn positive_secs(field: &'static str, value: f64) -> Result<(), SettingsError> {
    // Duration::from_secs_f64 panics on non-finite or huge values
    if !value.is_finite() || value <= 0.0 || value > u32::MAX as f64 {
        return Err(invalid(field, "must be a positive number of seconds"));
    }
    Ok(())
}

fn fraction(field: &'static str, value: f64) -> Result<(), SettingsError> {
    if !(0.0..1.0).contains(&value) {
        return Err(invalid(field, "must be in [0, 1)"));
    }
    Ok(())
}
