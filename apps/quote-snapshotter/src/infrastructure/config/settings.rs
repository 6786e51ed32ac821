//! Snapshotter Configuration
//!
//! YAML configuration with `${VAR}` / `${VAR:-default}` environment
//! interpolation.
//!
//! # Example
//!
//! ```yaml
//! portfolio:
//!   file: positions.csv
//! output:
//!   directory: output
//!   strategy_filename_template: "strategy_snapshots_{date}.csv"
//!   positions_filename_template: "position_snapshots_{date}.csv"
//! streaming:
//!   url: wss://stream.data.alpaca.markets/v2/sip
//!   api_key: ${ALPACA_KEY}
//!   api_secret: ${ALPACA_SECRET}
//! schedule:
//!   cadence_secs: 60
//! ```

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::services::{BackoffConfig, IngestionSettings, LifecycleSettings};
use crate::domain::portfolio::Portfolio;
use crate::domain::quotes::InstrumentId;

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "QUOTE_SNAPSHOTTER_CONFIG";

/// Configuration file used when [`CONFIG_PATH_ENV`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "quote-snapshotter.yaml";

/// Placeholder replaced by the current date in log filenames.
pub const DATE_PLACEHOLDER: &str = "{date}";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("Failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

// =============================================================================
// Credentials
// =============================================================================

/// Feed API credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    api_key: String,
    api_secret: String,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(api_key: String, api_secret: String) -> Self {
        Self {
            api_key,
            api_secret,
        }
    }

    /// Get the API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Get the API secret.
    #[must_use]
    pub fn api_secret(&self) -> &str {
        &self.api_secret
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"[REDACTED]")
            .field("api_secret", &"[REDACTED]")
            .finish()
    }
}

// =============================================================================
// Sections
// =============================================================================

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Position file.
    pub portfolio: PortfolioConfig,
    /// Snapshot log output.
    #[serde(default)]
    pub output: OutputConfig,
    /// Quote stream.
    #[serde(default)]
    pub streaming: StreamingConfig,
    /// Cycle timing.
    #[serde(default)]
    pub schedule: ScheduleConfig,
    /// Process lifecycle.
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    /// Logging.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Prometheus metrics.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Position file configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioConfig {
    /// CSV file with `group_name`, `streamer_symbol`, `quantity`, `open_price`.
    pub file: PathBuf,
}

/// Snapshot log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory holding the daily logs.
    #[serde(default = "default_output_directory")]
    pub directory: PathBuf,
    /// Group valuation log filename; must contain `{date}`.
    #[serde(default = "default_strategy_template")]
    pub strategy_filename_template: String,
    /// Position mark log filename; must contain `{date}`.
    #[serde(default = "default_positions_template")]
    pub positions_filename_template: String,
    /// IANA timezone used to pick the calendar day for filenames.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_directory(),
            strategy_filename_template: default_strategy_template(),
            positions_filename_template: default_positions_template(),
            timezone: default_timezone(),
        }
    }
}

impl OutputConfig {
    /// Parsed timezone.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is not a known IANA timezone.
    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone.parse::<Tz>().map_err(|e| {
            ConfigError::ValidationError(format!(
                "output.timezone '{}' is not a valid timezone: {e}",
                self.timezone
            ))
        })
    }
}

fn default_output_directory() -> PathBuf {
    PathBuf::from("output")
}
fn default_strategy_template() -> String {
    "strategy_snapshots_{date}.csv".to_string()
}
fn default_positions_template() -> String {
    "position_snapshots_{date}.csv".to_string()
}
fn default_timezone() -> String {
    "UTC".to_string()
}

/// Quote stream configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// WebSocket URL of the market data stream.
    #[serde(default = "default_stream_url")]
    pub url: String,
    /// API key; authentication is skipped when unset.
    #[serde(default)]
    pub api_key: Option<String>,
    /// API secret.
    #[serde(default)]
    pub api_secret: Option<String>,
    /// Subscription override; defaults to the portfolio's instruments.
    #[serde(default)]
    pub symbols: Vec<String>,
    /// Resubscribe after the stream ends.
    #[serde(default)]
    pub resubscribe: bool,
    /// Time allowed for connect, auth and subscription confirmation.
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    /// Resubscription backoff.
    #[serde(default)]
    pub reconnect: ReconnectSettings,
    /// Ping/pong liveness check.
    #[serde(default)]
    pub heartbeat: HeartbeatSettings,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            url: default_stream_url(),
            api_key: None,
            api_secret: None,
            symbols: Vec::new(),
            resubscribe: false,
            handshake_timeout_secs: default_handshake_timeout_secs(),
            reconnect: ReconnectSettings::default(),
            heartbeat: HeartbeatSettings::default(),
        }
    }
}

impl StreamingConfig {
    /// Credentials, if both key and secret are set and non-empty.
    #[must_use]
    pub fn credentials(&self) -> Option<Credentials> {
        let key = self.api_key.as_deref().filter(|k| !k.is_empty())?;
        let secret = self.api_secret.as_deref().filter(|s| !s.is_empty())?;
        Some(Credentials::new(key.to_string(), secret.to_string()))
    }

    /// Handshake timeout as a duration.
    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

fn default_stream_url() -> String {
    "wss://stream.data.alpaca.markets/v2/sip".to_string()
}
const fn default_handshake_timeout_secs() -> u64 {
    10
}

/// Resubscription backoff settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectSettings {
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Maximum delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Growth factor between delays.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Retries before giving up (0 = unlimited).
    #[serde(default)]
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            max_attempts: 0,
        }
    }
}

const fn default_initial_delay_ms() -> u64 {
    1_000
}
const fn default_max_delay_ms() -> u64 {
    60_000
}
const fn default_multiplier() -> f64 {
    2.0
}

/// Heartbeat settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatSettings {
    /// Interval between pings, in seconds.
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    /// Time without a pong before the stream is considered dead, in seconds.
    #[serde(default = "default_pong_timeout_secs")]
    pub pong_timeout_secs: u64,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval_secs(),
            pong_timeout_secs: default_pong_timeout_secs(),
        }
    }
}

const fn default_ping_interval_secs() -> u64 {
    20
}
const fn default_pong_timeout_secs() -> u64 {
    20
}

/// Cycle timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Seconds between cycle starts.
    #[serde(default = "default_cadence_secs")]
    pub cadence_secs: u64,
    /// Milliseconds between readiness checks.
    #[serde(default = "default_readiness_poll_ms")]
    pub readiness_poll_ms: u64,
    /// Seconds allowed for tasks to stop after shutdown.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cadence_secs: default_cadence_secs(),
            readiness_poll_ms: default_readiness_poll_ms(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

const fn default_cadence_secs() -> u64 {
    60
}
const fn default_readiness_poll_ms() -> u64 {
    500
}
const fn default_shutdown_grace_secs() -> u64 {
    30
}

/// Process lifecycle settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// File receiving the process id while running.
    #[serde(default)]
    pub pid_file: Option<PathBuf>,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
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

fn default_log_level() -> String {
    "info".to_string()
}

/// Metrics settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Prometheus listener port (0 = no listener).
    #[serde(default)]
    pub port: u16,
}

// =============================================================================
// Derived Settings
// =============================================================================

impl Config {
    /// Instruments to subscribe to: the configured override, or every
    /// instrument in the portfolio.
    #[must_use]
    pub fn instruments(&self, portfolio: &Portfolio) -> Vec<InstrumentId> {
        if self.streaming.symbols.is_empty() {
            return portfolio.instruments();
        }
        let mut symbols: Vec<InstrumentId> = Vec::with_capacity(self.streaming.symbols.len());
        for symbol in &self.streaming.symbols {
            if !symbols.contains(symbol) {
                symbols.push(symbol.clone());
            }
        }
        symbols
    }

    /// Timing and ingestion settings for the lifecycle controller.
    #[must_use]
    pub fn lifecycle_settings(&self) -> LifecycleSettings {
        let reconnect = &self.streaming.reconnect;
        LifecycleSettings {
            cadence: Duration::from_secs(self.schedule.cadence_secs),
            readiness_poll: Duration::from_millis(self.schedule.readiness_poll_ms),
            shutdown_grace: Duration::from_secs(self.schedule.shutdown_grace_secs),
            ingestion: IngestionSettings {
                resubscribe: self.streaming.resubscribe,
                backoff: BackoffConfig {
                    initial_delay: Duration::from_millis(reconnect.initial_delay_ms),
                    max_delay: Duration::from_millis(reconnect.max_delay_ms),
                    multiplier: reconnect.multiplier,
                    jitter_factor: 0.1,
                    max_attempts: reconnect.max_attempts,
                },
            },
        }
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Load configuration from a YAML file with environment variable interpolation.
///
/// `path` defaults to [`DEFAULT_CONFIG_PATH`].
///
/// # Errors
///
/// Returns a `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or(DEFAULT_CONFIG_PATH);
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_string(),
        source: e,
    })?;
    load_config_from_string(&contents)
}

/// Load configuration from a YAML string.
///
/// # Errors
///
/// Returns a `ConfigError` if the YAML cannot be parsed or validated.
pub fn load_config_from_string(yaml: &str) -> Result<Config, ConfigError> {
    let interpolated = interpolate_env_vars(yaml);
    let config: Config = serde_yaml_bw::from_str(&interpolated)?;
    validate_config(&config)?;
    Ok(config)
}

/// Interpolate `${VAR}` and `${VAR:-default}` in a string.
///
/// Unset or empty variables without a default become empty strings.
#[allow(clippy::expect_used)]
fn interpolate_env_vars(input: &str) -> String {
    static ENV_VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

    let re = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var regex is valid")
    });

    re.replace_all(input, |cap: &regex::Captures<'_>| {
        let default_value = cap.get(2).map_or("", |m| m.as_str());
        match std::env::var(&cap[1]) {
            Ok(v) if !v.is_empty() => v,
            _ => default_value.to_string(),
        }
    })
    .into_owned()
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let invalid = |msg: &str| Err(ConfigError::ValidationError(msg.to_string()));

    if config.portfolio.file.as_os_str().is_empty() {
        return invalid("portfolio.file must be set");
    }
    if config.schedule.cadence_secs == 0 {
        return invalid("schedule.cadence_secs must be positive");
    }
    if config.schedule.readiness_poll_ms == 0 {
        return invalid("schedule.readiness_poll_ms must be positive");
    }
    for (name, template) in [
        (
            "output.strategy_filename_template",
            &config.output.strategy_filename_template,
        ),
        (
            "output.positions_filename_template",
            &config.output.positions_filename_template,
        ),
    ] {
        if !template.contains(DATE_PLACEHOLDER) {
            return Err(ConfigError::ValidationError(format!(
                "{name} must contain {DATE_PLACEHOLDER}"
            )));
        }
    }
    if config.output.strategy_filename_template == config.output.positions_filename_template {
        return invalid("strategy and positions filename templates must differ");
    }
    config.output.tz()?;
    if config.streaming.url.trim().is_empty() {
        return invalid("streaming.url must be set");
    }
    if config.streaming.reconnect.multiplier < 1.0 {
        return invalid("streaming.reconnect.multiplier must be at least 1.0");
    }
    if config.streaming.heartbeat.ping_interval_secs == 0 {
        return invalid("streaming.heartbeat.ping_interval_secs must be positive");
    }

    Ok(())
}
