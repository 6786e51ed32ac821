//! Configuration Module
//!
//! YAML configuration loading and validation for the snapshotter.

mod settings;

pub use settings::{
    CONFIG_PATH_ENV, ConfigError, Config, Credentials, DATE_PLACEHOLDER, DEFAULT_CONFIG_PATH,
    HeartbeatSettings, LifecycleConfig, LoggingConfig, MetricsConfig, OutputConfig,
    PortfolioConfig, ReconnectSettings, ScheduleConfig, StreamingConfig, load_config,
    load_config_from_string,
};
