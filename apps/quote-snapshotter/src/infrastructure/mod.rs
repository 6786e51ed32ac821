//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the application ports plus process-level
//! concerns (configuration, telemetry, metrics).

/// Configuration loading and validation.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// PID file guard.
pub mod pid_file;

/// Position file loader.
pub mod portfolio;

/// CSV snapshot log writer.
pub mod snapshot;

/// Quote stream adapters.
pub mod stream;

/// Logging and OpenTelemetry tracing.
pub mod telemetry;
