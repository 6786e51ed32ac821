#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::cast_possible_truncation
    )
)]

//! Quote Snapshotter - Live Portfolio Valuation Logger
//!
//! Streams quotes for every instrument in a position file, revalues each
//! position group on a fixed cadence once every instrument has a two-sided
//! quote, and appends the results to daily CSV logs.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: pure data and arithmetic
//!   - `quotes`: latest-quote table with a single writer
//!   - `portfolio`: immutable position set
//!   - `valuation`: per-cycle marks and group net values
//!
//! - **Application**: ports and services
//!   - `ports`: quote source and snapshot sink interfaces
//!   - `services`: ingestion, readiness gate, cycle scheduler, lifecycle
//!
//! - **Infrastructure**: adapters
//!   - `stream`: WebSocket and in-process quote sources
//!   - `snapshot`: CSV log writer
//!   - `portfolio`: position file loader
//!   - `config`, `telemetry`, `metrics`, `pid_file`
//!
//! # Data Flow
//!
//! ```text
//! Quote stream ──► Ingestion ──► Quote Table ──► Readiness Gate
//!                                     │
//!                                     ▼
//!              Position file ──► Valuation (every cadence) ──► CSV logs
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Quotes, positions and valuation.
pub mod domain;

/// Application layer - Ports and pipeline services.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::portfolio::{Portfolio, PortfolioError, Position};
pub use domain::quotes::{InstrumentId, Quote, QuoteSnapshot, QuoteTable, QuoteWriter};
pub use domain::valuation::{
    CycleValuation, GroupValuation, PositionMark, SkipReason, SkippedPosition, value_portfolio,
};

// Ports
pub use application::ports::{
    AppendSummary, QuoteEvent, QuoteSource, QuoteSourceError, SnapshotError, SnapshotSink,
};

// Services
pub use application::services::{
    LifecycleController, LifecycleError, LifecycleReport, LifecycleSettings, LifecycleState,
};

// Infrastructure config
pub use infrastructure::config::{Config, ConfigError, load_config, load_config_from_string};

// Adapters
pub use infrastructure::pid_file::{PidFile, PidFileError};
pub use infrastructure::portfolio::{PositionFileError, load_positions};
pub use infrastructure::snapshot::{SnapshotLayout, SnapshotWriter};
pub use infrastructure::stream::{
    ChannelQuoteSource, QuoteFeed, WebSocketConfig, WebSocketQuoteSource,
};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
