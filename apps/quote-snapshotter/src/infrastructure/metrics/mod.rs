//! Prometheus Metrics Module
//!
//! Exposes pipeline metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Ingestion**: quotes applied and ignored, stream restarts, table size
//! - **Readiness**: instruments still waiting for a two-sided quote
//! - **Cycles**: completed cycles, duration, skipped positions and groups
//! - **Persistence**: rows appended and append failures per log
//!
//! # Integration
//!
//! When a listen port is configured the exporter serves `/metrics` on it.
//! Otherwise the recorder is installed without a listener so recording
//! calls stay cheap.

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::domain::valuation::SkipReason;

// =============================================================================
// Recorder Installation
// =============================================================================

static INSTALLED: OnceLock<()> = OnceLock::new();

/// Install the Prometheus recorder.
///
/// `listen_port == 0` installs the recorder without an HTTP listener.
/// Calling this more than once is a no-op.
///
/// # Errors
///
/// Returns an error if the recorder or the listener cannot be installed.
pub fn init_metrics(listen_port: u16) -> Result<(), BuildError> {
    if INSTALLED.get().is_some() {
        return Ok(());
    }

    let builder = PrometheusBuilder::new();
    if listen_port == 0 {
        builder.install_recorder()?;
    } else {
        builder
            .with_http_listener(SocketAddr::from(([0, 0, 0, 0], listen_port)))
            .install()?;
        tracing::info!(port = listen_port, "Metrics endpoint listening");
    }

    register_metrics();
    let _ = INSTALLED.set(());
    Ok(())
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "quote_snapshotter_quotes_received_total",
        "Quote events applied to the quote table"
    );
    describe_counter!(
        "quote_snapshotter_quotes_ignored_total",
        "Quote events for instruments outside the subscription"
    );
    describe_counter!(
        "quote_snapshotter_malformed_events_total",
        "Inbound events that could not be decoded"
    );
    describe_counter!(
        "quote_snapshotter_stream_restarts_total",
        "Resubscriptions after the quote stream ended"
    );
    describe_gauge!(
        "quote_snapshotter_quote_table_size",
        "Instruments with at least one quote"
    );
    describe_gauge!(
        "quote_snapshotter_readiness_pending",
        "Instruments still missing a two-sided quote"
    );

    describe_counter!(
        "quote_snapshotter_cycles_total",
        "Completed aggregation cycles"
    );
    describe_counter!(
        "quote_snapshotter_positions_skipped_total",
        "Positions excluded from a cycle, by reason"
    );
    describe_counter!(
        "quote_snapshotter_groups_skipped_total",
        "Groups with no usable position in a cycle"
    );
    describe_histogram!(
        "quote_snapshotter_cycle_duration_seconds",
        "Time to aggregate and persist one cycle"
    );

    describe_counter!(
        "quote_snapshotter_rows_written_total",
        "Rows appended to snapshot logs"
    );
    describe_counter!(
        "quote_snapshotter_write_failures_total",
        "Failed appends to snapshot logs"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Which snapshot log a row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    /// Per-group valuation log.
    Strategy,
    /// Per-position mark log.
    Positions,
}

impl LogKind {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Strategy => "strategy",
            Self::Positions => "positions",
        }
    }
}

/// Record a quote applied to the table.
pub fn record_quote_received() {
    counter!("quote_snapshotter_quotes_received_total").increment(1);
}

/// Record a quote for an unsubscribed instrument.
pub fn record_quote_ignored() {
    counter!("quote_snapshotter_quotes_ignored_total").increment(1);
}

/// Record an undecodable inbound event.
pub fn record_malformed_event() {
    counter!("quote_snapshotter_malformed_events_total").increment(1);
}

/// Record a resubscription after the stream ended.
pub fn record_stream_restart() {
    counter!("quote_snapshotter_stream_restarts_total").increment(1);
}

/// Update the quote table size.
#[allow(clippy::cast_precision_loss)]
pub fn set_quote_table_size(size: usize) {
    gauge!("quote_snapshotter_quote_table_size").set(size as f64);
}

/// Update the number of instruments still blocking readiness.
#[allow(clippy::cast_precision_loss)]
pub fn set_readiness_pending(pending: usize) {
    gauge!("quote_snapshotter_readiness_pending").set(pending as f64);
}

/// Record a completed cycle and its duration.
pub fn record_cycle(duration: Duration) {
    counter!("quote_snapshotter_cycles_total").increment(1);
    histogram!("quote_snapshotter_cycle_duration_seconds").record(duration.as_secs_f64());
}

/// Record a position excluded from a cycle.
pub fn record_position_skipped(reason: SkipReason) {
    counter!(
        "quote_snapshotter_positions_skipped_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record groups excluded from a cycle.
pub fn record_groups_skipped(count: u64) {
    counter!("quote_snapshotter_groups_skipped_total").increment(count);
}

/// Record rows appended to a log.
pub fn record_rows_written(log: LogKind, rows: u64) {
    counter!(
        "quote_snapshotter_rows_written_total",
        "log" => log.as_str()
    )
    .increment(rows);
}

/// Record a failed append.
pub fn record_write_failure(log: LogKind) {
    counter!(
        "quote_snapshotter_write_failures_total",
        "log" => log.as_str()
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================
