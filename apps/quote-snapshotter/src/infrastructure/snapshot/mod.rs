//! Snapshot Log Writer
//!
//! Appends each cycle to two CSV logs, one file per calendar day:
//!
//! - strategy log: `timestamp,group_name,net_value`
//! - positions log: one mark per usable position
//!
//! A log gets its header when it is created or found empty, so restarts
//! never duplicate it. Rows are only ever appended. The two logs are
//! written independently; a failure on one is reported and does not stop
//! the other.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use tokio::io::AsyncWriteExt;

use crate::application::ports::{AppendSummary, SnapshotError, SnapshotSink};
use crate::domain::valuation::CycleValuation;
use crate::infrastructure::config::{DATE_PLACEHOLDER, OutputConfig};
use crate::infrastructure::metrics::{self, LogKind};

/// Strategy log header.
pub const STRATEGY_HEADER: [&str; 3] = ["timestamp", "group_name", "net_value"];

/// Positions log header.
pub const POSITIONS_HEADER: [&str; 10] = [
    "timestamp",
    "group_name",
    "streamer_symbol",
    "quantity",
    "open_price",
    "market_price",
    "bid_price",
    "ask_price",
    "bid_size",
    "ask_size",
];

const DATE_FORMAT: &str = "%Y%m%d";

// =============================================================================
// Layout
// =============================================================================

/// Where the logs live and how their daily filenames are built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotLayout {
    directory: PathBuf,
    strategy_template: String,
    positions_template: String,
    timezone: Tz,
}

impl SnapshotLayout {
    /// Create a layout. Templates should contain `{date}`.
    #[must_use]
    pub fn new(
        directory: impl Into<PathBuf>,
        strategy_template: impl Into<String>,
        positions_template: impl Into<String>,
        timezone: Tz,
    ) -> Self {
        Self {
            directory: directory.into(),
            strategy_template: strategy_template.into(),
            positions_template: positions_template.into(),
            timezone,
        }
    }

    /// Layout from validated output configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured timezone is unknown.
    pub fn from_config(
        output: &OutputConfig,
    ) -> Result<Self, crate::infrastructure::config::ConfigError> {
        Ok(Self::new(
            output.directory.clone(),
            output.strategy_filename_template.clone(),
            output.positions_filename_template.clone(),
            output.tz()?,
        ))
    }

    /// Output directory.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of a log for the calendar day containing `at`.
    #[must_use]
    pub fn path_for(&self, log: LogKind, at: DateTime<Utc>) -> PathBuf {
        let template = match log {
            LogKind::Strategy => &self.strategy_template,
            LogKind::Positions => &self.positions_template,
        };
        let date = at.with_timezone(&self.timezone).format(DATE_FORMAT).to_string();
        self.directory.join(template.replace(DATE_PLACEHOLDER, &date))
    }
}

// =============================================================================
// Writer
// =============================================================================

/// CSV snapshot sink.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    layout: SnapshotLayout,
}

impl SnapshotWriter {
    /// Create a writer.
    #[must_use]
    pub const fn new(layout: SnapshotLayout) -> Self {
        Self { layout }
    }

    /// Layout in use.
    #[must_use]
    pub const fn layout(&self) -> &SnapshotLayout {
        &self.layout
    }

    /// Create the output directory and today's logs with their headers.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or either log cannot be created.
    pub async fn prepare(&self, now: DateTime<Utc>) -> Result<(), SnapshotError> {
        let directory = self.layout.directory();
        tokio::fs::create_dir_all(directory)
            .await
            .map_err(|source| SnapshotError::CreateDirectory {
                path: directory.to_path_buf(),
                source,
            })?;

        for log in [LogKind::Strategy, LogKind::Positions] {
            let path = self.layout.path_for(log, now);
            append_rows(&path, header(log), &[]).await?;
            tracing::info!(log = log.as_str(), path = %path.display(), "Snapshot log ready");
        }
        Ok(())
    }

    async fn append_log(
        &self,
        log: LogKind,
        rows: &[Vec<String>],
        at: DateTime<Utc>,
    ) -> Result<usize, SnapshotError> {
        let path = self.layout.path_for(log, at);
        append_rows(&path, header(log), rows).await?;
        tracing::debug!(
            log = log.as_str(),
            rows = rows.len(),
            path = %path.display(),
            "Rows appended"
        );
        Ok(rows.len())
    }
}

#[async_trait]
impl SnapshotSink for SnapshotWriter {
    async fn append_cycle(&self, cycle: &CycleValuation) -> AppendSummary {
        let mut summary = AppendSummary::default();

        let strategy = strategy_rows(cycle);
        match self.append_log(LogKind::Strategy, &strategy, cycle.timestamp).await {
            Ok(rows) => {
                summary.valuation_rows = rows;
                metrics::record_rows_written(LogKind::Strategy, rows as u64);
            }
            Err(e) => {
                metrics::record_write_failure(LogKind::Strategy);
                summary.failures.push(e);
            }
        }

        let positions = position_rows(cycle);
        match self.append_log(LogKind::Positions, &positions, cycle.timestamp).await {
            Ok(rows) => {
                summary.mark_rows = rows;
                metrics::record_rows_written(LogKind::Positions, rows as u64);
            }
            Err(e) => {
                metrics::record_write_failure(LogKind::Positions);
                summary.failures.push(e);
            }
        }

        summary
    }
}

// =============================================================================
// Encoding
// =============================================================================

const fn header(log: LogKind) -> &'static [&'static str] {
    match log {
        LogKind::Strategy => &STRATEGY_HEADER,
        LogKind::Positions => &POSITIONS_HEADER,
    }
}

fn strategy_rows(cycle: &CycleValuation) -> Vec<Vec<String>> {
    let timestamp = cycle.timestamp.to_rfc3339();
    cycle
        .groups
        .iter()
        .map(|group| {
            vec![
                timestamp.clone(),
                group.group_name.clone(),
                group.net_value.to_string(),
            ]
        })
        .collect()
}

fn position_rows(cycle: &CycleValuation) -> Vec<Vec<String>> {
    let timestamp = cycle.timestamp.to_rfc3339();
    let size = |s: Option<Decimal>| s.unwrap_or(Decimal::ZERO).to_string();
    cycle
        .marks
        .iter()
        .map(|mark| {
            vec![
                timestamp.clone(),
                mark.group_name.clone(),
                mark.instrument_id.clone(),
                mark.quantity.to_string(),
                mark.open_price.to_string(),
                mark.market_price.to_string(),
                mark.bid_price.to_string(),
                mark.ask_price.to_string(),
                size(mark.bid_size),
                size(mark.ask_size),
            ]
        })
        .collect()
}

fn encode(
    path: &Path,
    header: Option<&[&str]>,
    rows: &[Vec<String>],
) -> Result<Vec<u8>, SnapshotError> {
    let encode_error = |source| SnapshotError::Encode {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    if let Some(header) = header {
        writer.write_record(header).map_err(encode_error)?;
    }
    for row in rows {
        writer.write_record(row).map_err(encode_error)?;
    }
    writer
        .into_inner()
        .map_err(|e| encode_error(csv::Error::from(e.into_error())))
}

/// Append `rows` to `path`, writing `header` first if the file is new or
/// empty. Everything is written with a single `write_all`.
async fn append_rows(
    path: &Path,
    header: &[&str],
    rows: &[Vec<String>],
) -> Result<(), SnapshotError> {
    let append_error = |source| SnapshotError::Append {
        path: path.to_path_buf(),
        source,
    };

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(append_error)?;
    let needs_header = file.metadata().await.map_err(append_error)?.len() == 0;
    if !needs_header && rows.is_empty() {
        return Ok(());
    }

    let bytes = encode(path, needs_header.then_some(header), rows)?;
    file.write_all(&bytes).await.map_err(append_error)?;
    file.flush().await.map_err(append_error)?;
    Ok(())
}
