//! Snapshot Sink Port (Driven Port)
//!
//! Interface for persisting one cycle's valuations and marks.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::domain::valuation::CycleValuation;

/// Snapshot persistence error.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// The output directory could not be created.
    #[error("Cannot create output directory {path}: {source}")]
    CreateDirectory {
        /// Directory path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Appending to a log failed.
    #[error("Failed to append to {path}: {source}")]
    Append {
        /// Log path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Rows could not be encoded.
    #[error("Failed to encode rows for {path}: {source}")]
    Encode {
        /// Log path.
        path: PathBuf,
        /// Underlying CSV error.
        source: csv::Error,
    },
}

/// Outcome of persisting one cycle.
///
/// The two logs are written independently, so one can succeed while the
/// other fails.
#[derive(Debug, Default)]
pub struct AppendSummary {
    /// Group valuation rows written.
    pub valuation_rows: usize,
    /// Position mark rows written.
    pub mark_rows: usize,
    /// Failures, one per log that could not be written.
    pub failures: Vec<SnapshotError>,
}

impl AppendSummary {
    /// Whether both logs were written.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Port for appending snapshot rows.
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    /// Append the cycle's rows. Never fails as a whole; per-log failures
    /// are returned in the summary.
    async fn append_cycle(&self, cycle: &CycleValuation) -> AppendSummary;
}
