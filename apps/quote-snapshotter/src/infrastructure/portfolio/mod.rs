//! Position File Loader
//!
//! Reads the position set from a CSV file with at least the columns
//! `group_name`, `streamer_symbol`, `quantity` and `open_price`. Other
//! columns are ignored.

use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::domain::portfolio::{Portfolio, PortfolioError, Position};

/// Columns every position file must have.
pub const REQUIRED_COLUMNS: [&str; 4] =
    ["group_name", "streamer_symbol", "quantity", "open_price"];

/// Errors loading the position file.
#[derive(Debug, thiserror::Error)]
pub enum PositionFileError {
    /// The file does not exist.
    #[error("Position file not found: {0}")]
    NotFound(PathBuf),

    /// The file could not be read as CSV.
    #[error("Failed to read position file {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying CSV error.
        source: csv::Error,
    },

    /// A required column is missing from the header.
    #[error("Position file {path} is missing column '{column}'")]
    MissingColumn {
        /// File path.
        path: PathBuf,
        /// Column name.
        column: &'static str,
    },

    /// A row could not be parsed.
    #[error("Invalid row at line {line} of {path}: {message}")]
    InvalidRow {
        /// File path.
        path: PathBuf,
        /// 1-based line number.
        line: u64,
        /// What was wrong.
        message: String,
    },

    /// The file has no usable positions.
    #[error("Position file {path}: {source}")]
    Empty {
        /// File path.
        path: PathBuf,
        /// Domain error.
        source: PortfolioError,
    },
}

#[derive(Debug, Deserialize)]
struct PositionRow {
    group_name: String,
    streamer_symbol: String,
    quantity: Decimal,
    open_price: Decimal,
}

/// Load the position set.
///
/// Rows with a blank `streamer_symbol` are skipped with a warning.
///
/// # Errors
///
/// Returns an error if the file is missing, unreadable, lacks a required
/// column, contains an unparsable row, or yields no positions.
pub fn load_positions(path: &Path) -> Result<Portfolio, PositionFileError> {
    if !path.exists() {
        return Err(PositionFileError::NotFound(path.to_path_buf()));
    }
    let read_error = |source| PositionFileError::Read {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(read_error)?;
    let headers = reader.headers().map_err(read_error)?.clone();
    for column in REQUIRED_COLUMNS {
        if !headers.iter().any(|h| h == column) {
            return Err(PositionFileError::MissingColumn {
                path: path.to_path_buf(),
                column,
            });
        }
    }

    let mut positions = Vec::new();
    for record in reader.records() {
        let record = record.map_err(read_error)?;
        let line = record.position().map_or(0, csv::Position::line);
        let row: PositionRow =
            record
                .deserialize(Some(&headers))
                .map_err(|e| PositionFileError::InvalidRow {
                    path: path.to_path_buf(),
                    line,
                    message: e.to_string(),
                })?;

        if row.streamer_symbol.is_empty() {
            tracing::warn!(line, group = %row.group_name, "Skipping position without streamer symbol");
            continue;
        }
        positions.push(Position::new(
            row.group_name,
            row.streamer_symbol,
            row.quantity,
            row.open_price,
        ));
    }

    let portfolio = Portfolio::new(positions).map_err(|source| PositionFileError::Empty {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(
        path = %path.display(),
        positions = portfolio.len(),
        groups = portfolio.group_names().len(),
        instruments = portfolio.instruments().len(),
        short = portfolio.positions().iter().filter(|p| p.is_short()).count(),
        "Positions loaded"
    );
    Ok(portfolio)
}
