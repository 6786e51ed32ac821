//! Position Set
//!
//! Positions grouped by strategy name. The set is loaded once at startup
//! and never changes for the lifetime of the process.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::quotes::InstrumentId;

/// A single position leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Group (strategy) the position belongs to.
    pub group_name: String,
    /// Streamer symbol used to correlate quotes.
    pub instrument_id: InstrumentId,
    /// Signed quantity; negative means short.
    pub quantity: Decimal,
    /// Price at which the position was opened.
    pub open_price: Decimal,
}

impl Position {
    /// Create a position.
    #[must_use]
    pub fn new(
        group_name: impl Into<String>,
        instrument_id: impl Into<InstrumentId>,
        quantity: Decimal,
        open_price: Decimal,
    ) -> Self {
        Self {
            group_name: group_name.into(),
            instrument_id: instrument_id.into(),
            quantity,
            open_price,
        }
    }

    /// Whether the position is short.
    #[must_use]
    pub fn is_short(&self) -> bool {
        self.quantity.is_sign_negative() && !self.quantity.is_zero()
    }
}

/// Error building a portfolio.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortfolioError {
    /// The position set contains no positions.
    #[error("portfolio contains no positions")]
    Empty,
}

/// Immutable, non-empty position set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Portfolio {
    positions: Vec<Position>,
}

impl Portfolio {
    /// Build a portfolio from loaded positions.
    ///
    /// # Errors
    ///
    /// Returns [`PortfolioError::Empty`] if `positions` is empty.
    pub fn new(positions: Vec<Position>) -> Result<Self, PortfolioError> {
        if positions.is_empty() {
            return Err(PortfolioError::Empty);
        }
        Ok(Self { positions })
    }

    /// All positions in load order.
    #[must_use]
    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    /// Number of positions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Always false; an empty portfolio cannot be constructed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Distinct instruments in first-appearance order.
    #[must_use]
    pub fn instruments(&self) -> Vec<InstrumentId> {
        let mut seen = Vec::new();
        for position in &self.positions {
            if !seen.contains(&position.instrument_id) {
                seen.push(position.instrument_id.clone());
            }
        }
        seen
    }

    /// Distinct group names in first-appearance order.
    #[must_use]
    pub fn group_names(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for position in &self.positions {
            if !seen.contains(&position.group_name.as_str()) {
                seen.push(&position.group_name);
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample() -> Portfolio {
        Portfolio::new(vec![
            Position::new("G1", "AAA", dec!(10), dec!(5.00)),
            Position::new("G2", "CCC", dec!(1), dec!(1.00)),
            Position::new("G1", "BBB", dec!(-5), dec!(2.00)),
            Position::new("G2", "AAA", dec!(-2), dec!(5.10)),
        ])
        .unwrap()
    }

    #[test]
    fn empty_portfolio_is_rejected() {
        assert_eq!(Portfolio::new(vec![]), Err(PortfolioError::Empty));
    }

    #[test]
    fn instruments_are_deduplicated_in_order() {
        assert_eq!(sample().instruments(), vec!["AAA", "CCC", "BBB"]);
    }

    #[test]
    fn group_names_are_deduplicated_in_order() {
        assert_eq!(sample().group_names(), vec!["G1", "G2"]);
    }

    #[test]
    fn short_detection() {
        assert!(Position::new("G", "X", dec!(-1), dec!(1)).is_short());
        assert!(!Position::new("G", "X", dec!(1), dec!(1)).is_short());
        assert!(!Position::new("G", "X", dec!(0), dec!(1)).is_short());
    }
}
