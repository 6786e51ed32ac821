//! Valuation
//!
//! Marks every position at the mid of its instrument's latest quote and sums
//! marks into a net value per group.
//!
//! A position is *usable* when the snapshot holds a quote for its instrument
//! with both a bid and an ask. Unusable positions are excluded from the cycle
//! and reported with a [`SkipReason`]. A group with no usable position is
//! left out of the output entirely and listed in
//! [`CycleValuation::skipped_groups`]; a group with some usable positions is
//! reported from those alone and flagged degraded.
//!
//! All arithmetic is checked. A position whose mark or contribution does not
//! fit in a `Decimal` is skipped with [`SkipReason::Overflow`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::portfolio::{Portfolio, Position};
use crate::domain::quotes::{InstrumentId, Quote, QuoteSnapshot};

// =============================================================================
// Types
// =============================================================================

/// A position priced at the current mid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionMark {
    /// Instrument identifier.
    pub instrument_id: InstrumentId,
    /// Owning group.
    pub group_name: String,
    /// Signed quantity.
    pub quantity: Decimal,
    /// Opening price.
    pub open_price: Decimal,
    /// Mid of bid and ask.
    pub market_price: Decimal,
    /// Bid used for the mark.
    pub bid_price: Decimal,
    /// Ask used for the mark.
    pub ask_price: Decimal,
    /// Bid size, if the feed published one.
    pub bid_size: Option<Decimal>,
    /// Ask size, if the feed published one.
    pub ask_size: Option<Decimal>,
    /// Cycle timestamp.
    pub timestamp: DateTime<Utc>,
}

impl PositionMark {
    /// Contribution of this mark to its group's net value, or `None` if
    /// the product overflows.
    #[must_use]
    pub fn value(&self) -> Option<Decimal> {
        self.market_price.checked_mul(self.quantity)
    }
}

/// Why a position could not be marked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SkipReason {
    /// No quote has been received for the instrument.
    NoQuote,
    /// Quote has an ask but no bid.
    MissingBid,
    /// Quote has a bid but no ask.
    MissingAsk,
    /// Quote carries neither side.
    MissingBothSides,
    /// Mid, mark value or group total does not fit in a `Decimal`.
    Overflow,
}

impl SkipReason {
    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NoQuote => "no_quote",
            Self::MissingBid => "missing_bid",
            Self::MissingAsk => "missing_ask",
            Self::MissingBothSides => "missing_both_sides",
            Self::Overflow => "overflow",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A position excluded from a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedPosition {
    /// Owning group.
    pub group_name: String,
    /// Instrument identifier.
    pub instrument_id: InstrumentId,
    /// Reason the position was excluded.
    pub reason: SkipReason,
}

/// Net value of one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupValuation {
    /// Group name.
    pub group_name: String,
    /// Sum of `market_price * quantity` over usable positions.
    pub net_value: Decimal,
    /// Cycle timestamp.
    pub timestamp: DateTime<Utc>,
    /// Positions that contributed to `net_value`.
    pub priced_positions: usize,
    /// Positions of this group that were excluded.
    pub skipped_positions: usize,
}

impl GroupValuation {
    /// Whether the value was computed from only part of the group.
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        self.skipped_positions > 0
    }
}

/// Everything one aggregation cycle produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleValuation {
    /// Timestamp shared by every row of the cycle.
    pub timestamp: DateTime<Utc>,
    /// Marks for usable positions, in position-set order.
    pub marks: Vec<PositionMark>,
    /// Valuations for groups with at least one usable position.
    pub groups: Vec<GroupValuation>,
    /// Positions excluded from this cycle.
    pub skipped_positions: Vec<SkippedPosition>,
    /// Groups with no usable position.
    pub skipped_groups: Vec<String>,
}

impl CycleValuation {
    /// Valuation for a group, if it was reported this cycle.
    #[must_use]
    pub fn group(&self, group_name: &str) -> Option<&GroupValuation> {
        self.groups.iter().find(|g| g.group_name == group_name)
    }
}

// =============================================================================
// Aggregation
// =============================================================================

/// Value the portfolio against a quote snapshot.
///
/// Pure: the result depends only on the arguments. Groups appear in order of
/// their first position.
#[must_use]
pub fn value_portfolio(
    portfolio: &Portfolio,
    quotes: &QuoteSnapshot,
    timestamp: DateTime<Utc>,
) -> CycleValuation {
    let mut marks = Vec::with_capacity(portfolio.len());
    let mut skipped_positions = Vec::new();
    let mut groups: Vec<GroupValuation> = portfolio
        .group_names()
        .into_iter()
        .map(|name| GroupValuation {
            group_name: name.to_string(),
            net_value: Decimal::ZERO,
            timestamp,
            priced_positions: 0,
            skipped_positions: 0,
        })
        .collect();

    for position in portfolio.positions() {
        let Some(group) = groups
            .iter_mut()
            .find(|g| g.group_name == position.group_name)
        else {
            continue;
        };

        let marked = mark_position(position, quotes.get(&position.instrument_id), timestamp)
            .and_then(|mark| {
                let total = mark
                    .value()
                    .and_then(|value| group.net_value.checked_add(value))
                    .ok_or(SkipReason::Overflow)?;
                Ok((mark, total))
            });

        match marked {
            Ok((mark, total)) => {
                group.net_value = total;
                group.priced_positions += 1;
                marks.push(mark);
            }
            Err(reason) => {
                group.skipped_positions += 1;
                skipped_positions.push(SkippedPosition {
                    group_name: position.group_name.clone(),
                    instrument_id: position.instrument_id.clone(),
                    reason,
                });
            }
        }
    }

    let (groups, empty): (Vec<_>, Vec<_>) =
        groups.into_iter().partition(|g| g.priced_positions > 0);

    CycleValuation {
        timestamp,
        marks,
        groups,
        skipped_positions,
        skipped_groups: empty.into_iter().map(|g| g.group_name).collect(),
    }
}

fn mark_position(
    position: &Position,
    quote: Option<&Quote>,
    timestamp: DateTime<Utc>,
) -> Result<PositionMark, SkipReason> {
    let Some(quote) = quote else {
        return Err(SkipReason::NoQuote);
    };
    let (bid, ask) = match (quote.bid_price, quote.ask_price) {
        (Some(bid), Some(ask)) => (bid, ask),
        (None, Some(_)) => return Err(SkipReason::MissingBid),
        (Some(_), None) => return Err(SkipReason::MissingAsk),
        (None, None) => return Err(SkipReason::MissingBothSides),
    };

    let market_price = bid
        .checked_add(ask)
        .and_then(|sum| sum.checked_div(Decimal::TWO))
        .ok_or(SkipReason::Overflow)?;

    Ok(PositionMark {
        instrument_id: position.instrument_id.clone(),
        group_name: position.group_name.clone(),
        quantity: position.quantity,
        open_price: position.open_price,
        market_price,
        bid_price: bid,
        ask_price: ask,
        bid_size: quote.bid_size,
        ask_size: quote.ask_size,
        timestamp,
    })
}
