//! Quote Table
//!
//! Latest-known quote per instrument, shared between the ingestion task
//! (sole writer) and the readiness gate and aggregation cycle (readers).
//!
//! # Design
//!
//! The table is split into two handles over the same map:
//! - [`QuoteWriter`]: not `Clone`, owned by the ingestion engine
//! - [`QuoteTable`]: cheap to clone, read-only
//!
//! Every upsert and every snapshot takes the lock once, so a reader sees the
//! table as of a single point between two updates. Different instruments may
//! carry different observation times.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Types
// =============================================================================

/// Feed-specific instrument identifier (streamer symbol).
pub type InstrumentId = String;

/// Point-in-time copy of the whole table.
pub type QuoteSnapshot = HashMap<InstrumentId, Quote>;

/// Latest quote for one instrument.
///
/// Either side of the market may be absent until the feed has published a
/// two-sided quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Instrument identifier.
    pub instrument_id: InstrumentId,
    /// Best bid price.
    pub bid_price: Option<Decimal>,
    /// Best ask price.
    pub ask_price: Option<Decimal>,
    /// Bid size.
    pub bid_size: Option<Decimal>,
    /// Ask size.
    pub ask_size: Option<Decimal>,
    /// When the quote was observed.
    pub observed_at: DateTime<Utc>,
}

impl Quote {
    /// Create a two-sided quote observed now.
    #[must_use]
    pub fn two_sided(instrument_id: impl Into<InstrumentId>, bid: Decimal, ask: Decimal) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            bid_price: Some(bid),
            ask_price: Some(ask),
            bid_size: None,
            ask_size: None,
            observed_at: Utc::now(),
        }
    }

    /// Whether both bid and ask are present.
    #[must_use]
    pub const fn is_two_sided(&self) -> bool {
        self.bid_price.is_some() && self.ask_price.is_some()
    }

    /// Arithmetic mean of bid and ask, if both are present and their sum
    /// fits in a `Decimal`.
    #[must_use]
    pub fn mid(&self) -> Option<Decimal> {
        let sum = self.bid_price?.checked_add(self.ask_price?)?;
        sum.checked_div(Decimal::TWO)
    }
}

// =============================================================================
// Quote Table
// =============================================================================

type SharedQuotes = Arc<RwLock<HashMap<InstrumentId, Quote>>>;

/// Read-only handle to the quote table.
#[derive(Debug, Clone, Default)]
pub struct QuoteTable {
    quotes: SharedQuotes,
}

/// Exclusive write handle to the quote table.
#[derive(Debug)]
pub struct QuoteWriter {
    quotes: SharedQuotes,
}

impl QuoteTable {
    /// Create an empty table together with its only writer.
    #[must_use]
    pub fn with_writer() -> (Self, QuoteWriter) {
        let quotes = SharedQuotes::default();
        (
            Self {
                quotes: Arc::clone(&quotes),
            },
            QuoteWriter { quotes },
        )
    }

    /// Copy of every entry, taken under a single read lock.
    #[must_use]
    pub fn snapshot(&self) -> QuoteSnapshot {
        self.quotes.read().clone()
    }

    /// Latest quote for an instrument.
    #[must_use]
    pub fn get(&self, instrument_id: &str) -> Option<Quote> {
        self.quotes.read().get(instrument_id).cloned()
    }

    /// Number of instruments that have received at least one quote.
    #[must_use]
    pub fn len(&self) -> usize {
        self.quotes.read().len()
    }

    /// Whether no quote has been received yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.quotes.read().is_empty()
    }

    /// Instruments from `instruments` that do not yet have a two-sided quote.
    ///
    /// Order follows the input slice.
    #[must_use]
    pub fn missing_two_sided(&self, instruments: &[InstrumentId]) -> Vec<InstrumentId> {
        let quotes = self.quotes.read();
        instruments
            .iter()
            .filter(|id| !quotes.get(id.as_str()).is_some_and(Quote::is_two_sided))
            .cloned()
            .collect()
    }
}

impl QuoteWriter {
    /// Replace the entry for the quote's instrument (last write wins).
    ///
    /// Returns the quote that was replaced, if any.
    pub fn upsert(&self, quote: Quote) -> Option<Quote> {
        self.quotes
            .write()
            .insert(quote.instrument_id.clone(), quote)
    }

    /// Number of instruments in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.quotes.read().len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.quotes.read().is_empty()
    }

    /// A read handle over the same table.
    #[must_use]
    pub fn reader(&self) -> QuoteTable {
        QuoteTable {
            quotes: Arc::clone(&self.quotes),
        }
    }
}
