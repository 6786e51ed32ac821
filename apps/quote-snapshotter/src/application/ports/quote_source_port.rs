//! Quote Source Port (Driven Port)
//!
//! Interface for receiving streaming quote updates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::quotes::{InstrumentId, Quote};

/// A single inbound quote update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteEvent {
    /// Instrument the update is for.
    pub instrument_id: InstrumentId,
    /// Bid price.
    pub bid_price: Option<Decimal>,
    /// Ask price.
    pub ask_price: Option<Decimal>,
    /// Bid size.
    pub bid_size: Option<Decimal>,
    /// Ask size.
    pub ask_size: Option<Decimal>,
    /// Feed timestamp, if the feed supplied one.
    pub observed_at: Option<DateTime<Utc>>,
}

impl QuoteEvent {
    /// Two-sided event without sizes or feed timestamp.
    #[must_use]
    pub fn two_sided(instrument_id: impl Into<InstrumentId>, bid: Decimal, ask: Decimal) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            bid_price: Some(bid),
            ask_price: Some(ask),
            bid_size: None,
            ask_size: None,
            observed_at: None,
        }
    }

    /// Convert into a table entry, stamping `received_at` when the feed
    /// did not provide a timestamp.
    #[must_use]
    pub fn into_quote(self, received_at: DateTime<Utc>) -> Quote {
        Quote {
            instrument_id: self.instrument_id,
            bid_price: self.bid_price,
            ask_price: self.ask_price,
            bid_size: self.bid_size,
            ask_size: self.ask_size,
            observed_at: self.observed_at.unwrap_or(received_at),
        }
    }
}

/// Quote source error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuoteSourceError {
    /// Could not establish the connection.
    #[error("Quote source connection failed: {message}")]
    ConnectionFailed {
        /// Error details.
        message: String,
    },

    /// Credentials were rejected.
    #[error("Quote source authentication failed: {message}")]
    AuthenticationFailed {
        /// Error details.
        message: String,
    },

    /// The subscription request was rejected or not confirmed.
    #[error("Subscription rejected: {message}")]
    SubscriptionRejected {
        /// Error details.
        message: String,
    },

    /// An inbound event could not be decoded.
    #[error("Malformed event: {message}")]
    MalformedEvent {
        /// Error details.
        message: String,
    },

    /// Transport-level failure after the subscription was established.
    #[error("Transport error: {message}")]
    Transport {
        /// Error details.
        message: String,
    },
}

impl QuoteSourceError {
    /// Whether consumption can continue after this error.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::MalformedEvent { .. })
    }
}

/// Port for a streaming quote feed.
///
/// `next_event` returns `None` once the stream has ended.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuoteSource: Send {
    /// Subscribe to quotes for the given instruments.
    async fn subscribe(&mut self, instruments: &[InstrumentId]) -> Result<(), QuoteSourceError>;

    /// Wait for the next inbound event.
    async fn next_event(&mut self) -> Option<Result<QuoteEvent, QuoteSourceError>>;

    /// Release the subscription and close the stream.
    async fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn feed_timestamp_wins_over_receive_time() {
        let feed_time = DateTime::parse_from_rfc3339("2025-01-02T14:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let event = QuoteEvent {
            observed_at: Some(feed_time),
            ..QuoteEvent::two_sided("AAA", dec!(1), dec!(2))
        };

        assert_eq!(event.into_quote(Utc::now()).observed_at, feed_time);
    }

    #[test]
    fn receive_time_fills_missing_timestamp() {
        let now = Utc::now();
        let quote = QuoteEvent::two_sided("AAA", dec!(1), dec!(2)).into_quote(now);
        assert_eq!(quote.observed_at, now);
        assert_eq!(quote.bid_price, Some(dec!(1)));
    }

    #[test]
    fn only_malformed_events_are_recoverable() {
        assert!(
            QuoteSourceError::MalformedEvent {
                message: "bad".into()
            }
            .is_recoverable()
        );
        assert!(
            !QuoteSourceError::Transport {
                message: "reset".into()
            }
            .is_recoverable()
        );
    }
}
