//! Market Data Wire Messages
//!
//! JSON message types of the Alpaca-style market data stream. Every frame
//! is an array of objects discriminated by their `T` field.
//!
//! # Control Messages
//! - `success`: `{"T":"success","msg":"connected"}` or `"authenticated"`
//! - `error`: `{"T":"error","code":402,"msg":"auth failed"}`
//! - `subscription`: `{"T":"subscription","quotes":["AAPL"]}`
//!
//! # Data Messages
//! - `q`: quote; every price, size and the timestamp may be absent
//!
//! Other data types (trades, bars, statuses) are never subscribed and are
//! decoded as [`StreamMessage::Other`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::application::ports::QuoteEvent;
use crate::domain::quotes::InstrumentId;

// =============================================================================
// Control Messages
// =============================================================================

/// Kind of success message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuccessKind {
    /// Connection established.
    Connected,
    /// Authentication accepted.
    Authenticated,
}

/// Success message sent after connecting and after authenticating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessMessage {
    /// "connected" or "authenticated".
    pub msg: SuccessKind,
}

/// Error message with code and description.
///
/// # Error Codes
/// - 401..=404: authentication problems
/// - 405..=407: symbol, connection or slow-client limits
/// - 408: insufficient subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Error code.
    pub code: i32,
    /// Error description.
    pub msg: String,
}

impl ErrorMessage {
    /// Whether this is an authentication error.
    #[must_use]
    pub const fn is_auth_error(&self) -> bool {
        matches!(self.code, 401..=404)
    }

    /// Whether this is a subscription error.
    #[must_use]
    pub const fn is_subscription_error(&self) -> bool {
        matches!(self.code, 405 | 408)
    }
}

impl std::fmt::Display for ErrorMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.msg, self.code)
    }
}

/// Subscription confirmation listing every active quote subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionMessage {
    /// Subscribed quote symbols.
    #[serde(default)]
    pub quotes: Vec<String>,
}

// =============================================================================
// Quote Messages
// =============================================================================

/// Quote message.
///
/// ```json
/// {"T":"q","S":"AMD","bp":87.66,"bs":1,"ap":87.68,"as":4,"t":"2021-02-22T15:51:45.335689322Z"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteMessage {
    /// Streamer symbol.
    #[serde(rename = "S")]
    pub symbol: String,

    /// Bid price.
    #[serde(rename = "bp", default)]
    pub bid_price: Option<Decimal>,

    /// Bid size.
    #[serde(rename = "bs", default)]
    pub bid_size: Option<Decimal>,

    /// Ask price.
    #[serde(rename = "ap", default)]
    pub ask_price: Option<Decimal>,

    /// Ask size.
    #[serde(rename = "as", default)]
    pub ask_size: Option<Decimal>,

    /// Feed timestamp.
    #[serde(rename = "t", default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl From<QuoteMessage> for QuoteEvent {
    fn from(msg: QuoteMessage) -> Self {
        Self {
            instrument_id: msg.symbol,
            bid_price: msg.bid_price,
            ask_price: msg.ask_price,
            bid_size: msg.bid_size,
            ask_size: msg.ask_size,
            observed_at: msg.timestamp,
        }
    }
}

/// A decoded stream message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessage {
    /// Connection or authentication success.
    Success(SuccessMessage),
    /// Server-side error.
    Error(ErrorMessage),
    /// Subscription confirmation.
    Subscription(SubscriptionMessage),
    /// Quote update.
    Quote(QuoteMessage),
    /// Any other message type, by its `T` value.
    Other(String),
}

// =============================================================================
// Requests
// =============================================================================

/// Authentication request.
#[derive(Clone, Serialize)]
pub struct AuthRequest {
    action: &'static str,
    key: String,
    secret: String,
}

impl AuthRequest {
    /// Create an auth request.
    #[must_use]
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            action: "auth",
            key: key.into(),
            secret: secret.into(),
        }
    }
}

impl std::fmt::Debug for AuthRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthRequest")
            .field("key", &"[REDACTED]")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Quote subscription change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionRequest {
    /// "subscribe" or "unsubscribe".
    pub action: &'static str,
    /// Quote symbols.
    pub quotes: Vec<InstrumentId>,
}

impl SubscriptionRequest {
    /// Subscribe to quotes for `symbols`.
    #[must_use]
    pub fn subscribe(symbols: &[InstrumentId]) -> Self {
        Self {
            action: "subscribe",
            quotes: symbols.to_vec(),
        }
    }

    /// Release quotes for `symbols`.
    #[must_use]
    pub fn unsubscribe(symbols: &[InstrumentId]) -> Self {
        Self {
            action: "unsubscribe",
            quotes: symbols.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn quote_with_all_fields() {
        let msg: QuoteMessage = serde_json::from_str(
            r#"{"T":"q","S":"AMD","bx":"U","bp":87.66,"bs":1,"ax":"Q","ap":87.68,"as":4,
                "t":"2021-02-22T15:51:45.335689322Z","c":["R"],"z":"C"}"#,
        )
        .unwrap();

        assert_eq!(msg.symbol, "AMD");
        assert_eq!(msg.bid_price, Some(dec!(87.66)));
        assert_eq!(msg.ask_size, Some(dec!(4)));
        assert!(msg.timestamp.is_some());
    }

    #[test]
    fn quote_with_missing_sides() {
        let msg: QuoteMessage = serde_json::from_str(r#"{"T":"q","S":"AMD","bp":1.5}"#).unwrap();
        let event = QuoteEvent::from(msg);

        assert_eq!(event.bid_price, Some(dec!(1.5)));
        assert_eq!(event.ask_price, None);
        assert_eq!(event.observed_at, None);
    }

    #[test]
    fn subscription_requests_serialize() {
        let symbols = vec!["AAPL".to_string(), "MSFT".to_string()];
        let json = serde_json::to_string(&SubscriptionRequest::subscribe(&symbols)).unwrap();
        assert_eq!(json, r#"{"action":"subscribe","quotes":["AAPL","MSFT"]}"#);

        let json = serde_json::to_string(&SubscriptionRequest::unsubscribe(&symbols[..1])).unwrap();
        assert_eq!(json, r#"{"action":"unsubscribe","quotes":["AAPL"]}"#);
    }

    #[test]
    fn auth_request_serializes_and_redacts() {
        let request = AuthRequest::new("key-id", "secret-value");
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"action":"auth","key":"key-id","secret":"secret-value"}"#);
        assert!(!format!("{request:?}").contains("secret-value"));
    }

    #[test]
    fn error_classification() {
        let auth = ErrorMessage {
            code: 402,
            msg: "auth failed".into(),
        };
        assert!(auth.is_auth_error());
        assert!(!auth.is_subscription_error());
        assert_eq!(auth.to_string(), "auth failed (402)");

        let limit = ErrorMessage {
            code: 405,
            msg: "symbol limit exceeded".into(),
        };
        assert!(limit.is_subscription_error());
    }
}
