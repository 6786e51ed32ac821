//! Quote Stream Adapters
//!
//! Implementations of the [`QuoteSource`](crate::application::ports::QuoteSource)
//! port:
//!
//! - [`WebSocketQuoteSource`]: Alpaca-style JSON market data stream
//! - [`ChannelQuoteSource`]: in-process feed

mod channel;
pub mod codec;
pub mod heartbeat;
pub mod messages;
mod websocket;

pub use channel::{ChannelQuoteSource, QuoteFeed};
pub use codec::{CodecError, JsonCodec};
pub use heartbeat::{Heartbeat, HeartbeatAction, HeartbeatConfig};
pub use websocket::{WebSocketConfig, WebSocketQuoteSource};
