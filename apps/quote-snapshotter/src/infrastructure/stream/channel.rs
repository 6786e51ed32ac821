//! In-Process Quote Source
//!
//! [`QuoteSource`] fed through a Tokio channel. Used to drive the pipeline
//! from another task (replays, integration tests) without a network feed.
//! Dropping every [`QuoteFeed`] ends the stream.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::application::ports::{QuoteEvent, QuoteSource, QuoteSourceError};
use crate::domain::quotes::InstrumentId;

type FeedItem = Result<QuoteEvent, QuoteSourceError>;

/// Sending half: pushes events into a [`ChannelQuoteSource`].
#[derive(Debug, Clone)]
pub struct QuoteFeed {
    tx: mpsc::Sender<FeedItem>,
    subscribed: Arc<Mutex<Vec<InstrumentId>>>,
}

impl QuoteFeed {
    /// Push a quote event.
    ///
    /// Returns `false` if the source has been closed.
    pub async fn send(&self, event: QuoteEvent) -> bool {
        self.tx.send(Ok(event)).await.is_ok()
    }

    /// Push a source error.
    ///
    /// Returns `false` if the source has been closed.
    pub async fn fail(&self, error: QuoteSourceError) -> bool {
        self.tx.send(Err(error)).await.is_ok()
    }

    /// Whether the source side has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Instruments of the most recent subscription.
    #[must_use]
    pub fn subscribed(&self) -> Vec<InstrumentId> {
        self.subscribed.lock().clone()
    }
}

/// Receiving half, implementing [`QuoteSource`].
#[derive(Debug)]
pub struct ChannelQuoteSource {
    rx: mpsc::Receiver<FeedItem>,
    subscribed: Arc<Mutex<Vec<InstrumentId>>>,
}

impl ChannelQuoteSource {
    /// Create a source and its feed with room for `buffer` queued events.
    #[must_use]
    pub fn new(buffer: usize) -> (Self, QuoteFeed) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let subscribed = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                rx,
                subscribed: Arc::clone(&subscribed),
            },
            QuoteFeed { tx, subscribed },
        )
    }
}

#[async_trait]
impl QuoteSource for ChannelQuoteSource {
    async fn subscribe(&mut self, instruments: &[InstrumentId]) -> Result<(), QuoteSourceError> {
        if self.rx.is_closed() {
            return Err(QuoteSourceError::ConnectionFailed {
                message: "channel source is closed".to_string(),
            });
        }
        *self.subscribed.lock() = instruments.to_vec();
        tracing::debug!(instruments = instruments.len(), "Channel source subscribed");
        Ok(())
    }

    async fn next_event(&mut self) -> Option<FeedItem> {
        self.rx.recv().await
    }

    async fn close(&mut self) {
        self.rx.close();
        self.subscribed.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[tokio::test]
    async fn events_flow_in_order_until_feed_drops() {
        let (mut source, feed) = ChannelQuoteSource::new(8);
        source.subscribe(&["AAA".to_string()]).await.unwrap();
        assert_eq!(feed.subscribed(), vec!["AAA"]);

        assert!(feed.send(QuoteEvent::two_sided("AAA", dec!(1), dec!(2))).await);
        assert!(
            feed.fail(QuoteSourceError::MalformedEvent {
                message: "bad".into()
            })
            .await
        );
        drop(feed);

        assert_eq!(
            source.next_event().await.unwrap().unwrap().instrument_id,
            "AAA"
        );
        assert!(source.next_event().await.unwrap().is_err());
        assert!(source.next_event().await.is_none());
    }

    #[tokio::test]
    async fn close_is_visible_to_the_feed() {
        let (mut source, feed) = ChannelQuoteSource::new(1);
        source.subscribe(&["AAA".to_string()]).await.unwrap();

        source.close().await;

        assert!(feed.is_closed());
        assert!(feed.subscribed().is_empty());
        assert!(!feed.send(QuoteEvent::two_sided("AAA", dec!(1), dec!(2))).await);
        assert!(source.subscribe(&["AAA".to_string()]).await.is_err());
    }
}
