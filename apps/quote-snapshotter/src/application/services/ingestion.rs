//! Ingestion Engine
//!
//! Consumes the quote stream and writes every update for a subscribed
//! instrument into the quote table.
//!
//! The engine is the table's only writer. It runs until the shutdown token
//! fires, the stream ends, or the stream fails. Stream end and failure are
//! reported through [`IngestionOutcome`] rather than propagated, and may be
//! followed by a resubscription when enabled.

use std::collections::HashSet;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::backoff::{Backoff, BackoffConfig};
use crate::application::ports::{QuoteEvent, QuoteSource, QuoteSourceError};
use crate::domain::quotes::{InstrumentId, QuoteWriter};
use crate::infrastructure::metrics;

/// Behaviour after the stream ends.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestionSettings {
    /// Resubscribe after the stream ends or fails.
    pub resubscribe: bool,
    /// Delays between resubscription attempts.
    pub backoff: BackoffConfig,
}

/// How ingestion stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestionOutcome {
    /// The shutdown token fired.
    Cancelled,
    /// The stream ended without error.
    StreamEnded,
    /// The stream failed with a non-recoverable error.
    Failed(QuoteSourceError),
}

impl IngestionOutcome {
    /// Whether ingestion stopped because of shutdown.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Writes streamed quotes into the quote table.
pub struct IngestionEngine<S> {
    source: S,
    writer: QuoteWriter,
    instruments: Vec<InstrumentId>,
    subscribed: HashSet<InstrumentId>,
    settings: IngestionSettings,
    cancel: CancellationToken,
}

impl<S: QuoteSource> IngestionEngine<S> {
    /// Create an engine for the given instruments.
    #[must_use]
    pub fn new(
        source: S,
        writer: QuoteWriter,
        instruments: Vec<InstrumentId>,
        settings: IngestionSettings,
        cancel: CancellationToken,
    ) -> Self {
        let subscribed = instruments.iter().cloned().collect();
        Self {
            source,
            writer,
            instruments,
            subscribed,
            settings,
            cancel,
        }
    }

    /// Establish the initial subscription.
    ///
    /// # Errors
    ///
    /// Returns the source's error if the subscription is rejected or the
    /// connection cannot be established.
    pub async fn subscribe(&mut self) -> Result<(), QuoteSourceError> {
        tracing::info!(instruments = self.instruments.len(), "Subscribing to quotes");
        self.source.subscribe(&self.instruments).await
    }

    /// Consume the stream until cancellation or termination.
    pub async fn run(mut self) -> IngestionOutcome {
        let mut backoff = Backoff::new(self.settings.backoff.clone());

        loop {
            let outcome = self.consume().await;
            match &outcome {
                IngestionOutcome::Cancelled => {
                    tracing::info!("Ingestion cancelled, closing quote stream");
                    self.source.close().await;
                    return outcome;
                }
                IngestionOutcome::StreamEnded => tracing::warn!("Quote stream ended"),
                IngestionOutcome::Failed(e) => tracing::error!(error = %e, "Quote stream failed"),
            }

            if !self.settings.resubscribe {
                self.source.close().await;
                return outcome;
            }

            match self.resubscribe(&mut backoff).await {
                Some(stop) => {
                    self.source.close().await;
                    return if stop.is_cancelled() { stop } else { outcome };
                }
                None => backoff.reset(),
            }
        }
    }

    async fn consume(&mut self) -> IngestionOutcome {
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return IngestionOutcome::Cancelled,
                event = self.source.next_event() => match event {
                    Some(Ok(event)) => self.apply(event),
                    Some(Err(e)) if e.is_recoverable() => {
                        tracing::warn!(error = %e, "Skipping malformed event");
                        metrics::record_malformed_event();
                    }
                    Some(Err(e)) => return IngestionOutcome::Failed(e),
                    None => return IngestionOutcome::StreamEnded,
                },
            }
        }
    }

    /// Retry the subscription until it succeeds (`None`) or ingestion has
    /// to stop (`Some`).
    async fn resubscribe(&mut self, backoff: &mut Backoff) -> Option<IngestionOutcome> {
        loop {
            let Some(delay) = backoff.next_delay() else {
                tracing::error!(
                    attempts = backoff.attempts(),
                    "Giving up on resubscription"
                );
                return Some(IngestionOutcome::StreamEnded);
            };
            tracing::info!(
                attempt = backoff.attempts(),
                delay_ms = delay.as_millis(),
                "Resubscribing to quote stream"
            );

            tokio::select! {
                () = self.cancel.cancelled() => return Some(IngestionOutcome::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }

            match self.source.subscribe(&self.instruments).await {
                Ok(()) => {
                    tracing::info!("Quote stream resubscribed");
                    metrics::record_stream_restart();
                    return None;
                }
                Err(e) => tracing::warn!(error = %e, "Resubscription failed"),
            }
        }
    }

    fn apply(&self, event: QuoteEvent) {
        if !self.subscribed.contains(&event.instrument_id) {
            tracing::debug!(instrument = %event.instrument_id, "Ignoring unsubscribed instrument");
            metrics::record_quote_ignored();
            return;
        }
        self.writer.upsert(event.into_quote(Utc::now()));
        metrics::record_quote_received();
        metrics::set_quote_table_size(self.writer.len());
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::application::ports::MockQuoteSource;
    use crate::domain::quotes::QuoteTable;

    fn ids(symbols: &[&str]) -> Vec<InstrumentId> {
        symbols.iter().map(ToString::to_string).collect()
    }

    fn scripted(
        events: Vec<Option<Result<QuoteEvent, QuoteSourceError>>>,
    ) -> (MockQuoteSource, Arc<Mutex<u32>>) {
        let queue = Arc::new(Mutex::new(VecDeque::from(events)));
        let closes = Arc::new(Mutex::new(0));
        let mut source = MockQuoteSource::new();
        source.expect_subscribe().returning(|_| Ok(()));
        source
            .expect_next_event()
            .returning(move || queue.lock().pop_front().flatten());
        let counter = Arc::clone(&closes);
        source.expect_close().returning(move || *counter.lock() += 1);
        (source, closes)
    }

    #[tokio::test]
    async fn applies_subscribed_quotes_and_ignores_others() {
        let (source, closes) = scripted(vec![
            Some(Ok(QuoteEvent::two_sided("AAA", dec!(1), dec!(2)))),
            Some(Ok(QuoteEvent::two_sided("ZZZ", dec!(9), dec!(9)))),
            Some(Ok(QuoteEvent::two_sided("AAA", dec!(3), dec!(4)))),
            None,
        ]);
        let (table, writer) = QuoteTable::with_writer();
        let engine = IngestionEngine::new(
            source,
            writer,
            ids(&["AAA"]),
            IngestionSettings::default(),
            CancellationToken::new(),
        );

        let outcome = engine.run().await;

        assert_eq!(outcome, IngestionOutcome::StreamEnded);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("AAA").unwrap().bid_price, Some(dec!(3)));
        assert!(table.get("ZZZ").is_none());
        assert_eq!(*closes.lock(), 1);
    }

    #[tokio::test]
    async fn malformed_events_are_skipped() {
        let (source, _) = scripted(vec![
            Some(Err(QuoteSourceError::MalformedEvent {
                message: "not json".into(),
            })),
            Some(Ok(QuoteEvent::two_sided("AAA", dec!(1), dec!(2)))),
            None,
        ]);
        let (table, writer) = QuoteTable::with_writer();
        let engine = IngestionEngine::new(
            source,
            writer,
            ids(&["AAA"]),
            IngestionSettings::default(),
            CancellationToken::new(),
        );

        assert_eq!(engine.run().await, IngestionOutcome::StreamEnded);
        assert!(table.get("AAA").is_some());
    }

    #[tokio::test]
    async fn transport_error_ends_ingestion() {
        let error = QuoteSourceError::Transport {
            message: "reset".into(),
        };
        let (source, _) = scripted(vec![Some(Err(error.clone()))]);
        let (_table, writer) = QuoteTable::with_writer();
        let engine = IngestionEngine::new(
            source,
            writer,
            ids(&["AAA"]),
            IngestionSettings::default(),
            CancellationToken::new(),
        );

        assert_eq!(engine.run().await, IngestionOutcome::Failed(error));
    }

    #[tokio::test]
    async fn cancellation_closes_the_stream() {
        let closes = Arc::new(Mutex::new(0));
        let mut source = MockQuoteSource::new();
        source.expect_next_event().never();
        let counter = Arc::clone(&closes);
        source.expect_close().returning(move || *counter.lock() += 1);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let (_table, writer) = QuoteTable::with_writer();
        let engine = IngestionEngine::new(
            source,
            writer,
            ids(&["AAA"]),
            IngestionSettings::default(),
            cancel,
        );

        assert_eq!(engine.run().await, IngestionOutcome::Cancelled);
        assert_eq!(*closes.lock(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn resubscribes_after_stream_end_until_attempts_run_out() {
        let mut source = MockQuoteSource::new();
        let events = Arc::new(Mutex::new(VecDeque::from(vec![
            None,
            Some(Ok(QuoteEvent::two_sided("AAA", dec!(1), dec!(2)))),
            None,
        ])));
        let subscribes = Arc::new(Mutex::new(VecDeque::from(vec![
            Ok(()),
            Err(QuoteSourceError::ConnectionFailed {
                message: "down".into(),
            }),
        ])));
        let attempts = Arc::new(Mutex::new(0));

        let counter = Arc::clone(&attempts);
        source.expect_subscribe().returning(move |_| {
            *counter.lock() += 1;
            subscribes.lock().pop_front().unwrap_or_else(|| {
                Err(QuoteSourceError::ConnectionFailed {
                    message: "still down".into(),
                })
            })
        });
        source
            .expect_next_event()
            .returning(move || events.lock().pop_front().flatten());
        source.expect_close().return_const(());

        let (table, writer) = QuoteTable::with_writer();
        let settings = IngestionSettings {
            resubscribe: true,
            backoff: BackoffConfig {
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(10),
                multiplier: 1.0,
                jitter_factor: 0.0,
                max_attempts: 2,
            },
        };
        let engine = IngestionEngine::new(
            source,
            writer,
            ids(&["AAA"]),
            settings,
            CancellationToken::new(),
        );

        assert_eq!(engine.run().await, IngestionOutcome::StreamEnded);
        assert!(table.get("AAA").is_some());
        // One successful resubscription, then two failed attempts.
        assert_eq!(*attempts.lock(), 3);
    }
}
