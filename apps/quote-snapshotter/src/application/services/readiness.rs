//! Readiness Gate
//!
//! One-time barrier before the first aggregation cycle: waits until every
//! subscribed instrument has a two-sided quote.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::domain::quotes::{InstrumentId, QuoteTable};
use crate::infrastructure::metrics;

/// Default interval between table checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Interval between pending-set log lines.
const REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Result of waiting on the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Every instrument has a two-sided quote.
    Ready,
    /// Shutdown was requested first.
    Cancelled,
}

/// Polls the quote table until all instruments are two-sided.
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    table: QuoteTable,
    instruments: Vec<InstrumentId>,
    poll_interval: Duration,
}

impl ReadinessGate {
    /// Create a gate.
    #[must_use]
    pub const fn new(
        table: QuoteTable,
        instruments: Vec<InstrumentId>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            table,
            instruments,
            poll_interval,
        }
    }

    /// Instruments still lacking a two-sided quote.
    #[must_use]
    pub fn pending(&self) -> Vec<InstrumentId> {
        self.table.missing_two_sided(&self.instruments)
    }

    /// Wait until ready or cancelled.
    pub async fn wait(&self, cancel: &CancellationToken) -> Readiness {
        let mut last_report: Option<Instant> = None;

        loop {
            let pending = self.pending();
            metrics::set_readiness_pending(pending.len());
            if pending.is_empty() {
                tracing::info!(
                    instruments = self.instruments.len(),
                    "All instruments have two-sided quotes"
                );
                return Readiness::Ready;
            }

            if last_report.is_none_or(|at| at.elapsed() >= REPORT_INTERVAL) {
                tracing::info!(
                    pending = pending.len(),
                    total = self.instruments.len(),
                    waiting_for = ?pending,
                    "Waiting for quotes"
                );
                last_report = Some(Instant::now());
            }

            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!(pending = pending.len(), "Readiness wait cancelled");
                    return Readiness::Cancelled;
                }
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}
