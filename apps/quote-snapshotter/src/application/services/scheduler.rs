//! Cycle Scheduler
//!
//! Runs aggregate, persist, sleep on a fixed cadence until shutdown.
//!
//! Cancellation is observed before a cycle starts and while sleeping. The
//! persist step is never raced against the token, so a write that started
//! before shutdown completes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{AppendSummary, SnapshotSink};
use crate::domain::portfolio::Portfolio;
use crate::domain::quotes::QuoteTable;
use crate::domain::valuation::{CycleValuation, value_portfolio};
use crate::infrastructure::metrics;

/// Default time between cycle starts.
pub const DEFAULT_CADENCE: Duration = Duration::from_secs(60);

/// Totals over the lifetime of a runner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    /// Cycles completed.
    pub cycles: u64,
    /// Group valuation rows written.
    pub valuation_rows: u64,
    /// Position mark rows written.
    pub mark_rows: u64,
    /// Log appends that failed.
    pub write_failures: u64,
}

impl CycleStats {
    fn absorb(&mut self, summary: &AppendSummary) {
        self.cycles += 1;
        self.valuation_rows += summary.valuation_rows as u64;
        self.mark_rows += summary.mark_rows as u64;
        self.write_failures += summary.failures.len() as u64;
    }
}

/// Periodic aggregation and persistence loop.
pub struct CycleRunner {
    portfolio: Arc<Portfolio>,
    table: QuoteTable,
    sink: Arc<dyn SnapshotSink>,
    cadence: Duration,
    cancel: CancellationToken,
}

impl CycleRunner {
    /// Create a runner.
    #[must_use]
    pub fn new(
        portfolio: Arc<Portfolio>,
        table: QuoteTable,
        sink: Arc<dyn SnapshotSink>,
        cadence: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            portfolio,
            table,
            sink,
            cadence,
            cancel,
        }
    }

    /// Run cycles until cancelled.
    pub async fn run(self) -> CycleStats {
        let mut stats = CycleStats::default();
        tracing::info!(cadence_secs = self.cadence.as_secs_f64(), "Snapshot loop started");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let summary = self.run_cycle().await;
            stats.absorb(&summary);

            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(self.cadence) => {}
            }
        }

        tracing::info!(
            cycles = stats.cycles,
            valuation_rows = stats.valuation_rows,
            mark_rows = stats.mark_rows,
            write_failures = stats.write_failures,
            "Snapshot loop stopped"
        );
        stats
    }

    /// Aggregate the current quote table and persist the result.
    pub async fn run_cycle(&self) -> AppendSummary {
        let started = Instant::now();
        let valuation = value_portfolio(&self.portfolio, &self.table.snapshot(), Utc::now());
        report(&valuation);

        let summary = self.sink.append_cycle(&valuation).await;
        for failure in &summary.failures {
            tracing::error!(error = %failure, "Snapshot append failed");
        }

        metrics::record_cycle(started.elapsed());
        summary
    }
}

fn report(valuation: &CycleValuation) {
    for group in &valuation.groups {
        if group.is_degraded() {
            tracing::warn!(
                group = %group.group_name,
                net_value = %group.net_value,
                priced = group.priced_positions,
                skipped = group.skipped_positions,
                "Group valued from partial data"
            );
        } else {
            tracing::info!(
                group = %group.group_name,
                net_value = %group.net_value,
                "Group valuation"
            );
        }
    }

    for mark in &valuation.marks {
        tracing::debug!(
            group = %mark.group_name,
            instrument = %mark.instrument_id,
            quantity = %mark.quantity,
            market_price = %mark.market_price,
            "Position mark"
        );
    }

    for skipped in &valuation.skipped_positions {
        tracing::warn!(
            group = %skipped.group_name,
            instrument = %skipped.instrument_id,
            reason = %skipped.reason,
            "Position skipped"
        );
        metrics::record_position_skipped(skipped.reason);
    }

    if !valuation.skipped_groups.is_empty() {
        tracing::warn!(groups = ?valuation.skipped_groups, "Groups without usable quotes");
        metrics::record_groups_skipped(valuation.skipped_groups.len() as u64);
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::domain::portfolio::Position;
    use crate::domain::quotes::Quote;

    #[derive(Default)]
    struct RecordingSink {
        cycles: Mutex<Vec<CycleValuation>>,
    }

    #[async_trait]
    impl SnapshotSink for RecordingSink {
        async fn append_cycle(&self, cycle: &CycleValuation) -> AppendSummary {
            self.cycles.lock().push(cycle.clone());
            AppendSummary {
                valuation_rows: cycle.groups.len(),
                mark_rows: cycle.marks.len(),
                failures: Vec::new(),
            }
        }
    }

    fn runner(sink: Arc<RecordingSink>, cancel: CancellationToken) -> CycleRunner {
        let portfolio = Portfolio::new(vec![
            Position::new("G1", "AAA", dec!(10), dec!(5.00)),
            Position::new("G1", "BBB", dec!(-5), dec!(2.00)),
        ])
        .unwrap();
        let (table, writer) = QuoteTable::with_writer();
        writer.upsert(Quote::two_sided("AAA", dec!(6.00), dec!(6.20)));
        writer.upsert(Quote::two_sided("BBB", dec!(1.80), dec!(2.00)));
        CycleRunner::new(
            Arc::new(portfolio),
            table,
            sink,
            Duration::from_secs(60),
            cancel,
        )
    }

    #[tokio::test]
    async fn cycle_persists_valuation() {
        let sink = Arc::new(RecordingSink::default());
        let runner = runner(Arc::clone(&sink), CancellationToken::new());

        let summary = runner.run_cycle().await;

        assert!(summary.is_complete());
        assert_eq!(summary.valuation_rows, 1);
        assert_eq!(summary.mark_rows, 2);
        let cycles = sink.cycles.lock();
        assert_eq!(cycles[0].group("G1").unwrap().net_value, dec!(51.5));
    }

    #[tokio::test]
    async fn oversized_quote_does_not_stop_later_cycles() {
        let sink = Arc::new(RecordingSink::default());
        let portfolio = Portfolio::new(vec![
            Position::new("G1", "AAA", dec!(10), dec!(5.00)),
            Position::new("G1", "BBB", dec!(-5), dec!(2.00)),
        ])
        .unwrap();
        let (table, writer) = QuoteTable::with_writer();
        let huge = rust_decimal::Decimal::from_i128_with_scale(5 * 10_i128.pow(28), 0);
        writer.upsert(Quote::two_sided("AAA", huge, huge));
        writer.upsert(Quote::two_sided("BBB", dec!(1.80), dec!(2.00)));
        let runner = CycleRunner::new(
            Arc::new(portfolio),
            table,
            Arc::clone(&sink) as Arc<dyn SnapshotSink>,
            Duration::from_secs(60),
            CancellationToken::new(),
        );

        let degraded = runner.run_cycle().await;
        writer.upsert(Quote::two_sided("AAA", dec!(6.00), dec!(6.20)));
        let recovered = runner.run_cycle().await;

        assert_eq!(degraded.mark_rows, 1);
        assert_eq!(recovered.mark_rows, 2);
        let cycles = sink.cycles.lock();
        assert_eq!(cycles[0].group("G1").unwrap().net_value, dec!(-9.5));
        assert_eq!(cycles[1].group("G1").unwrap().net_value, dec!(51.5));
    }

    #[tokio::test(start_paused = true)]
    async fn runs_on_cadence_until_cancelled() {
        let sink = Arc::new(RecordingSink::default());
        let cancel = CancellationToken::new();
        let runner = runner(Arc::clone(&sink), cancel.clone());

        let handle = tokio::spawn(runner.run());
        // Cycles at t=0, 60 and 120.
        tokio::time::sleep(Duration::from_secs(150)).await;
        cancel.cancel();
        let stats = handle.await.unwrap();

        assert_eq!(stats.cycles, 3);
        assert_eq!(stats.mark_rows, 6);
        assert_eq!(sink.cycles.lock().len(), 3);
    }

    #[tokio::test]
    async fn no_cycle_after_cancellation() {
        let sink = Arc::new(RecordingSink::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let runner = runner(Arc::clone(&sink), cancel);

        let stats = runner.run().await;

        assert_eq!(stats, CycleStats::default());
        assert!(sink.cycles.lock().is_empty());
    }
}
