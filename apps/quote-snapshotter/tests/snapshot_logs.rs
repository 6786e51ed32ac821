//! Snapshot Log Integration Tests
//!
//! Restart behaviour of the CSV logs: a second writer on the same directory
//! keeps appending without repeating headers.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::{DateTime, Duration, Utc};
use rust_decimal_macros::dec;
use tokio_test::assert_ok;

use quote_snapshotter::domain::quotes::Quote;
use quote_snapshotter::{
    Portfolio, Position, QuoteSnapshot, SnapshotLayout, SnapshotSink, SnapshotWriter,
    value_portfolio,
};

fn layout(dir: &std::path::Path) -> SnapshotLayout {
    SnapshotLayout::new(
        dir,
        "strategy_snapshots_{date}.csv",
        "position_snapshots_{date}.csv",
        chrono_tz::Tz::America__New_York,
    )
}

fn portfolio() -> Portfolio {
    Portfolio::new(vec![
        Position::new("G1", "AAA", dec!(10), dec!(5.00)),
        Position::new("G1", "BBB", dec!(-5), dec!(2.00)),
    ])
    .unwrap()
}

fn quotes(bbb_has_ask: bool) -> QuoteSnapshot {
    let mut quotes = QuoteSnapshot::new();
    quotes.insert("AAA".into(), Quote::two_sided("AAA", dec!(6.00), dec!(6.20)));
    let mut bbb = Quote::two_sided("BBB", dec!(1.80), dec!(2.00));
    if !bbb_has_ask {
        bbb.ask_price = None;
    }
    quotes.insert("BBB".into(), bbb);
    quotes
}

fn start() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-01-02T15:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

#[tokio::test]
async fn restart_appends_without_duplicate_headers() {
    let dir = tempfile::tempdir().unwrap();
    let portfolio = portfolio();

    let first = SnapshotWriter::new(layout(dir.path()));
    assert_ok!(first.prepare(start()).await);
    for minute in 0..2 {
        let at = start() + Duration::minutes(minute);
        let summary = first
            .append_cycle(&value_portfolio(&portfolio, &quotes(true), at))
            .await;
        assert!(summary.is_complete());
    }
    drop(first);

    let second = SnapshotWriter::new(layout(dir.path()));
    assert_ok!(second.prepare(start() + Duration::minutes(5)).await);
    let summary = second
        .append_cycle(&value_portfolio(
            &portfolio,
            &quotes(false),
            start() + Duration::minutes(5),
        ))
        .await;
    assert!(summary.is_complete());
    assert_eq!(summary.mark_rows, 1);

    // 15:00Z is 10:00 in New York, same calendar day.
    let strategy =
        std::fs::read_to_string(dir.path().join("strategy_snapshots_20250102.csv")).unwrap();
    let lines: Vec<_> = strategy.lines().collect();
    assert_eq!(lines[0], "timestamp,group_name,net_value");
    assert_eq!(lines.iter().filter(|l| l.starts_with("timestamp,")).count(), 1);
    assert_eq!(lines.len(), 4);

    let values: Vec<_> = lines[1..]
        .iter()
        .map(|l| l.rsplit(',').next().unwrap().parse::<rust_decimal::Decimal>().unwrap())
        .collect();
    assert_eq!(values, vec![dec!(51.5), dec!(51.5), dec!(61.0)]);

    let timestamps: Vec<_> = lines[1..]
        .iter()
        .map(|l| DateTime::parse_from_rfc3339(l.split(',').next().unwrap()).unwrap())
        .collect();
    assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));

    let positions =
        std::fs::read_to_string(dir.path().join("position_snapshots_20250102.csv")).unwrap();
    assert_eq!(positions.lines().filter(|l| l.starts_with("timestamp,")).count(), 1);
    assert_eq!(positions.lines().count(), 1 + 2 + 2 + 1);
}

#[tokio::test]
async fn prepare_fails_when_directory_cannot_be_created() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("file");
    std::fs::write(&blocker, "not a directory").unwrap();

    let writer = SnapshotWriter::new(layout(&blocker.join("out")));
    assert!(writer.prepare(start()).await.is_err());
}
