//! Application Ports
//!
//! Interfaces the pipeline uses to reach the outside world.
//! - **Driven Ports** (Secondary/Outbound): the streaming quote source and
//!   the snapshot log sink

mod quote_source_port;
mod snapshot_sink_port;

pub use quote_source_port::{QuoteEvent, QuoteSource, QuoteSourceError};
#[cfg(test)]
pub use quote_source_port::MockQuoteSource;
pub use snapshot_sink_port::{AppendSummary, SnapshotError, SnapshotSink};
