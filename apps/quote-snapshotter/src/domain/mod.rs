//! Domain Layer - Quotes, positions, and valuation rules.
//!
//! This layer contains the core types of the snapshot pipeline with no
//! I/O. Everything here is deterministic given its inputs.

/// Latest-quote state keyed by instrument.
pub mod quotes;

/// Position set loaded once at startup.
pub mod portfolio;

/// Mid-price marks and per-group net valuations.
pub mod valuation;
