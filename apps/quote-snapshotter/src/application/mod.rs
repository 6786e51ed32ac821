//! Application Layer - Pipeline services and port definitions.
//!
//! This layer wires the domain to the outside world through ports and
//! runs the ingest, readiness and snapshot tasks.

/// Port interfaces for the quote stream and snapshot logs.
pub mod ports;

/// Ingestion, readiness, scheduling and lifecycle services.
pub mod services;
