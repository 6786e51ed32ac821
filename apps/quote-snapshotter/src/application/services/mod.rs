//! Application Services
//!
//! Services that drive the pipeline through the ports.
//!
//! - `IngestionEngine`: sole writer of the quote table
//! - `ReadinessGate`: waits for two-sided quotes on every instrument
//! - `CycleRunner`: aggregate, persist and sleep on a fixed cadence
//! - `LifecycleController`: owns the tasks and the state machine

mod backoff;
mod ingestion;
mod lifecycle;
mod readiness;
mod scheduler;

pub use backoff::{Backoff, BackoffConfig};
pub use ingestion::{IngestionEngine, IngestionOutcome, IngestionSettings};
pub use lifecycle::{
    DEFAULT_SHUTDOWN_GRACE, LifecycleController, LifecycleError, LifecycleReport,
    LifecycleSettings, LifecycleState,
};
pub use readiness::{DEFAULT_POLL_INTERVAL, Readiness, ReadinessGate};
pub use scheduler::{CycleRunner, CycleStats, DEFAULT_CADENCE};
