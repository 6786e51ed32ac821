//! Lifecycle Controller
//!
//! Drives the pipeline through its states:
//!
//! ```text
//! Starting ──► WaitingForReadiness ──► Running ──► ShuttingDown ──► Stopped
//!     │                 │                              ▲
//!     └─────────────────┴──────────────────────────────┘
//! ```
//!
//! The controller owns the spawned ingestion and snapshot tasks. Shutdown is
//! requested through the shared [`CancellationToken`]; both tasks are then
//! given a grace period to finish and aborted if they overrun it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::ingestion::{IngestionEngine, IngestionOutcome, IngestionSettings};
use super::readiness::{DEFAULT_POLL_INTERVAL, Readiness, ReadinessGate};
use super::scheduler::{CycleRunner, CycleStats, DEFAULT_CADENCE};
use crate::application::ports::{QuoteSource, QuoteSourceError, SnapshotSink};
use crate::domain::portfolio::Portfolio;
use crate::domain::quotes::{InstrumentId, QuoteTable};

/// Default time allowed for tasks to stop after shutdown is requested.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

// =============================================================================
// State
// =============================================================================

/// Pipeline lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Subscribing to the quote stream.
    Starting,
    /// Waiting for every instrument to have a two-sided quote.
    WaitingForReadiness,
    /// Periodic snapshots are being taken.
    Running,
    /// Cancelling and draining tasks.
    ShuttingDown,
    /// Terminal.
    Stopped,
}

impl LifecycleState {
    /// State name for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::WaitingForReadiness => "waiting_for_readiness",
            Self::Running => "running",
            Self::ShuttingDown => "shutting_down",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Settings, Report and Errors
// =============================================================================

/// Timing and ingestion settings.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleSettings {
    /// Time between cycle starts.
    pub cadence: Duration,
    /// Interval between readiness checks.
    pub readiness_poll: Duration,
    /// Time allowed for tasks to stop after shutdown.
    pub shutdown_grace: Duration,
    /// Ingestion behaviour.
    pub ingestion: IngestionSettings,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            cadence: DEFAULT_CADENCE,
            readiness_poll: DEFAULT_POLL_INTERVAL,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            ingestion: IngestionSettings::default(),
        }
    }
}

/// What happened during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LifecycleReport {
    /// How ingestion ended, if it ended within the grace period.
    pub ingestion: Option<IngestionOutcome>,
    /// Snapshot loop totals, if the loop ran and ended within the grace period.
    pub cycles: Option<CycleStats>,
    /// Whether the pipeline reached `Running`.
    pub reached_running: bool,
    /// Tasks aborted after the grace period.
    pub aborted: Vec<&'static str>,
}

/// Lifecycle failure.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// The initial subscription failed.
    #[error("initial subscription failed: {0}")]
    Subscription(#[source] QuoteSourceError),

    /// The quote stream stopped before every instrument was quoted.
    #[error("quote stream stopped before readiness: {0:?}")]
    IngestionEndedBeforeReady(IngestionOutcome),

    /// The snapshot loop ended without a shutdown request.
    #[error("snapshot loop terminated unexpectedly")]
    SnapshotLoopTerminated,
}

// =============================================================================
// Controller
// =============================================================================

/// Owns the pipeline tasks and the state machine.
pub struct LifecycleController<S> {
    portfolio: Arc<Portfolio>,
    instruments: Vec<InstrumentId>,
    source: S,
    sink: Arc<dyn SnapshotSink>,
    settings: LifecycleSettings,
    cancel: CancellationToken,
    state: watch::Sender<LifecycleState>,
}

impl<S: QuoteSource + 'static> LifecycleController<S> {
    /// Create a controller.
    ///
    /// `instruments` is the subscription list; it usually equals
    /// `portfolio.instruments()` unless overridden by configuration.
    #[must_use]
    pub fn new(
        portfolio: Arc<Portfolio>,
        instruments: Vec<InstrumentId>,
        source: S,
        sink: Arc<dyn SnapshotSink>,
        settings: LifecycleSettings,
        cancel: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(LifecycleState::Starting);
        Self {
            portfolio,
            instruments,
            source,
            sink,
            settings,
            cancel,
            state,
        }
    }

    /// Observe state transitions.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Run the pipeline until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial subscription fails or the stream
    /// stops before readiness. Shutdown by signal is not an error.
    pub async fn run(self) -> Result<LifecycleReport, LifecycleError> {
        let Self {
            portfolio,
            instruments,
            source,
            sink,
            settings,
            cancel,
            state,
        } = self;
        let transition = |next: LifecycleState| {
            let previous = state.send_replace(next);
            tracing::info!(from = %previous, to = %next, "Lifecycle transition");
        };

        tracing::info!(
            positions = portfolio.len(),
            instruments = instruments.len(),
            "Pipeline starting"
        );
        let (table, writer) = QuoteTable::with_writer();
        let mut engine = IngestionEngine::new(
            source,
            writer,
            instruments.clone(),
            settings.ingestion.clone(),
            cancel.clone(),
        );

        let subscribed = tokio::select! {
            () = cancel.cancelled() => None,
            result = engine.subscribe() => Some(result),
        };
        match subscribed {
            None => {
                transition(LifecycleState::ShuttingDown);
                transition(LifecycleState::Stopped);
                return Ok(LifecycleReport::default());
            }
            Some(Err(e)) => {
                tracing::error!(error = %e, "Initial subscription failed");
                transition(LifecycleState::ShuttingDown);
                transition(LifecycleState::Stopped);
                return Err(LifecycleError::Subscription(e));
            }
            Some(Ok(())) => {}
        }

        let mut handle = tokio::spawn(engine.run());
        let mut report = LifecycleReport::default();
        let mut failure = None;
        let mut ingestion_finished = false;

        transition(LifecycleState::WaitingForReadiness);
        let gate = ReadinessGate::new(table.clone(), instruments, settings.readiness_poll);
        let ready = tokio::select! {
            readiness = gate.wait(&cancel) => readiness == Readiness::Ready,
            joined = &mut handle => {
                ingestion_finished = true;
                let outcome = joined_or_log("ingestion", joined);
                if let Some(outcome) = outcome.clone().filter(|o| !o.is_cancelled()) {
                    tracing::error!(outcome = ?outcome, "Quote stream stopped before readiness");
                    failure = Some(LifecycleError::IngestionEndedBeforeReady(outcome));
                }
                report.ingestion = outcome;
                false
            }
        };
        let mut ingestion = (!ingestion_finished).then_some(handle);

        let mut runner = None;
        if ready && !cancel.is_cancelled() {
            transition(LifecycleState::Running);
            report.reached_running = true;
            runner = Some(tokio::spawn(
                CycleRunner::new(
                    portfolio,
                    table,
                    sink,
                    settings.cadence,
                    cancel.clone(),
                )
                .run(),
            ));

            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    joined = join_running(&mut runner) => {
                        runner = None;
                        report.cycles = joined_or_log("snapshot loop", joined);
                        if !cancel.is_cancelled() {
                            tracing::error!("Snapshot loop stopped without a shutdown request");
                            failure = Some(LifecycleError::SnapshotLoopTerminated);
                        }
                        break;
                    }
                    joined = join_running(&mut ingestion) => {
                        ingestion = None;
                        let outcome = joined_or_log("ingestion", joined);
                        if outcome.as_ref().is_some_and(|o| !o.is_cancelled()) {
                            tracing::warn!(
                                outcome = ?outcome,
                                "Quote stream stopped; snapshots will use the last known quotes"
                            );
                        }
                        report.ingestion = outcome;
                    }
                }
            }
        }

        transition(LifecycleState::ShuttingDown);
        cancel.cancel();
        let deadline = Instant::now() + settings.shutdown_grace;

        if let Some(handle) = ingestion {
            match drain("ingestion", handle, deadline).await {
                Drained::Finished(outcome) => report.ingestion = outcome,
                Drained::Aborted => report.aborted.push("ingestion"),
            }
        }
        if let Some(handle) = runner {
            match drain("snapshot loop", handle, deadline).await {
                Drained::Finished(stats) => report.cycles = stats,
                Drained::Aborted => report.aborted.push("snapshot loop"),
            }
        }

        transition(LifecycleState::Stopped);
        failure.map_or(Ok(report), Err)
    }
}

/// Await a task that may already have been joined; pends forever if so.
async fn join_running<T>(handle: &mut Option<JoinHandle<T>>) -> Result<T, JoinError> {
    match handle {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

enum Drained<T> {
    Finished(Option<T>),
    Aborted,
}

async fn drain<T>(name: &'static str, mut handle: JoinHandle<T>, deadline: Instant) -> Drained<T> {
    if let Ok(joined) = tokio::time::timeout_at(deadline, &mut handle).await {
        Drained::Finished(joined_or_log(name, joined))
    } else {
        tracing::warn!(task = name, "Task did not stop within the grace period, aborting");
        handle.abort();
        Drained::Aborted
    }
}

fn joined_or_log<T>(name: &'static str, joined: Result<T, JoinError>) -> Option<T> {
    match joined {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::error!(task = name, error = %e, "Task terminated abnormally");
            None
        }
    }
}
