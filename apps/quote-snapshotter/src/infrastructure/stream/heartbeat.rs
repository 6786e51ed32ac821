//! Connection Heartbeat
//!
//! Pings the server on a fixed interval and declares the connection dead
//! when a ping goes unanswered for longer than the pong timeout. Any frame
//! from the server counts as proof of life.

use std::time::Duration;

use tokio::time::Instant;

use crate::infrastructure::config::HeartbeatSettings;

/// Heartbeat timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between pings.
    pub ping_interval: Duration,
    /// How long an unanswered ping may stay outstanding.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(20),
            pong_timeout: Duration::from_secs(20),
        }
    }
}

impl HeartbeatConfig {
    /// Create a configuration.
    #[must_use]
    pub const fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
        }
    }

    /// Configuration from the `streaming.heartbeat` settings.
    #[must_use]
    pub const fn from_settings(settings: &HeartbeatSettings) -> Self {
        Self::new(
            Duration::from_secs(settings.ping_interval_secs),
            Duration::from_secs(settings.pong_timeout_secs),
        )
    }
}

/// What to do on a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send a ping.
    SendPing,
    /// A ping is outstanding but still within the timeout.
    Wait,
    /// The connection is considered dead.
    Timeout,
}

/// Per-connection heartbeat state.
#[derive(Debug)]
pub struct Heartbeat {
    config: HeartbeatConfig,
    last_seen: Instant,
    ping_sent_at: Option<Instant>,
}

impl Heartbeat {
    /// Fresh state for a new connection.
    #[must_use]
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            last_seen: Instant::now(),
            ping_sent_at: None,
        }
    }

    /// Configured ping interval.
    #[must_use]
    pub const fn ping_interval(&self) -> Duration {
        self.config.ping_interval
    }

    /// Record any server activity, including a pong.
    pub fn record_activity(&mut self) {
        self.last_seen = Instant::now();
        self.ping_sent_at = None;
    }

    /// Decide what to do on a tick, marking a ping as sent if one is due.
    pub fn on_tick(&mut self) -> HeartbeatAction {
        match self.ping_sent_at {
            Some(sent) if sent.elapsed() > self.config.pong_timeout => {
                tracing::warn!(
                    silent_secs = self.last_seen.elapsed().as_secs(),
                    timeout_secs = self.config.pong_timeout.as_secs(),
                    "Heartbeat timeout detected"
                );
                HeartbeatAction::Timeout
            }
            Some(_) => HeartbeatAction::Wait,
            None => {
                self.ping_sent_at = Some(Instant::now());
                HeartbeatAction::SendPing
            }
        }
    }
}
