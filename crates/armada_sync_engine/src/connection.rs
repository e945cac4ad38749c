//! Connection lifecycle state machine with reconnect backoff.

use crate::config::RetryConfig;
use std::time::{Duration, Instant};

/// Lifecycle state of the hub connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and none in progress.
    Disconnected,
    /// Transport connection attempt in progress.
    Connecting,
    /// Transport is up; waiting for the auth handshake to complete.
    Authenticating,
    /// Authenticated and live.
    Connected,
    /// Lost the connection; waiting out the backoff before retrying.
    Reconnecting,
    /// Reconnect budget exhausted. Terminal until an explicit reset.
    Failed,
}

impl ConnectionState {
    /// Returns true when fully connected and authenticated.
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Returns true while a connection is being established or recovered.
    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::Authenticating
                | ConnectionState::Reconnecting
        )
    }
}

/// What the engine should do next about its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectAction {
    /// Connection is healthy or being established; nothing to do.
    Idle,
    /// Backoff in progress; check again after this long.
    Wait(Duration),
    /// The backoff elapsed; attempt to connect now.
    Attempt,
    /// Budget exhausted; surface the persistent error.
    GiveUp,
}

/// Tracks connection state and schedules reconnect attempts.
///
/// Modeled as an explicit state machine polled with a deadline instead of
/// nested callbacks: teardown is a single [`ConnectionMonitor::reset`] and
/// every transition is observable in tests.
pub struct ConnectionMonitor {
    state: ConnectionState,
    retry: RetryConfig,
    attempts: u32,
    next_attempt_at: Option<Instant>,
    last_error: Option<String>,
}

impl ConnectionMonitor {
    /// Creates a monitor in the `Disconnected` state.
    pub fn new(retry: RetryConfig) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            retry,
            attempts: 0,
            next_attempt_at: None,
            last_error: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Most recent connection error, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Reconnect attempts made since the last successful authentication.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Marks the start of a transport connection attempt.
    pub fn begin_connect(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    /// The transport is up; the auth handshake is next.
    pub fn on_transport_connected(&mut self) {
        self.state = ConnectionState::Authenticating;
    }

    /// The auth handshake completed; the connection is live.
    pub fn on_authenticated(&mut self) {
        self.state = ConnectionState::Connected;
        self.attempts = 0;
        self.next_attempt_at = None;
        self.last_error = None;
    }

    /// Records a lost or failed connection and schedules the next attempt.
    pub fn on_disconnect(&mut self, reason: impl Into<String>, now: Instant) {
        let reason = reason.into();
        self.last_error = Some(reason.clone());
        self.attempts += 1;

        if self.attempts >= self.retry.max_attempts {
            tracing::warn!(
                attempts = self.attempts,
                reason = %reason,
                "reconnect budget exhausted"
            );
            self.state = ConnectionState::Failed;
            self.next_attempt_at = None;
            return;
        }

        let delay = self.retry.delay_for_attempt(self.attempts);
        tracing::debug!(
            attempts = self.attempts,
            delay_ms = delay.as_millis() as u64,
            reason = %reason,
            "scheduling reconnect"
        );
        self.state = ConnectionState::Reconnecting;
        self.next_attempt_at = Some(now + delay);
    }

    /// Polls the state machine. In `Reconnecting`, transitions to
    /// `Connecting` and returns [`ReconnectAction::Attempt`] once the
    /// backoff deadline passes.
    pub fn poll(&mut self, now: Instant) -> ReconnectAction {
        match self.state {
            ConnectionState::Failed => ReconnectAction::GiveUp,
            ConnectionState::Disconnected => {
                self.state = ConnectionState::Connecting;
                ReconnectAction::Attempt
            }
            ConnectionState::Reconnecting => match self.next_attempt_at {
                Some(deadline) if now < deadline => ReconnectAction::Wait(deadline - now),
                _ => {
                    self.state = ConnectionState::Connecting;
                    ReconnectAction::Attempt
                }
            },
            _ => ReconnectAction::Idle,
        }
    }

    /// Explicit teardown: cancels any scheduled attempt and returns to
    /// `Disconnected` with a clean slate.
    pub fn reset(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.attempts = 0;
        self.next_attempt_at = None;
        self.last_error = None;
    }
}
