//! Session state machine.
//!
//! ```text
//! Idle ──► Connecting ──► Ready ◄──► Degraded
//!                │          │           │
//!                └──────────┴───────────┴──► Closed (terminal)
//! ```
//!
//! Transitions are the only mutation points. Every change is published on a
//! `watch` channel so callers can observe it.
//!
//! Consecutive failures are counted per outage, not per attempt: a failed
//! attempt only counts if it started at or after the most recent recorded
//! failure. Batches that were already in flight when the link broke share
//! that one failure instead of each adding their own.

use std::fmt;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;

/// Lifecycle state of the connection to the PDP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum SessionState {
    /// Nothing dispatched yet.
    Idle,
    /// Establishing the first connection.
    Connecting,
    /// Dispatching normally.
    Ready,
    /// The last dispatch failed transiently; retrying with backoff.
    Degraded,
    /// Permanently closed. Every check fails fast.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Ready => "ready",
            SessionState::Degraded => "degraded",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Outcome of recording a failed dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FailureOutcome {
    /// The session is degraded and may retry.
    Degraded,
    /// The failure limit was reached and the session closed with this reason.
    Closed(String),
    /// The session was already closed.
    AlreadyClosed,
}

#[derive(Debug)]
struct Inner {
    state: SessionState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    closed_reason: Option<String>,
}

#[derive(Debug)]
pub(crate) struct StateMachine {
    inner: Mutex<Inner>,
    tx: watch::Sender<SessionState>,
}

impl StateMachine {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(SessionState::Idle);
        Self {
            inner: Mutex::new(Inner {
                state: SessionState::Idle,
                consecutive_failures: 0,
                last_failure: None,
                closed_reason: None,
            }),
            tx,
        }
    }

    pub(crate) fn current(&self) -> SessionState {
        self.inner.lock().state
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    pub(crate) fn closed_reason(&self) -> Option<String> {
        self.inner.lock().closed_reason.clone()
    }

    pub(crate) fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// `Idle` becomes `Connecting`. Returns the state to connect from, or
    /// `None` when no connection attempt is needed.
    pub(crate) fn begin_connect(&self) -> Option<SessionState> {
        let mut inner = self.inner.lock();
        match inner.state {
            SessionState::Idle => {
                self.set(&mut inner, SessionState::Connecting);
                Some(SessionState::Connecting)
            }
            SessionState::Connecting | SessionState::Degraded => Some(inner.state),
            SessionState::Ready | SessionState::Closed => None,
        }
    }

    /// The first connection attempt succeeded.
    pub(crate) fn on_connected(&self) {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Connecting {
            self.set(&mut inner, SessionState::Ready);
        }
    }

    /// The transport reports its link is up again.
    pub(crate) fn on_link_up(&self) {
        let mut inner = self.inner.lock();
        if matches!(inner.state, SessionState::Connecting | SessionState::Degraded) {
            self.set(&mut inner, SessionState::Ready);
        }
    }

    /// The transport reports its link is down.
    pub(crate) fn on_link_down(&self) {
        let mut inner = self.inner.lock();
        if matches!(inner.state, SessionState::Ready | SessionState::Connecting) {
            self.set(&mut inner, SessionState::Degraded);
        }
    }

    /// A dispatch reached the PDP and got an answer.
    pub(crate) fn on_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Closed {
            return;
        }
        inner.consecutive_failures = 0;
        inner.last_failure = None;
        self.set(&mut inner, SessionState::Ready);
    }

    /// A dispatch attempt that began at `started` failed transiently. Closes
    /// the session once `limit` consecutive failures have been seen.
    pub(crate) fn on_failure(
        &self,
        started: Instant,
        limit: u32,
        error: &impl fmt::Display,
    ) -> FailureOutcome {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Closed {
            return FailureOutcome::AlreadyClosed;
        }
        let counts = inner.last_failure.map_or(true, |last| started >= last);
        inner.last_failure = Some(Instant::now());
        if !counts {
            tracing::debug!(
                failures = inner.consecutive_failures,
                "failure of an attempt already in flight during this outage"
            );
            self.set(&mut inner, SessionState::Degraded);
            return FailureOutcome::Degraded;
        }
        inner.consecutive_failures += 1;
        if inner.consecutive_failures >= limit {
            let reason = format!(
                "{} consecutive dispatch failures, last: {error}",
                inner.consecutive_failures
            );
            self.close_locked(&mut inner, reason.clone());
            return FailureOutcome::Closed(reason);
        }
        self.set(&mut inner, SessionState::Degraded);
        FailureOutcome::Degraded
    }

    /// Moves to `Closed`. Returns `false` if the session was already closed.
    pub(crate) fn close(&self, reason: impl Into<String>) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Closed {
            return false;
        }
        self.close_locked(&mut inner, reason.into());
        true
    }

    fn close_locked(&self, inner: &mut Inner, reason: String) {
        tracing::error!(reason = %reason, "session closed");
        inner.closed_reason = Some(reason);
        self.set(inner, SessionState::Closed);
    }

    fn set(&self, inner: &mut Inner, next: SessionState) {
        if inner.state == next {
            return;
        }
        match next {
            SessionState::Degraded => {
                tracing::warn!(from = %inner.state, failures = inner.consecutive_failures, "session degraded")
            }
            SessionState::Closed => {}
            _ => tracing::debug!(from = %inner.state, to = %next, "session state changed"),
        }
        inner.state = next;
        self.tx.send_replace(next);
    }
}
