//! Transport session: connection lifecycle, deadlines and retries.
//!
//! The session is the only component that sends, re-sends or fails a batch
//! as a whole. Each dispatch attempt reads the transport's reply stream until
//! every request is accounted for or the deadline passes. Answers go straight
//! to the correlator, so a batch is never all-or-nothing from a caller's
//! point of view: requests answered before a failure keep their answers and
//! only the rest are retried.
//!
//! Retryable failures move the session to `Degraded` and the unanswered
//! requests are re-sent after an exponential backoff, up to the retry
//! budget. Fatal failures, or too many consecutive failures, close the
//! session for good. Attempts that were in flight together when the PDP
//! became unreachable add a single failure to that count.

mod backoff;
mod state;

use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_stream::StreamExt;
use tracing::Instrument;

use crate::config::{BackoffConfig, SessionConfig};
use crate::correlator::{Correlator, Resolution};
use crate::error::{Error, ErrorKind};
use crate::stats::Stats;
use crate::transport::{Batch, BatchItem, Connectivity, Reply, Transport};
use crate::types::{BatchId, CorrelationToken};

pub use state::SessionState;
use state::{FailureOutcome, StateMachine};

/// How one dispatch attempt ended.
enum Attempt {
    /// Every request was answered or failed for good.
    Settled,
    /// These requests failed transiently and may be re-sent.
    Retry { items: Vec<BatchItem>, error: Error },
    /// The session cannot continue.
    Fatal(Error),
}

pub(crate) struct Session {
    transport: Arc<dyn Transport>,
    correlator: Arc<Correlator>,
    state: StateMachine,
    stats: Arc<Stats>,
    request_timeout: Duration,
    retry_budget: u32,
    backoff: BackoffConfig,
    max_consecutive_failures: u32,
}

impl Session {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        correlator: Arc<Correlator>,
        stats: Arc<Stats>,
        config: &SessionConfig,
        handle: &Handle,
    ) -> Arc<Self> {
        let session = Arc::new(Self {
            transport,
            correlator,
            state: StateMachine::new(),
            stats,
            request_timeout: config.request_timeout,
            retry_budget: config.retry_budget,
            backoff: config.backoff.clone(),
            max_consecutive_failures: config.max_consecutive_failures,
        });
        if let Some(rx) = session.transport.connectivity() {
            handle.spawn(watch_connectivity(Arc::downgrade(&session), rx));
        }
        session
    }

    pub(crate) fn state(&self) -> SessionState {
        self.state.current()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub(crate) fn closed_reason(&self) -> Option<String> {
        self.state.closed_reason()
    }

    /// Closes the session and fails every outstanding call.
    pub(crate) fn close(&self, reason: &str) {
        let error = Error::SessionClosed {
            reason: reason.to_string(),
        };
        self.close_with(reason.to_string(), &error);
    }

    fn close_with(&self, reason: String, error: &Error) {
        if self.state.close(reason) {
            let failed = self.correlator.fail_all(error);
            tracing::debug!(failed, "failed outstanding checks");
        }
    }

    /// Sends `batch`, retrying transient failures, until every request in it
    /// is resolved.
    pub(crate) async fn dispatch(self: Arc<Self>, batch: Batch) {
        let span = tracing::debug_span!("dispatch", batch_id = %batch.id(), size = batch.len());
        self.run(batch).instrument(span).await
    }

    async fn run(&self, batch: Batch) {
        let id = batch.id();
        let mut items = batch.into_items();
        let mut attempt: u32 = 0;
        loop {
            items.retain(|item| self.correlator.is_live(item.token()));
            if items.is_empty() {
                return;
            }
            if let Some(reason) = self.state.closed_reason() {
                self.correlator.fail_batch(id, &Error::SessionClosed { reason });
                return;
            }

            attempt += 1;
            let started = tokio::time::Instant::now();
            let outcome = match self.ensure_connected().await {
                Ok(()) => self.attempt(id, &items, attempt).await,
                Err(error) if error.is_fatal() => Attempt::Fatal(error),
                Err(error) => Attempt::Retry {
                    items: items.clone(),
                    error,
                },
            };

            let (rest, error) = match outcome {
                Attempt::Settled => {
                    self.state.on_success();
                    return;
                }
                Attempt::Fatal(error) => {
                    self.close_with(error.to_string(), &error);
                    return;
                }
                Attempt::Retry { items, error } => (items, error),
            };

            match self.state.on_failure(started, self.max_consecutive_failures, &error) {
                FailureOutcome::Degraded => {}
                FailureOutcome::Closed(reason) => {
                    self.correlator.fail_all(&Error::SessionClosed { reason });
                    return;
                }
                FailureOutcome::AlreadyClosed => {
                    let reason = self.state.closed_reason().unwrap_or_default();
                    self.correlator.fail_batch(id, &Error::SessionClosed { reason });
                    return;
                }
            }

            if attempt > self.retry_budget {
                let unavailable = Error::Unavailable {
                    attempts: attempt,
                    last: Box::new(error),
                };
                let failed = self.correlator.fail_batch(id, &unavailable);
                tracing::warn!(attempts = attempt, failed, "retry budget exhausted");
                return;
            }

            let wait = backoff::delay(&self.backoff, attempt - 1);
            self.stats.record_retry();
            tracing::warn!(
                attempt,
                remaining = rest.len(),
                failures = self.state.consecutive_failures(),
                delay = ?wait,
                error = %error,
                "dispatch failed, retrying"
            );
            tokio::time::sleep(wait).await;
            items = rest;
        }
    }

    async fn ensure_connected(&self) -> Result<(), Error> {
        let from = self.state.begin_connect();
        if from.is_none() && self.transport.is_healthy() {
            return Ok(());
        }
        self.transport.connect().await?;
        self.state.on_connected();
        Ok(())
    }

    async fn attempt(&self, id: BatchId, items: &[BatchItem], attempt: u32) -> Attempt {
        let deadline = tokio::time::Instant::now() + self.request_timeout;
        let mut unanswered: HashSet<CorrelationToken> = items.iter().map(BatchItem::token).collect();
        let mut retry: HashSet<CorrelationToken> = HashSet::new();
        let mut last_error = None;

        self.stats.record_dispatch(items.len());
        tracing::debug!(attempt, "sending batch");
        let mut replies = self
            .transport
            .call(Batch::new(id, items.to_vec()), self.request_timeout);

        loop {
            let reply = match tokio::time::timeout_at(deadline, replies.next()).await {
                Ok(Some(reply)) => reply,
                Ok(None) => break,
                Err(_) => {
                    tracing::debug!(unanswered = unanswered.len(), "deadline exceeded");
                    retry.extend(unanswered.drain());
                    last_error = Some(Error::DeadlineExceeded(self.request_timeout));
                    break;
                }
            };
            match reply {
                Reply::Result { token, result } => {
                    if !unanswered.remove(&token) {
                        self.protocol_violation(format!(
                            "result for {token}, which is not outstanding in this batch"
                        ));
                        continue;
                    }
                    if self.correlator.resolve(token, result) == Resolution::Discarded {
                        tracing::debug!(%token, "discarded result for a call that stopped waiting");
                    }
                }
                Reply::Failed { tokens, error } => {
                    if error.is_fatal() {
                        return Attempt::Fatal(error);
                    }
                    for token in tokens {
                        if !unanswered.remove(&token) {
                            self.protocol_violation(format!(
                                "failure for {token}, which is not outstanding in this batch"
                            ));
                            continue;
                        }
                        if error.is_retryable() {
                            retry.insert(token);
                            continue;
                        }
                        if error.kind() == ErrorKind::Protocol {
                            self.protocol_violation(format!("{token}: {error}"));
                        }
                        self.correlator.fail(token, error.clone());
                    }
                    if error.is_retryable() {
                        last_error = Some(error);
                    }
                }
                Reply::Unmatched { detail } => self.protocol_violation(detail),
            }
        }

        for token in unanswered {
            self.protocol_violation(format!("response stream ended without a result for {token}"));
            self.correlator.fail(
                token,
                Error::ProtocolViolation(format!("no result received for {token}")),
            );
        }

        match last_error {
            Some(error) if !retry.is_empty() => Attempt::Retry {
                items: items
                    .iter()
                    .filter(|item| retry.contains(&item.token()))
                    .cloned()
                    .collect(),
                error,
            },
            _ => Attempt::Settled,
        }
    }

    fn protocol_violation(&self, detail: String) {
        self.stats.record_protocol_violation();
        tracing::warn!(%detail, "protocol violation");
    }
}

async fn watch_connectivity(session: Weak<Session>, mut rx: watch::Receiver<Connectivity>) {
    while rx.changed().await.is_ok() {
        let status = *rx.borrow_and_update();
        let Some(session) = session.upgrade() else {
            return;
        };
        match status {
            Connectivity::Connected => session.state.on_link_up(),
            Connectivity::Disconnected => session.state.on_link_down(),
        }
        if session.state() == SessionState::Closed {
            return;
        }
    }
}
