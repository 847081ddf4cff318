//! Scripted transports and fixtures shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::time::Duration;

use arbiter::transport::{Batch, Reply, ReplyStream, Transport};
use arbiter::{BackoffConfig, CheckRequest, CheckResult, Decision, Principal, Resource, SessionConfig};
use parking_lot::Mutex;

type Script = Box<dyn FnOnce(Batch) -> ReplyStream + Send>;

/// Answers each call with the next script; once the scripts run out, every
/// further call either hangs forever or answers with `fallback`.
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Script>>,
    fallback: Option<Box<dyn Fn(&CheckRequest) -> CheckResult + Send + Sync>>,
    seen: Mutex<Vec<Batch>>,
}

impl ScriptedTransport {
    /// Hangs on every call not covered by a script.
    pub fn hanging() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            fallback: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Answers every call not covered by a script with `policy`.
    pub fn answering(policy: impl Fn(&CheckRequest) -> CheckResult + Send + Sync + 'static) -> Self {
        Self {
            fallback: Some(Box::new(policy)),
            ..Self::hanging()
        }
    }

    /// Queues a script for the next unscripted call.
    pub fn then(self, script: impl FnOnce(Batch) -> ReplyStream + Send + 'static) -> Self {
        self.scripts.lock().push_back(Box::new(script));
        self
    }

    /// Queues a call answered by the fixed reply list `replies(batch)`.
    pub fn then_reply(self, replies: impl FnOnce(&Batch) -> Vec<Reply> + Send + 'static) -> Self {
        self.then(move |batch| -> ReplyStream { Box::pin(tokio_stream::iter(replies(&batch))) })
    }

    /// Every batch received, in call order.
    pub fn batches(&self) -> Vec<Batch> {
        self.seen.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.seen.lock().len()
    }
}

#[async_trait::async_trait]
impl Transport for ScriptedTransport {
    fn call(&self, batch: Batch, _deadline: Duration) -> ReplyStream {
        self.seen.lock().push(batch.clone());
        if let Some(script) = self.scripts.lock().pop_front() {
            return script(batch);
        }
        match &self.fallback {
            Some(policy) => {
                let replies: Vec<_> = batch
                    .items()
                    .iter()
                    .map(|item| Reply::Result {
                        token: item.token(),
                        result: policy(item.request()),
                    })
                    .collect();
                Box::pin(tokio_stream::iter(replies))
            }
            None => Box::pin(tokio_stream::pending()),
        }
    }
}

/// `read` and `delete` are allowed, everything else denied.
pub fn document_policy(request: &CheckRequest) -> CheckResult {
    CheckResult::from_decisions(request.actions().iter().map(|action| {
        let decision = match action.as_str() {
            "read" | "delete" => Decision::Allow,
            _ => Decision::Deny,
        };
        (action.clone(), decision)
    }))
}

/// Answers every request of `batch` with `document_policy`, last item first.
pub fn reversed(batch: &Batch) -> Vec<Reply> {
    batch
        .items()
        .iter()
        .rev()
        .map(|item| Reply::Result {
            token: item.token(),
            result: document_policy(item.request()),
        })
        .collect()
}

pub fn alice() -> Principal {
    Principal::builder("alice")
        .role("employee")
        .attr("department", "marketing")
        .build()
        .unwrap()
}

pub fn doc(id: &str) -> Resource {
    Resource::builder("document", id)
        .attr("owner", "alice")
        .build()
        .unwrap()
}

pub fn request(resource: &str, actions: &[&str]) -> CheckRequest {
    CheckRequest::new(alice(), doc(resource), actions.iter().copied()).unwrap()
}

/// Short deadlines and jitter-free backoff so paused-clock tests are exact.
pub fn fast_config() -> SessionConfig {
    SessionConfig::default()
        .with_flush_interval(Duration::from_millis(10))
        .with_request_timeout(Duration::from_millis(100))
        .with_backoff(BackoffConfig {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(80),
            multiplier: 2.0,
            jitter: 0.0,
        })
}
