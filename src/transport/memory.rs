//! In-process transport that evaluates checks with a closure.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::Error;
use crate::types::{CheckRequest, CheckResult, Decision};

use super::{Batch, Reply, ReplyStream, Transport};

type Evaluator = dyn Fn(&CheckRequest) -> Result<CheckResult, Error> + Send + Sync;

/// A [`Transport`] that answers every request by calling an evaluator
/// closure, without touching the network.
///
/// Every batch it receives is recorded, which makes it useful for asserting
/// how checks were batched.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use arbiter::transport::InMemoryTransport;
/// use arbiter::{CheckResult, Decision};
///
/// let transport = Arc::new(InMemoryTransport::new(|request| {
///     let owner = request.resource().attributes().get("owner");
///     let is_owner = owner.and_then(|o| o.as_str()) == Some(request.principal().id());
///     Ok(CheckResult::from_decisions(request.actions().iter().map(|action| {
///         let decision = if is_owner || action.as_str() == "read" {
///             Decision::Allow
///         } else {
///             Decision::Deny
///         };
///         (action.clone(), decision)
///     })))
/// }));
/// assert_eq!(transport.batch_count(), 0);
/// ```
pub struct InMemoryTransport {
    evaluate: Arc<Evaluator>,
    latency: Option<Duration>,
    batches: Mutex<Vec<Batch>>,
}

impl std::fmt::Debug for InMemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTransport")
            .field("latency", &self.latency)
            .field("batches", &self.batches.lock().len())
            .finish()
    }
}

impl InMemoryTransport {
    /// Creates a transport answering with `evaluate`.
    ///
    /// An `Err` from the evaluator fails that request only.
    pub fn new<F>(evaluate: F) -> Self
    where
        F: Fn(&CheckRequest) -> Result<CheckResult, Error> + Send + Sync + 'static,
    {
        Self {
            evaluate: Arc::new(evaluate),
            latency: None,
            batches: Mutex::new(Vec::new()),
        }
    }

    /// Creates a transport that answers every action with `decision`.
    pub fn constant(decision: Decision) -> Self {
        Self::new(move |request| {
            Ok(CheckResult::from_decisions(
                request.actions().iter().map(|a| (a.clone(), decision)),
            ))
        })
    }

    /// Delays every answer by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Every batch received so far, in arrival order.
    pub fn batches(&self) -> Vec<Batch> {
        self.batches.lock().clone()
    }

    /// Number of batches received so far.
    pub fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }
}

#[async_trait::async_trait]
impl Transport for InMemoryTransport {
    fn call(&self, batch: Batch, _deadline: Duration) -> ReplyStream {
        self.batches.lock().push(batch.clone());
        let evaluate = Arc::clone(&self.evaluate);
        let latency = self.latency;
        Box::pin(async_stream::stream! {
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            for item in batch.items() {
                match evaluate(item.request()) {
                    Ok(result) => yield Reply::Result { token: item.token(), result },
                    Err(error) => yield Reply::Failed { tokens: vec![item.token()], error },
                }
            }
        })
    }
}
