//! The transport capability the session dispatches batches through.
//!
//! A [`Transport`] turns one [`Batch`] into a stream of [`Reply`] items, one
//! per answered or failed request. The stream may yield in any order; the
//! session matches replies to callers by [`CorrelationToken`] only. Two
//! implementations ship with the crate: [`GrpcTransport`] over a tonic
//! channel, and [`InMemoryTransport`] for tests and local evaluation.

pub(crate) mod grpc;
mod memory;

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_core::Stream;
use tokio::sync::watch;

use crate::error::Error;
use crate::types::{BatchId, CheckRequest, CheckResult, CorrelationToken};

pub use grpc::GrpcTransport;
pub use memory::InMemoryTransport;

/// One request inside a [`Batch`].
#[derive(Debug, Clone)]
pub struct BatchItem {
    token: CorrelationToken,
    request: Arc<CheckRequest>,
}

impl BatchItem {
    pub(crate) fn new(token: CorrelationToken, request: Arc<CheckRequest>) -> Self {
        Self { token, request }
    }

    /// The token the reply for this request must carry.
    pub fn token(&self) -> CorrelationToken {
        self.token
    }

    /// The request.
    pub fn request(&self) -> &CheckRequest {
        &self.request
    }
}

/// An ordered group of requests dispatched together.
///
/// A re-sent batch keeps its id but carries only the requests that are
/// still waiting for an answer.
#[derive(Debug, Clone)]
pub struct Batch {
    id: BatchId,
    items: Vec<BatchItem>,
}

impl Batch {
    pub(crate) fn new(id: BatchId, items: Vec<BatchItem>) -> Self {
        Self { id, items }
    }

    /// The batch identifier.
    pub fn id(&self) -> BatchId {
        self.id
    }

    /// The requests, in submission order.
    pub fn items(&self) -> &[BatchItem] {
        &self.items
    }

    /// Number of requests.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if the batch carries no requests.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Tokens of every request, in submission order.
    pub fn tokens(&self) -> Vec<CorrelationToken> {
        self.items.iter().map(BatchItem::token).collect()
    }

    pub(crate) fn into_items(self) -> Vec<BatchItem> {
        self.items
    }
}

/// One element of a transport's answer to a batch.
#[derive(Debug, Clone)]
pub enum Reply {
    /// The PDP answered the request carrying `token`.
    Result {
        /// Which request this answers.
        token: CorrelationToken,
        /// The answer.
        result: CheckResult,
    },
    /// The requests carrying `tokens` could not be answered.
    ///
    /// Retryable errors cause those requests to be re-sent; anything else
    /// fails them.
    Failed {
        /// Which requests failed.
        tokens: Vec<CorrelationToken>,
        /// Why.
        error: Error,
    },
    /// The PDP sent a result that cannot be attributed to any request of the
    /// batch.
    Unmatched {
        /// What was received.
        detail: String,
    },
}

/// Reply stream returned by [`Transport::call`].
pub type ReplyStream = Pin<Box<dyn Stream<Item = Reply> + Send>>;

/// Connection state reported by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    /// The channel can carry calls.
    Connected,
    /// The channel lost its connection.
    Disconnected,
}

/// The outbound capability used by the session.
///
/// Implementations must be cheap to call concurrently: the session may have
/// several batches in flight at once.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends `batch` and streams back one reply per request.
    ///
    /// The session stops reading the stream once `deadline` has elapsed;
    /// implementations should also apply it to their own wire calls.
    /// A stream that ends without answering a request is a protocol
    /// violation for that request.
    fn call(&self, batch: Batch, deadline: Duration) -> ReplyStream;

    /// Establishes or re-establishes the connection.
    ///
    /// Called before the first dispatch and before any dispatch while the
    /// transport reports itself unhealthy.
    async fn connect(&self) -> Result<(), Error> {
        Ok(())
    }

    /// Returns `false` if the last call suggested the connection is broken.
    fn is_healthy(&self) -> bool {
        true
    }

    /// Connection-state notifications, if the transport produces them.
    fn connectivity(&self) -> Option<watch::Receiver<Connectivity>> {
        None
    }
}
