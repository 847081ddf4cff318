//! Correlation tokens and batch identifiers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque identifier linking one submitted check to its eventual result.
///
/// Tokens are unique for the lifetime of a client session. They support
/// equality and hashing only; no ordering is implied or exposed.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationToken(u64);

impl CorrelationToken {
    /// Builds a token from its raw value. Intended for [`Transport`]
    /// implementations and tests that need to fabricate replies.
    ///
    /// [`Transport`]: crate::transport::Transport
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CorrelationToken({})", self.0)
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Identifier of one dispatched batch, distinct from the tokens it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchId(u64);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch-{}", self.0)
    }
}

/// Hands out tokens and batch ids that never repeat within one session.
#[derive(Debug, Default)]
pub(crate) struct IdGenerator {
    tokens: AtomicU64,
    batches: AtomicU64,
}

impl IdGenerator {
    pub(crate) fn next_token(&self) -> CorrelationToken {
        CorrelationToken(self.tokens.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub(crate) fn next_batch(&self) -> BatchId {
        BatchId(self.batches.fetch_add(1, Ordering::Relaxed) + 1)
    }
}
