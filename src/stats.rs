//! Session counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters shared by the batcher, correlator and session.
#[derive(Debug, Default)]
pub(crate) struct Stats {
    batches_dispatched: AtomicU64,
    requests_dispatched: AtomicU64,
    cache_hits: AtomicU64,
    retries: AtomicU64,
    protocol_violations: AtomicU64,
}

impl Stats {
    pub(crate) fn record_dispatch(&self, requests: usize) {
        self.batches_dispatched.fetch_add(1, Ordering::Relaxed);
        self.requests_dispatched
            .fetch_add(requests as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_protocol_violation(&self) {
        self.protocol_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            batches_dispatched: self.batches_dispatched.load(Ordering::Relaxed),
            requests_dispatched: self.requests_dispatched.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            protocol_violations: self.protocol_violations.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of the client's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StatsSnapshot {
    /// Batches handed to the transport, counting each re-send.
    pub batches_dispatched: u64,
    /// Requests carried by those batches.
    pub requests_dispatched: u64,
    /// Checks answered entirely from the decision cache.
    pub cache_hits: u64,
    /// Re-sends after a transient failure.
    pub retries: u64,
    /// Results that matched no outstanding request, or requests a response
    /// never answered.
    pub protocol_violations: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let stats = Stats::default();
        stats.record_dispatch(5);
        stats.record_dispatch(2);
        stats.record_cache_hit();
        stats.record_retry();
        stats.record_protocol_violation();
        assert_eq!(
            stats.snapshot(),
            StatsSnapshot {
                batches_dispatched: 2,
                requests_dispatched: 7,
                cache_hits: 1,
                retries: 1,
                protocol_violations: 1,
            }
        );
    }
}
