//! Matches results back to the callers that asked for them.
//!
//! The correlator owns the live mapping from [`CorrelationToken`] to the
//! sending half of each caller's [`PendingCall`]. It is the only place a
//! pending call is resolved: every entry is removed from the map under the
//! lock before its result is sent, so a token can be resolved at most once
//! no matter how many replies, retries or cancellations race for it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::cache::{DecisionCache, Fingerprint};
use crate::error::Error;
use crate::pending::{Outcome, PendingCall};
use crate::types::{Action, BatchId, CheckResult, CorrelationToken, Decision};

/// What happened to a result handed to [`Correlator::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolution {
    /// The caller received it.
    Delivered,
    /// The token was no longer live (already resolved, failed or cancelled).
    Discarded,
}

/// Decisions served from the cache at submission, plus the fingerprints of
/// the actions that still have to be asked.
#[derive(Debug, Default)]
pub(crate) struct Prefill {
    pub(crate) decisions: BTreeMap<Action, Decision>,
    pub(crate) fingerprints: Vec<(Action, Fingerprint)>,
}

struct Waiter {
    batch: BatchId,
    tx: oneshot::Sender<Outcome>,
    prefill: Prefill,
}

#[derive(Default)]
struct Live {
    waiters: HashMap<CorrelationToken, Waiter>,
    batches: HashMap<BatchId, HashSet<CorrelationToken>>,
}

impl Live {
    fn take(&mut self, token: CorrelationToken) -> Option<Waiter> {
        let waiter = self.waiters.remove(&token)?;
        if let Some(tokens) = self.batches.get_mut(&waiter.batch) {
            tokens.remove(&token);
            if tokens.is_empty() {
                self.batches.remove(&waiter.batch);
            }
        }
        Some(waiter)
    }
}

pub(crate) struct Correlator {
    live: Mutex<Live>,
    cache: Option<Arc<DecisionCache>>,
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("live", &self.live.lock().waiters.len())
            .finish()
    }
}

impl Correlator {
    pub(crate) fn new(cache: Option<Arc<DecisionCache>>) -> Arc<Self> {
        Arc::new(Self {
            live: Mutex::new(Live::default()),
            cache,
        })
    }

    /// Starts tracking `token` as part of `batch`.
    pub(crate) fn register(
        self: &Arc<Self>,
        token: CorrelationToken,
        batch: BatchId,
        prefill: Prefill,
    ) -> PendingCall {
        let (tx, rx) = oneshot::channel();
        let mut live = self.live.lock();
        live.waiters.insert(token, Waiter { batch, tx, prefill });
        live.batches.entry(batch).or_default().insert(token);
        drop(live);
        PendingCall::waiting(token, rx, Arc::downgrade(self))
    }

    /// Delivers `result` to the caller waiting on `token`.
    pub(crate) fn resolve(&self, token: CorrelationToken, mut result: CheckResult) -> Resolution {
        let Some(waiter) = self.live.lock().take(token) else {
            return Resolution::Discarded;
        };
        if let Some(cache) = &self.cache {
            if result.is_cacheable() {
                for (action, fingerprint) in &waiter.prefill.fingerprints {
                    if let Some(decision) = result.decision(action.as_str()) {
                        cache.put_default(*fingerprint, decision);
                    }
                }
            }
        }
        if !waiter.prefill.decisions.is_empty() {
            result.merge_decisions(&waiter.prefill.decisions);
        }
        // The receiver may already be gone; the call is resolved either way.
        let _ = waiter.tx.send(Ok(result));
        Resolution::Delivered
    }

    /// Fails one call. Returns `false` if it was no longer live.
    pub(crate) fn fail(&self, token: CorrelationToken, error: Error) -> bool {
        let Some(waiter) = self.live.lock().take(token) else {
            return false;
        };
        let _ = waiter.tx.send(Err(error));
        true
    }

    /// Fails every call still live in `batch`. Returns how many were failed.
    pub(crate) fn fail_batch(&self, batch: BatchId, error: &Error) -> usize {
        let waiters: Vec<Waiter> = {
            let mut live = self.live.lock();
            let tokens = live.batches.remove(&batch).unwrap_or_default();
            tokens
                .into_iter()
                .filter_map(|token| live.waiters.remove(&token))
                .collect()
        };
        let failed = waiters.len();
        for waiter in waiters {
            let _ = waiter.tx.send(Err(error.clone()));
        }
        failed
    }

    /// Fails every live call.
    pub(crate) fn fail_all(&self, error: &Error) -> usize {
        let waiters: Vec<Waiter> = {
            let mut live = self.live.lock();
            live.batches.clear();
            live.waiters.drain().map(|(_, waiter)| waiter).collect()
        };
        let failed = waiters.len();
        for waiter in waiters {
            let _ = waiter.tx.send(Err(error.clone()));
        }
        failed
    }

    /// Drops `token` without resolving it. Returns `false` if it was no
    /// longer live.
    pub(crate) fn cancel(&self, token: CorrelationToken) -> bool {
        self.live.lock().take(token).is_some()
    }

    pub(crate) fn is_live(&self, token: CorrelationToken) -> bool {
        self.live.lock().waiters.contains_key(&token)
    }

    #[cfg(test)]
    pub(crate) fn live_count(&self) -> usize {
        self.live.lock().waiters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::types::{CheckRequest, IdGenerator, Principal, Resource};

    fn read() -> Action {
        Action::new("read").unwrap()
    }

    fn allow_read() -> CheckResult {
        CheckResult::from_decisions([(read(), Decision::Allow)])
    }

    #[tokio::test]
    async fn resolves_exactly_once() {
        let ids = IdGenerator::default();
        let correlator = Correlator::new(None);
        let token = ids.next_token();
        let call = correlator.register(token, ids.next_batch(), Prefill::default());

        assert_eq!(correlator.resolve(token, allow_read()), Resolution::Delivered);
        assert_eq!(correlator.resolve(token, allow_read()), Resolution::Discarded);
        assert!(!correlator.fail(token, Error::Cancelled));
        assert_eq!(call.await.unwrap(), allow_read());
        assert_eq!(correlator.live_count(), 0);
    }

    #[tokio::test]
    async fn fail_batch_only_touches_that_batch() {
        let ids = IdGenerator::default();
        let correlator = Correlator::new(None);
        let (first, second) = (ids.next_batch(), ids.next_batch());
        let a = ids.next_token();
        let b = ids.next_token();
        let c = ids.next_token();
        let call_a = correlator.register(a, first, Prefill::default());
        let call_b = correlator.register(b, first, Prefill::default());
        let call_c = correlator.register(c, second, Prefill::default());

        correlator.resolve(a, allow_read());
        let err = Error::Transport("connection reset".into());
        assert_eq!(correlator.fail_batch(first, &err), 1);
        assert_eq!(correlator.fail_batch(first, &err), 0);

        assert!(call_a.await.is_ok());
        assert_eq!(call_b.await.unwrap_err(), err);
        assert!(correlator.is_live(c));
        correlator.resolve(c, allow_read());
        assert!(call_c.await.is_ok());
    }

    #[tokio::test]
    async fn cancelled_token_is_not_resolved() {
        let ids = IdGenerator::default();
        let correlator = Correlator::new(None);
        let token = ids.next_token();
        let mut call = correlator.register(token, ids.next_batch(), Prefill::default());

        assert!(call.cancel());
        assert!(!correlator.is_live(token));
        assert_eq!(correlator.resolve(token, allow_read()), Resolution::Discarded);
        assert_eq!(call.await.unwrap_err(), Error::Cancelled);
    }

    #[tokio::test]
    async fn dropping_the_call_cancels_it() {
        let ids = IdGenerator::default();
        let correlator = Correlator::new(None);
        let token = ids.next_token();
        drop(correlator.register(token, ids.next_batch(), Prefill::default()));
        assert!(!correlator.is_live(token));
    }

    #[tokio::test]
    async fn fail_all_drains_everything() {
        let ids = IdGenerator::default();
        let correlator = Correlator::new(None);
        let calls: Vec<_> = (0..3)
            .map(|_| correlator.register(ids.next_token(), ids.next_batch(), Prefill::default()))
            .collect();
        let err = Error::SessionClosed {
            reason: "closed by caller".into(),
        };
        assert_eq!(correlator.fail_all(&err), 3);
        for call in calls {
            assert_eq!(call.await.unwrap_err(), err);
        }
    }

    #[tokio::test]
    async fn merges_prefill_and_writes_through() {
        let ids = IdGenerator::default();
        let cache = Arc::new(DecisionCache::new(&CacheConfig::default()));
        let correlator = Correlator::new(Some(Arc::clone(&cache)));
        let request = CheckRequest::new(
            Principal::new("alice", ["employee"]).unwrap(),
            Resource::new("document", "doc:42").unwrap(),
            ["read", "write"],
        )
        .unwrap();
        let write = Action::new("write").unwrap();
        let read_fp = Fingerprint::of(&request, &read());
        let prefill = Prefill {
            decisions: BTreeMap::from([(write.clone(), Decision::Deny)]),
            fingerprints: vec![(read(), read_fp)],
        };

        let token = ids.next_token();
        let call = correlator.register(token, ids.next_batch(), prefill);
        correlator.resolve(token, allow_read());

        let result = call.await.unwrap();
        assert_eq!(result.decision("read"), Some(Decision::Allow));
        assert_eq!(result.decision("write"), Some(Decision::Deny));
        assert_eq!(cache.get(&read_fp), Some(Decision::Allow));
    }

    #[tokio::test]
    async fn validation_errors_are_not_cached() {
        let ids = IdGenerator::default();
        let cache = Arc::new(DecisionCache::new(&CacheConfig::default()));
        let correlator = Correlator::new(Some(Arc::clone(&cache)));
        let request = CheckRequest::new(
            Principal::new("alice", ["employee"]).unwrap(),
            Resource::new("document", "doc:42").unwrap(),
            ["read"],
        )
        .unwrap();
        let read_fp = Fingerprint::of(&request, &read());
        let token = ids.next_token();
        let call = correlator.register(
            token,
            ids.next_batch(),
            Prefill {
                decisions: BTreeMap::new(),
                fingerprints: vec![(read(), read_fp)],
            },
        );
        let invalid = CheckResult::invalid(vec![crate::types::ValidationError {
            path: "/department".into(),
            message: "expected string".into(),
            source: crate::types::ValidationSource::Principal,
        }]);
        correlator.resolve(token, invalid);
        assert!(call.await.unwrap().has_validation_errors());
        assert_eq!(cache.get(&read_fp), None);
    }
}
