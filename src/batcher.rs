//! Accumulates checks into bounded batches.
//!
//! There is always exactly one open batch. A submitted request joins it
//! under a single lock, together with its registration in the correlator,
//! and the same critical section decides whether the batch is now full. A
//! full batch is swapped out for a fresh one before the lock is released,
//! so no two submitters can dispatch the same batch and no request can land
//! in a batch that has already left.
//!
//! A batch leaves when it reaches the configured request count, when adding
//! a request would push its estimated size past the byte limit, when the
//! flush interval elapses after its first request, or on an explicit flush.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;

use crate::cache::{DecisionCache, Fingerprint};
use crate::config::SessionConfig;
use crate::correlator::{Correlator, Prefill};
use crate::error::Error;
use crate::pending::PendingCall;
use crate::session::Session;
use crate::stats::Stats;
use crate::transport::{Batch, BatchItem};
use crate::types::{BatchId, CheckRequest, CheckResult, IdGenerator};

struct OpenBatch {
    id: BatchId,
    items: Vec<BatchItem>,
    bytes: usize,
}

pub(crate) struct Batcher {
    open: Mutex<OpenBatch>,
    ids: IdGenerator,
    correlator: Arc<Correlator>,
    session: Arc<Session>,
    cache: Option<Arc<DecisionCache>>,
    stats: Arc<Stats>,
    handle: Handle,
    max_batch_size: usize,
    max_batch_bytes: usize,
    flush_interval: Duration,
}

impl Batcher {
    pub(crate) fn new(
        correlator: Arc<Correlator>,
        session: Arc<Session>,
        cache: Option<Arc<DecisionCache>>,
        stats: Arc<Stats>,
        config: &SessionConfig,
        handle: Handle,
    ) -> Arc<Self> {
        let ids = IdGenerator::default();
        let first = ids.next_batch();
        Arc::new(Self {
            open: Mutex::new(OpenBatch {
                id: first,
                items: Vec::new(),
                bytes: 0,
            }),
            ids,
            correlator,
            session,
            cache,
            stats,
            handle,
            max_batch_size: config.max_batch_size,
            max_batch_bytes: config.max_batch_bytes,
            flush_interval: config.flush_interval,
        })
    }

    /// Queues `request` and returns the handle its result will arrive on.
    ///
    /// Never waits on the network. Resolves immediately when the session is
    /// closed or when every action is answered by the cache.
    pub(crate) fn submit(self: &Arc<Self>, request: CheckRequest) -> PendingCall {
        let token = self.ids.next_token();
        if let Some(reason) = self.session.closed_reason() {
            return PendingCall::ready(token, Err(Error::SessionClosed { reason }));
        }

        let (request, prefill) = match &self.cache {
            Some(cache) => {
                let mut prefill = Prefill::default();
                for action in request.actions() {
                    let fingerprint = Fingerprint::of(&request, action);
                    match cache.get(&fingerprint) {
                        Some(decision) => {
                            prefill.decisions.insert(action.clone(), decision);
                        }
                        None => prefill.fingerprints.push((action.clone(), fingerprint)),
                    }
                }
                if prefill.fingerprints.is_empty() {
                    self.stats.record_cache_hit();
                    tracing::debug!(%token, "answered from cache");
                    return PendingCall::ready(
                        token,
                        Ok(CheckResult::from_decisions(prefill.decisions)),
                    );
                }
                let request = if prefill.decisions.is_empty() {
                    request
                } else {
                    request.retain_actions(|a| !prefill.decisions.contains_key(a))
                };
                (request, prefill)
            }
            None => (request, Prefill::default()),
        };

        let size = request.estimated_size();
        let item = BatchItem::new(token, Arc::new(request));
        let mut full = Vec::new();
        let pending = {
            let mut open = self.open.lock();
            if !open.items.is_empty() && open.bytes + size > self.max_batch_bytes {
                full.push(self.take(&mut open));
            }
            let pending = self.correlator.register(token, open.id, prefill);
            let first = open.items.is_empty();
            open.items.push(item);
            open.bytes += size;
            if open.items.len() >= self.max_batch_size || open.bytes >= self.max_batch_bytes {
                full.push(self.take(&mut open));
            } else if first {
                self.schedule_flush(open.id);
            }
            pending
        };
        for batch in full {
            self.dispatch(batch);
        }
        pending
    }

    /// The runtime background work is spawned on.
    pub(crate) fn runtime(&self) -> &Handle {
        &self.handle
    }

    /// Dispatches the open batch now, if it holds anything.
    pub(crate) fn flush(&self) {
        let batch = {
            let mut open = self.open.lock();
            if open.items.is_empty() {
                return;
            }
            self.take(&mut open)
        };
        self.dispatch(batch);
    }

    fn flush_batch(&self, id: BatchId) {
        let batch = {
            let mut open = self.open.lock();
            if open.id != id || open.items.is_empty() {
                return;
            }
            self.take(&mut open)
        };
        tracing::debug!(batch_id = %id, "flush interval elapsed");
        self.dispatch(batch);
    }

    fn take(&self, open: &mut OpenBatch) -> Batch {
        let next = OpenBatch {
            id: self.ids.next_batch(),
            items: Vec::new(),
            bytes: 0,
        };
        let closed = std::mem::replace(open, next);
        Batch::new(closed.id, closed.items)
    }

    fn schedule_flush(self: &Arc<Self>, id: BatchId) {
        let batcher: Weak<Self> = Arc::downgrade(self);
        let interval = self.flush_interval;
        self.handle.spawn(async move {
            tokio::time::sleep(interval).await;
            if let Some(batcher) = batcher.upgrade() {
                batcher.flush_batch(id);
            }
        });
    }

    fn dispatch(&self, batch: Batch) {
        tracing::debug!(batch_id = %batch.id(), size = batch.len(), "batch closed");
        self.handle.spawn(Arc::clone(&self.session).dispatch(batch));
    }
}
