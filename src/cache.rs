//! Decision cache.
//!
//! Memoizes single decisions keyed by a [`Fingerprint`] of the normalized
//! question: principal (id, roles, attributes, policy version, scope),
//! resource (kind, id, attributes, policy version, scope), action and
//! auxiliary data. Attribute maps are ordered, so two requests that differ
//! only in attribute insertion order share a fingerprint.
//!
//! Entries expire after their own time-to-live; when the capacity bound is
//! reached the least recently used entry is evicted. Only plain decisions
//! are stored. Results that carry validation errors or rule outputs never
//! reach the cache.
//!
//! Caching is disabled by default: a cached ALLOW keeps being served after
//! the policy changes until it expires.

use std::fmt;
use std::time::{Duration, Instant};

use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use moka::Expiry;
use sha2::Digest;

use crate::config::CacheConfig;
use crate::types::attribute::digest_str;
use crate::types::{Action, CheckRequest, Decision};

/// Deterministic hash of one normalized check question.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprints `action` as asked by `request`.
    pub(crate) fn of(request: &CheckRequest, action: &Action) -> Self {
        let mut hasher = sha2::Sha256::new();
        request.principal().digest_into(&mut hasher);
        request.resource().digest_into(&mut hasher);
        digest_str(&mut hasher, action.as_str());
        match request.aux_data() {
            Some(aux) => {
                hasher.update([1u8]);
                aux.digest_into(&mut hasher);
            }
            None => hasher.update([0u8]),
        }
        Self(hasher.finalize().into())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", hex::encode(&self.0[..8]))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

#[derive(Debug, Clone)]
struct Entry {
    decision: Decision,
    ttl: Duration,
}

struct PerEntryTtl;

impl Expiry<Fingerprint, Entry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &Fingerprint,
        value: &Entry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &Fingerprint,
        value: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Thread-safe, bounded, time-expiring store of decisions.
pub(crate) struct DecisionCache {
    cache: Cache<Fingerprint, Entry>,
    ttl: Duration,
}

impl fmt::Debug for DecisionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecisionCache")
            .field("ttl", &self.ttl)
            .field("entry_count", &self.cache.entry_count())
            .finish()
    }
}

impl DecisionCache {
    pub(crate) fn new(config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_capacity)
            .eviction_policy(EvictionPolicy::lru())
            .expire_after(PerEntryTtl)
            .build();
        Self {
            cache,
            ttl: config.ttl,
        }
    }

    pub(crate) fn get(&self, fingerprint: &Fingerprint) -> Option<Decision> {
        self.cache.get(fingerprint).map(|entry| entry.decision)
    }

    pub(crate) fn put(&self, fingerprint: Fingerprint, decision: Decision, ttl: Duration) {
        self.cache.insert(fingerprint, Entry { decision, ttl });
    }

    pub(crate) fn put_default(&self, fingerprint: Fingerprint, decision: Decision) {
        self.put(fingerprint, decision, self.ttl);
    }

    #[cfg(test)]
    fn sync(&self) {
        self.cache.run_pending_tasks();
    }

    #[cfg(test)]
    fn len(&self) -> u64 {
        self.cache.entry_count()
    }
}
