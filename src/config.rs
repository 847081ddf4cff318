//! Session configuration.
//!
//! A [`SessionConfig`] is handed to the client at construction and never
//! changes afterwards. The defaults are deployment starting points, not
//! protocol constants; tune batch size, byte budget and flush interval to
//! the PDP's latency and load.

use std::time::Duration;

use crate::error::Error;

/// Batching, deadline, retry and cache settings for one client session.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct SessionConfig {
    /// A batch is dispatched once it holds this many requests.
    pub max_batch_size: usize,
    /// A batch is dispatched once its estimated encoded size reaches this
    /// many bytes.
    pub max_batch_bytes: usize,
    /// Upper bound on how long the first request of a batch waits for the
    /// batch to fill.
    pub flush_interval: Duration,
    /// Deadline for one dispatch attempt.
    pub request_timeout: Duration,
    /// How many times a batch is re-sent after a transient failure.
    pub retry_budget: u32,
    /// Delay schedule between re-sends.
    pub backoff: BackoffConfig,
    /// After this many consecutive failed dispatches the session closes.
    /// Concurrent batches that fail during the same outage count once.
    pub max_consecutive_failures: u32,
    /// Decision cache; `None` disables caching.
    pub cache: Option<CacheConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 50,
            max_batch_bytes: 512 * 1024,
            flush_interval: Duration::from_millis(5),
            request_timeout: Duration::from_secs(1),
            retry_budget: 3,
            backoff: BackoffConfig::default(),
            max_consecutive_failures: 10,
            cache: None,
        }
    }
}

impl SessionConfig {
    /// Sets the maximum number of requests per batch.
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Sets the maximum estimated encoded bytes per batch.
    pub fn with_max_batch_bytes(mut self, bytes: usize) -> Self {
        self.max_batch_bytes = bytes;
        self
    }

    /// Sets the flush interval.
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Sets the per-dispatch deadline.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the retry budget.
    pub fn with_retry_budget(mut self, retries: u32) -> Self {
        self.retry_budget = retries;
        self
    }

    /// Sets the backoff schedule.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets how many consecutive failures close the session.
    pub fn with_max_consecutive_failures(mut self, failures: u32) -> Self {
        self.max_consecutive_failures = failures;
        self
    }

    /// Enables the decision cache.
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Checks the settings for values the session cannot work with.
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_batch_size == 0 {
            return Err(Error::InvalidArgument("max_batch_size must be at least 1".into()));
        }
        if self.max_batch_bytes == 0 {
            return Err(Error::InvalidArgument("max_batch_bytes must be at least 1".into()));
        }
        if self.flush_interval.is_zero() {
            return Err(Error::InvalidArgument("flush_interval must be positive".into()));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::InvalidArgument("request_timeout must be positive".into()));
        }
        if self.max_consecutive_failures == 0 {
            return Err(Error::InvalidArgument(
                "max_consecutive_failures must be at least 1".into(),
            ));
        }
        self.backoff.validate()?;
        if let Some(cache) = &self.cache {
            cache.validate()?;
        }
        Ok(())
    }
}

/// Exponential backoff with jitter.
///
/// The n-th delay is `initial * multiplier^n`, capped at `max`, then reduced
/// by a random fraction of at most `jitter`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct BackoffConfig {
    /// Delay before the first re-send.
    pub initial: Duration,
    /// Largest delay.
    pub max: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Fraction of the delay that may be randomly shaved off, in `0.0..=1.0`.
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(50),
            max: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl BackoffConfig {
    fn validate(&self) -> Result<(), Error> {
        if self.initial > self.max {
            return Err(Error::InvalidArgument(
                "backoff initial delay must not exceed max delay".into(),
            ));
        }
        if !(self.multiplier >= 1.0 && self.multiplier.is_finite()) {
            return Err(Error::InvalidArgument(
                "backoff multiplier must be a finite number >= 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(Error::InvalidArgument("backoff jitter must be within 0..=1".into()));
        }
        Ok(())
    }
}

/// Decision cache settings.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct CacheConfig {
    /// How long a decision stays valid.
    pub ttl: Duration,
    /// Maximum number of cached decisions; least recently used are evicted
    /// first.
    pub max_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(10),
            max_capacity: 10_000,
        }
    }
}

impl CacheConfig {
    /// Sets the time-to-live.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets the maximum number of entries.
    pub fn with_max_capacity(mut self, capacity: u64) -> Self {
        self.max_capacity = capacity;
        self
    }

    fn validate(&self) -> Result<(), Error> {
        if self.ttl.is_zero() {
            return Err(Error::InvalidArgument("cache ttl must be positive".into()));
        }
        if self.max_capacity == 0 {
            return Err(Error::InvalidArgument("cache max_capacity must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        SessionConfig::default().validate().unwrap();
        SessionConfig::default()
            .with_cache(CacheConfig::default())
            .validate()
            .unwrap();
    }

    #[test]
    fn zero_batch_size_rejected() {
        let err = SessionConfig::default()
            .with_max_batch_size(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn zero_flush_interval_rejected() {
        let err = SessionConfig::default()
            .with_flush_interval(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn inverted_backoff_rejected() {
        let backoff = BackoffConfig {
            initial: Duration::from_secs(10),
            max: Duration::from_secs(1),
            ..BackoffConfig::default()
        };
        assert!(SessionConfig::default().with_backoff(backoff).validate().is_err());
    }

    #[test]
    fn out_of_range_jitter_rejected() {
        let backoff = BackoffConfig {
            jitter: 1.5,
            ..BackoffConfig::default()
        };
        assert!(SessionConfig::default().with_backoff(backoff).validate().is_err());
    }

    #[test]
    fn empty_cache_rejected() {
        let cfg = SessionConfig::default().with_cache(CacheConfig::default().with_max_capacity(0));
        assert!(cfg.validate().is_err());
    }
}
