//! Retry delays.

use std::time::Duration;

use rand::Rng;

use crate::config::BackoffConfig;

/// Delay before re-send number `retry` (zero-based).
///
/// `initial * multiplier^retry`, capped at `max`, minus a random share of up
/// to `jitter` of that value.
pub(crate) fn delay(config: &BackoffConfig, retry: u32) -> Duration {
    let base = config.initial.as_secs_f64() * config.multiplier.powi(retry.min(64) as i32);
    let capped = base.min(config.max.as_secs_f64());
    let shaved = if config.jitter > 0.0 {
        capped * rand::rng().random_range(0.0..=config.jitter)
    } else {
        0.0
    };
    Duration::from_secs_f64((capped - shaved).max(0.0))
}
