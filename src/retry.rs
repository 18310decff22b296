use std::time::Duration;

use crate::crd::{ChaosExperimentSpec, RetryBackoff};
use crate::validation;

/* ============================= CONSTANTS ============================= */

/// Exponential backoff never exceeds this.
pub const MAX_BACKOFF: Duration = Duration::from_secs(600);

/// Used when the spec omits `retryDelay`.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(30);

/* ============================= BACKOFF ============================= */

/// Delay before retry attempt `retry_count` (1-based).
///
/// Exponential: `initial * 2^(n-1)`, capped at 10 minutes.
/// Fixed: always `initial`.
pub fn backoff_delay(backoff: RetryBackoff, initial: Duration, retry_count: u32) -> Duration {
    match backoff {
        RetryBackoff::Fixed => initial,
        RetryBackoff::Exponential => {
            let exp = retry_count.saturating_sub(1).min(20);
            initial
                .checked_mul(1u32 << exp)
                .map_or(MAX_BACKOFF, |d| d.min(MAX_BACKOFF))
        }
    }
}

/// The spec's initial retry delay, falling back to the default when absent
/// or unparseable (validation rejects malformed values at admission).
pub fn initial_delay(spec: &ChaosExperimentSpec) -> Duration {
    spec.retry_delay
        .as_deref()
        .and_then(validation::parse_duration)
        .unwrap_or(DEFAULT_RETRY_DELAY)
}

/// Whether another retry may be attempted after `retry_count` failures.
pub fn has_budget(retry_count: u32, max_retries: u32) -> bool {
    retry_count < max_retries
}

/// Delay for the next retry of `spec` after `retry_count` prior failures.
pub fn next_delay(spec: &ChaosExperimentSpec, retry_count: u32) -> Duration {
    backoff_delay(spec.effective_backoff(), initial_delay(spec), retry_count)
}

/* ============================= TESTS ============================= */
