//! Bounded exponential backoff for transient source failures.
//!
//! Only errors with [`SweepError::is_retryable`] are retried. Everything
//! else is returned on the first attempt.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, SweepError};

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt (default: 3).
    pub max_retries: u32,
    /// Base delay in milliseconds (default: 500).
    pub base_delay_ms: u64,
    /// Upper bound for a single delay in milliseconds (default: 30000).
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    /// No retries and no waiting; used in tests and dry runs.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Retries without sleeping.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }
}

/// Delay before retry `attempt` (0-indexed): `min(base * 2^attempt, max)`
/// plus up to 25% jitter.
pub fn compute_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = 2u64.saturating_pow(attempt);
    let capped_ms = config.base_delay_ms.saturating_mul(exp).min(config.max_delay_ms);

    let jitter_max_ms = capped_ms / 4;
    let jitter_ms = if jitter_max_ms > 0 {
        let seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as u64;
        seed % (jitter_max_ms + 1)
    } else {
        0
    };

    Duration::from_millis(capped_ms + jitter_ms)
}

/// Run `op`, retrying retryable failures up to `config.max_retries` times.
///
/// `what` names the call in log lines (e.g. `"trash 18c1"`).
pub fn with_retry<T>(config: &RetryConfig, what: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => {
                if attempt > 0 {
                    debug!(call = %what, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_retryable() && attempt < config.max_retries => {
                let delay = compute_delay(config, attempt);
                warn!(
                    call = %what,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying after transient error"
                );
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Fold the attempt count into a transient error that outlived its retries.
pub fn exhausted(err: SweepError, attempts: u32) -> SweepError {
    match err {
        SweepError::SourceUnavailable {
            reason,
            retryable: true,
        } => SweepError::SourceUnavailable {
            reason: format!("{reason} (after {attempts} attempts)"),
            retryable: true,
        },
        other => other,
    }
}
