//! Re-running operations that lost an optimistic concurrency race.
//!
//! Every mutating inventory operation is a unit of work that fails with a
//! conflict when another writer committed first. Such an operation is run
//! again from a fresh read; [`RetryPolicy`] decides how often and how long
//! to back off in between. Any other error ends the operation at once.
//!
//! # Example
//!
//! ```rust
//! use parkgrid_runtime::retry::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::builder()
//!     .max_retries(5)
//!     .initial_delay(Duration::from_millis(2))
//!     .max_delay(Duration::from_millis(200))
//!     .build();
//!
//! assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(2));
//! assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(16));
//! ```

use crate::metrics::InventoryMetrics;
use parkgrid_core::error::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Backoff schedule for conflicting operations.
///
/// Defaults: 10 retries, 2ms doubling up to 200ms, with jitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: usize,
    /// Backoff before the first retry
    pub initial_delay: Duration,
    /// Upper bound on any single backoff
    pub max_delay: Duration,
    /// Growth factor between consecutive backoffs
    pub multiplier: f64,
    /// Scale each backoff by a random factor in `0.5..=1.0`
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            initial_delay: Duration::from_millis(2),
            max_delay: Duration::from_millis(200),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Start from the defaults.
    #[must_use]
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder(Self::default())
    }

    /// Surface the first conflict to the caller.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::builder().max_retries(0).build()
    }

    /// Backoff before retry `attempt` (0-based), without jitter.
    ///
    /// `initial_delay * multiplier^attempt`, capped at `max_delay`, in whole
    /// milliseconds.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_possible_wrap,
            clippy::cast_precision_loss,
            clippy::cast_sign_loss
        )]
        let millis = {
            let exponent = attempt.min(32) as i32;
            let grown = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
            grown.min(self.max_delay.as_millis() as f64).max(0.0) as u64
        };
        Duration::from_millis(millis)
    }

    /// The backoff actually slept before retry `attempt`.
    #[must_use]
    pub fn sleep_for_attempt(&self, attempt: usize) -> Duration {
        let base = self.delay_for_attempt(attempt);
        if self.jitter {
            base.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
        } else {
            base
        }
    }
}

/// Builder for [`RetryPolicy`]; unset fields keep their defaults.
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder(RetryPolicy);

impl RetryPolicyBuilder {
    /// Retries after the first attempt.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: usize) -> Self {
        self.0.max_retries = max_retries;
        self
    }

    /// Backoff before the first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.0.initial_delay = delay;
        self
    }

    /// Upper bound on any single backoff.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.0.max_delay = delay;
        self
    }

    /// Growth factor between backoffs.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.0.multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub const fn jitter(mut self, jitter: bool) -> Self {
        self.0.jitter = jitter;
        self
    }

    /// Finish.
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        self.0
    }
}

/// Run `attempt` until it succeeds, fails with something other than a
/// conflict, or the policy's retries run out.
///
/// `operation` names the caller in logs. Each conflict is counted in
/// `parkgrid_commit_conflicts_total`.
///
/// # Errors
///
/// The first non-conflict error, or the last conflict once retries are
/// exhausted.
pub async fn retry_on_conflict<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retries = 0;
    loop {
        let err = match attempt().await {
            Ok(value) => {
                if retries > 0 {
                    tracing::info!(operation, retries, "Succeeded after conflicts");
                }
                return Ok(value);
            }
            Err(err) if err.is_conflict() => err,
            Err(err) => return Err(err),
        };

        InventoryMetrics::record_conflict();
        if retries >= policy.max_retries {
            tracing::error!(operation, retries, error = %err, "Giving up after repeated conflicts");
            return Err(err);
        }

        let delay = policy.sleep_for_attempt(retries);
        tracing::warn!(
            operation,
            retries,
            delay_ms = delay.as_millis(),
            error = %err,
            "Conflict, retrying"
        );
        tokio::time::sleep(delay).await;
        retries += 1;
    }
}
