// src/engine/tracker.rs

//! Retry and backoff policy.
//!
//! Timeouts themselves are armed by the core as timers; the tracker only
//! decides what a failed attempt turns into.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::RetryPolicy;
use crate::errors::TaskFailure;

/// What to do with a task whose attempt just failed.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Run again after `delay`; `attempt` is the new retry count.
    Retry { attempt: u32, delay: Duration },
    /// Out of retries: the task fails with this reason.
    GiveUp(TaskFailure),
}

#[derive(Debug)]
pub struct ExecutionTracker {
    policy: RetryPolicy,
    rng: StdRng,
}

impl ExecutionTracker {
    pub fn new(policy: RetryPolicy) -> Self {
        let rng = match policy.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { policy, rng }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Decide between retry and final failure.
    ///
    /// `retry_count` is the number of retries already used; it never ends up
    /// above `max_retries`.
    pub fn on_failure(
        &mut self,
        retry_count: u32,
        max_retries: u32,
        failure: TaskFailure,
    ) -> RetryDecision {
        if retry_count < max_retries {
            let attempt = retry_count + 1;
            RetryDecision::Retry {
                attempt,
                delay: self.backoff_delay(attempt),
            }
        } else {
            RetryDecision::GiveUp(TaskFailure::MaxRetriesExceeded {
                attempts: retry_count + 1,
                last: Box::new(failure),
            })
        }
    }

    /// `min(base * 2^(retry - 1), max)` without jitter.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.policy
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.policy.max_delay)
    }

    /// Base delay plus uniform jitter in `[0, jitter * delay]`.
    pub fn backoff_delay(&mut self, retry: u32) -> Duration {
        let delay = self.base_delay(retry);
        if self.policy.jitter <= 0.0 {
            return delay;
        }
        let factor = self.rng.gen_range(0.0..=self.policy.jitter);
        delay + delay.mul_f64(factor)
    }
}
