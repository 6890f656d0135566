// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Bounded retry with exponential backoff and jitter.
//!
//! One policy type drives both the Workshop page fetches and the SteamCMD
//! batch attempts. The operation closure receives the 1-based attempt
//! number so callers can do per-attempt preparation (the supervisor wipes
//! failed items' staging directories before every attempt after the first).

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;

use crate::error::WorkshopError;

/// Default number of attempts, including the first one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff (milliseconds).
const RETRY_BASE_DELAY_MS: u64 = 500;

/// Maximum delay for exponential backoff (milliseconds).
const RETRY_MAX_DELAY_MS: u64 = 10_000;

/// Errors that know whether another attempt could help.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for WorkshopError {
    fn is_retryable(&self) -> bool {
        WorkshopError::is_retryable(self)
    }
}

/// Attempt budget and backoff curve.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Zero is treated as one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Extra random delay as a fraction of the computed delay (0.0 disables).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
            max_delay: Duration::from_millis(RETRY_MAX_DELAY_MS),
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// A policy that retries immediately. Used by tests and by callers that
    /// pace themselves.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        }
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Backoff before `attempt` (1-based) without jitter: nothing before the
    /// first attempt, then base, 2x base, 4x base, ... capped at `max_delay`.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 2).min(31);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        delay.min(self.max_delay)
    }

    /// Backoff before `attempt` including random jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for(attempt);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let extra = rand::thread_rng().gen_range(0.0..=self.jitter);
        base + base.mul_f64(extra)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. The last error is returned on exhaustion.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let attempts = self.attempts();
        let mut attempt = 1;

        loop {
            let delay = self.delay_for(attempt);
            if !delay.is_zero() {
                tracing::debug!(label, attempt, delay_ms = delay.as_millis() as u64, "Backing off");
                sleep(delay).await;
            }

            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < attempts => {
                    tracing::warn!(label, attempt, max_attempts = attempts, "Attempt failed: {}", err);
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_retryable() {
                        tracing::warn!(label, attempt, "Giving up after {} attempts: {}", attempt, err);
                    } else {
                        tracing::debug!(label, attempt, "Not retrying: {}", err);
                    }
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_backoff_curve() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.base_delay_for(1), Duration::ZERO);
        assert_eq!(policy.base_delay_for(2), Duration::from_millis(500));
        assert_eq!(policy.base_delay_for(3), Duration::from_millis(1000));
        assert_eq!(policy.base_delay_for(4), Duration::from_millis(2000));
        assert_eq!(policy.base_delay_for(20), Duration::from_millis(10_000));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            let delay = policy.delay_for(3);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(1250));
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::immediate(3);

        let counter = calls.clone();
        let result: Result<u32, WorkshopError> = policy
            .run("flaky", |attempt| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if attempt < 3 {
                        Err(WorkshopError::RateLimited)
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let policy = RetryPolicy::immediate(2);
        let calls = AtomicU32::new(0);

        let result: Result<(), WorkshopError> = policy
            .run("always-busy", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(WorkshopError::HttpStatus(503)) }
            })
            .await;

        assert_eq!(result, Err(WorkshopError::HttpStatus(503)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_stops_immediately() {
        let policy = RetryPolicy::immediate(5);
        let calls = AtomicU32::new(0);

        let result: Result<(), WorkshopError> = policy
            .run("missing", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(WorkshopError::NotFound) }
            })
            .await;

        assert_eq!(result, Err(WorkshopError::NotFound));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let policy = RetryPolicy::immediate(0);
        let result: Result<&str, WorkshopError> = policy.run("once", |_| async { Ok("done") }).await;
        assert_eq!(result, Ok("done"));
    }
}
