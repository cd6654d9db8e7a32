// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Per-key exponential backoff.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

/// Tracks consecutive failures per key and turns them into a delay of
/// `min(base * 2^failures, max)`.
#[derive(Debug)]
pub struct RateLimiter<T> {
    base: Duration,
    max: Duration,
    failures: HashMap<T, u32>,
}

impl<T: Hash + Eq + Clone> RateLimiter<T> {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            failures: HashMap::new(),
        }
    }

    /// Delay for the next retry of `key`; counts as one more failure.
    pub fn delay_for(&mut self, key: &T) -> Duration {
        let failures = self.failures.entry(key.clone()).or_insert(0);
        let delay = 2u32
            .checked_pow(*failures)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max));
        *failures = failures.saturating_add(1);
        delay
    }

    /// Ends the failure streak for `key`.
    pub fn forget(&mut self, key: &T) {
        self.failures.remove(key);
    }

    pub fn num_requeues(&self, key: &T) -> u32 {
        self.failures.get(key).copied().unwrap_or(0)
    }
}
