// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Retry policy shared by the batching transports.

use std::time::Duration;

/// Exponential backoff with a small jitter band.
///
/// Attempt `n` (0-indexed) backs off `retry_delay * 2^n`, with ±10% jitter
/// so a fleet of emitters does not hammer a shared collector in lockstep.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total send attempts per batch.
    pub(crate) max_retries: u32,
    /// Base delay for the first backoff step.
    pub(crate) retry_delay: Duration,
    pub(crate) jitter: bool,
}

impl RetryConfig {
    /// Defaults: 3 attempts, 1s base delay, jitter on.
    pub fn new() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            jitter: true,
        }
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n.max(1);
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Backoff after the given failed attempt (0-indexed).
    pub(crate) fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self
            .retry_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        if !self.jitter {
            return base;
        }
        let base_nanos = base.as_nanos() as u64;
        if base_nanos == 0 {
            return Duration::ZERO;
        }
        // ±10%
        let band = base_nanos / 10;
        let jittered = base_nanos - band + fastrand::u64(0..=band * 2);
        Duration::from_nanos(jittered)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new()
    }
}
