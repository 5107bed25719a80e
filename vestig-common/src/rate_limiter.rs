// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Token bucket rate limiter backing the rate-limit sampler.

use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

fn duration_since_epoch() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
}

/// Token bucket rate limiter.
///
/// Allows a burst of up to `capacity` acquisitions, refilled continuously at
/// `capacity` per `interval` nanoseconds.
///
/// A negative capacity allows everything; a zero capacity allows nothing.
///
/// <div class="warning">Not thread safe — wrap in a <code>Mutex</code> when
/// shared.</div>
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    interval: f64,
    tokens: f64,
    last_update: Duration,
}

impl TokenBucket {
    /// Create a bucket refilling `capacity` tokens per `interval`
    /// nanoseconds.
    pub fn new(capacity: f64, interval: f64) -> Self {
        TokenBucket {
            capacity,
            interval,
            tokens: capacity,
            last_update: Duration::from_nanos(0),
        }
    }

    /// Create a bucket refilling `max_per_second` tokens per second.
    pub fn per_second(max_per_second: f64) -> Self {
        Self::new(max_per_second, 1e9)
    }

    /// Consume one token if available.
    ///
    /// `ts` is the acquisition time as a `Duration` since the Unix epoch;
    /// `None` uses the current time. Timestamps older than the last update
    /// are treated as the last update (time never rewinds the bucket).
    pub fn try_acquire(&mut self, ts: Option<Duration>) -> bool {
        if self.capacity < 0.0 {
            return true;
        } else if self.capacity == 0.0 {
            return false;
        }

        let now = ts.unwrap_or_else(duration_since_epoch);
        if self.last_update == Duration::from_nanos(0) {
            self.last_update = now;
        }

        let mut elapsed = Duration::from_nanos(0);
        if self.last_update < now {
            elapsed = now - self.last_update;
        }
        let elapsed_ns = elapsed.as_secs_f64() * 1e9;

        if self.tokens < self.capacity {
            let tokens_to_add = (elapsed_ns / self.interval) * self.capacity;
            if tokens_to_add > 0.0 {
                self.tokens = (self.tokens + tokens_to_add).min(self.capacity);
                self.last_update = now;
            }
        }

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
