// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Shared substrate for the vestig logging engine: runtime capability
//! probing, clock helpers, the bounded circular buffer used by transports,
//! and the token-bucket rate limiter used by the sampler.

use std::sync::{Mutex, MutexGuard};

pub mod buffer;
pub mod rate_limiter;
pub mod runtime;

/// Extension trait for `Mutex` to provide a method that acquires a lock,
/// panicking if the lock is poisoned.
///
/// Lock poisoning only happens when a holder panicked, at which point the
/// process is already unwinding; recovering the inner state would not help.
/// This helper keeps call sites free of `#[allow(clippy::unwrap_used)]`
/// annotations.
///
/// # Panics
///
/// Panics if the `Mutex` is poisoned.
pub trait MutexExt<T> {
    fn lock_or_panic(&self) -> MutexGuard<'_, T>;
}

impl<T> MutexExt<T> for Mutex<T> {
    #[inline(always)]
    #[track_caller]
    fn lock_or_panic(&self) -> MutexGuard<'_, T> {
        #[allow(clippy::unwrap_used)]
        self.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn lock_or_panic_returns_guard() {
        let data = Arc::new(Mutex::new(5));
        let data_clone = Arc::clone(&data);

        std::thread::spawn(move || {
            let mut num = data_clone.lock_or_panic();
            *num += 1;
        })
        .join()
        .expect("thread panicked");

        assert_eq!(*data.lock_or_panic(), 6);
    }
}
