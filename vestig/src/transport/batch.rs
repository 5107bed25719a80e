// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The shared buffering and retry engine behind every batching transport.
//!
//! Records enqueue into a bounded circular buffer; a batch is sent when the
//! buffer reaches `batch_size`, when the periodic timer fires, or on an
//! explicit flush. Only one flush runs at a time — overlapping triggers
//! coalesce into a single follow-up pass. A batch that exhausts its retries
//! goes back to the head of the buffer so per-transport ordering holds.

use super::retry::RetryConfig;
use crate::error::TransportError;
use crate::record::LogRecord;
use crate::transport::TransportStats;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use vestig_common::buffer::CircularBuffer;
use vestig_common::MutexExt;

const DEFAULT_BATCH_SIZE: usize = 20;
const DEFAULT_MAX_BUFFER_SIZE: usize = 500;
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

/// Buffering and delivery settings for a batching transport.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub(crate) batch_size: usize,
    pub(crate) flush_interval: Duration,
    pub(crate) max_buffer_size: usize,
    pub(crate) retry: RetryConfig,
    pub(crate) shutdown_deadline: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            retry: RetryConfig::default(),
            shutdown_deadline: DEFAULT_SHUTDOWN_DEADLINE,
        }
    }
}

impl BatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.batch_size = n.max(1);
        self
    }

    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn max_buffer_size(mut self, n: usize) -> Self {
        self.max_buffer_size = n.max(1);
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn shutdown_deadline(mut self, deadline: Duration) -> Self {
        self.shutdown_deadline = deadline;
        self
    }
}

/// Called once per final (post-retry) flush failure, with the error and the
/// size of the affected batch.
pub type FlushErrorHook = Arc<dyn Fn(&TransportError, usize) + Send + Sync>;
/// Called whenever records are dropped, with the count.
pub type DropHook = Arc<dyn Fn(usize) + Send + Sync>;

#[derive(Clone, Default)]
pub struct BatchHooks {
    pub on_flush_error: Option<FlushErrorHook>,
    pub on_drop: Option<DropHook>,
}

impl BatchHooks {
    fn flush_error(&self, err: &TransportError, batch_len: usize) {
        if let Some(hook) = &self.on_flush_error {
            hook(err, batch_len);
        }
    }

    fn dropped(&self, count: usize) {
        if count > 0 {
            if let Some(hook) = &self.on_drop {
                hook(count);
            }
        }
    }
}

/// The delivery half a concrete transport provides.
#[async_trait]
pub trait BatchSender: Send + Sync + 'static {
    async fn send(&self, batch: &[LogRecord]) -> Result<(), TransportError>;
}

struct TimerHandle {
    token: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

/// The buffering/retry engine a concrete transport embeds (behind an `Arc`).
pub struct BatchCore<S> {
    name: String,
    sender: S,
    config: BatchConfig,
    hooks: BatchHooks,
    buffer: Mutex<CircularBuffer<LogRecord>>,
    // The batch currently being sent. Kept out-of-buffer so a flush
    // cancelled at the shutdown deadline still accounts for it.
    in_flight: Mutex<Option<Arc<Vec<LogRecord>>>>,
    destroyed: AtomicBool,
    // Single in-flight flush; overlapping triggers coalesce via `follow_up`.
    flush_gate: tokio::sync::Mutex<()>,
    follow_up: AtomicBool,
    timer_started: AtomicBool,
    timer: Mutex<Option<TimerHandle>>,
    sent: AtomicU64,
    failed_flushes: AtomicU64,
    dropped_external: AtomicU64,
}

impl<S: BatchSender> BatchCore<S> {
    pub fn new(name: impl Into<String>, sender: S, config: BatchConfig, hooks: BatchHooks) -> Arc<Self> {
        let buffer = CircularBuffer::new(config.max_buffer_size);
        Arc::new(Self {
            name: name.into(),
            sender,
            config,
            hooks,
            buffer: Mutex::new(buffer),
            in_flight: Mutex::new(None),
            destroyed: AtomicBool::new(false),
            flush_gate: tokio::sync::Mutex::new(()),
            follow_up: AtomicBool::new(false),
            timer_started: AtomicBool::new(false),
            timer: Mutex::new(None),
            sent: AtomicU64::new(0),
            failed_flushes: AtomicU64::new(0),
            dropped_external: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Enqueue a record; trigger an asynchronous flush once a full batch is
    /// staged. Never blocks.
    pub fn enqueue(self: &Arc<Self>, record: LogRecord) {
        if self.is_destroyed() {
            return;
        }
        self.ensure_timer();
        let full_batch = {
            let mut buffer = self.buffer.lock_or_panic();
            if buffer.push(record).is_some() {
                drop(buffer);
                self.hooks.dropped(1);
                tracing::warn!(transport = %self.name, "buffer overflow, oldest record dropped");
                true
            } else {
                let len = buffer.len();
                drop(buffer);
                len >= self.config.batch_size
            }
        };
        if full_batch {
            self.spawn_flush();
        }
    }

    /// Put recovered records (offline queue) back at the head of the buffer.
    pub(crate) fn requeue_records(&self, records: Vec<LogRecord>) {
        if records.is_empty() {
            return;
        }
        let discarded = self.buffer.lock_or_panic().requeue_front(records);
        self.hooks.dropped(discarded);
    }

    // The periodic flush loop starts lazily, on the first enqueue that runs
    // inside a tokio runtime, or from `init`.
    pub(crate) fn ensure_timer(self: &Arc<Self>) {
        if self.timer_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let Ok(handle) = Handle::try_current() else {
            // No runtime yet; a later enqueue may find one.
            self.timer_started.store(false, Ordering::SeqCst);
            return;
        };
        let token = CancellationToken::new();
        let loop_token = token.clone();
        let core = Arc::clone(self);
        let interval = self.config.flush_interval;
        let task = handle.spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        core.flush_coalesced().await;
                    }
                    _ = loop_token.cancelled() => break,
                }
            }
        });
        *self.timer.lock_or_panic() = Some(TimerHandle { token, task });
    }

    fn spawn_flush(self: &Arc<Self>) {
        let Ok(handle) = Handle::try_current() else {
            // Without a runtime the records stay staged until an explicit
            // flush.
            return;
        };
        let core = Arc::clone(self);
        handle.spawn(async move {
            core.flush_coalesced().await;
        });
    }

    // Size/timer-triggered path: if a flush is already in-flight, leave a
    // marker; the in-flight pass drains it in a single follow-up.
    async fn flush_coalesced(&self) {
        match self.flush_gate.try_lock() {
            Ok(_guard) => loop {
                let _ = self.flush_once().await;
                if !self.follow_up.swap(false, Ordering::SeqCst) {
                    break;
                }
            },
            Err(_) => {
                self.follow_up.store(true, Ordering::SeqCst);
            }
        }
    }

    /// Deliver everything buffered, batch by batch, in enqueue order. Stops
    /// at the first final failure (the failed batch is back at the head).
    pub async fn flush(&self) -> Result<(), TransportError> {
        let _guard = self.flush_gate.lock().await;
        while !self.buffer.lock_or_panic().is_empty() {
            self.flush_once().await?;
        }
        Ok(())
    }

    async fn flush_once(&self) -> Result<(), TransportError> {
        let batch = self.buffer.lock_or_panic().drain(self.config.batch_size);
        if batch.is_empty() {
            return Ok(());
        }
        let batch_len = batch.len();
        let batch = Arc::new(batch);
        *self.in_flight.lock_or_panic() = Some(Arc::clone(&batch));
        let result = self.send_with_retry(&batch).await;
        *self.in_flight.lock_or_panic() = None;
        match result {
            Ok(()) => {
                self.sent.fetch_add(batch_len as u64, Ordering::Relaxed);
                Ok(())
            }
            Err(err) => {
                self.failed_flushes.fetch_add(1, Ordering::Relaxed);
                if err.is_retryable() && !self.is_destroyed() {
                    // Transient: requeue at the head so order is preserved
                    // for the next attempt.
                    let batch = Arc::try_unwrap(batch).unwrap_or_else(|arc| (*arc).clone());
                    let discarded = self.buffer.lock_or_panic().requeue_front(batch);
                    self.hooks.dropped(discarded);
                } else {
                    // Permanent: the batch will never go through.
                    self.dropped_external
                        .fetch_add(batch_len as u64, Ordering::Relaxed);
                    self.hooks.dropped(batch_len);
                }
                self.hooks.flush_error(&err, batch_len);
                tracing::warn!(transport = %self.name, error = %err, "batch flush failed");
                Err(err)
            }
        }
    }

    async fn send_with_retry(&self, batch: &[LogRecord]) -> Result<(), TransportError> {
        let retry = &self.config.retry;
        let mut last_err = None;
        for attempt in 0..retry.max_retries {
            match self.sender.send(batch).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    tokio::time::sleep(retry.delay_for_attempt(attempt)).await;
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| TransportError::Network("no send attempted".to_string())))
    }

    /// Stop the timer, run a final flush bounded by the shutdown deadline,
    /// and drop whatever remains. Idempotent.
    pub async fn destroy(&self) -> Result<(), TransportError> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(timer) = self.timer.lock_or_panic().take() {
            timer.token.cancel();
            timer.task.abort();
        }
        let outcome = tokio::time::timeout(self.config.shutdown_deadline, self.flush()).await;
        if !matches!(outcome, Ok(Ok(()))) {
            let mut remaining = self.buffer.lock_or_panic().clear_dropping();
            if let Some(batch) = self.in_flight.lock_or_panic().take() {
                remaining += batch.len();
                self.dropped_external
                    .fetch_add(batch.len() as u64, Ordering::Relaxed);
            }
            self.hooks.dropped(remaining);
            if remaining > 0 {
                tracing::warn!(
                    transport = %self.name,
                    dropped = remaining,
                    "records dropped at shutdown deadline"
                );
            }
        }
        Ok(())
    }

    pub fn stats(&self) -> TransportStats {
        let buffer = self.buffer.lock_or_panic().stats();
        TransportStats {
            buffered: buffer.size,
            max_buffer: buffer.max_size,
            dropped: buffer.dropped + self.dropped_external.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            failed_flushes: self.failed_flushes.load(Ordering::Relaxed),
        }
    }
}
