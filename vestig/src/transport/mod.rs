// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The transport framework: trait-shaped sinks with batching, bounded
//! buffering, retry and coordinated shutdown.
//!
//! Transport failures never reach an emitting caller. They are retried,
//! counted, surfaced through hooks, and logged to the internal fallback.

mod batch;
mod console;
mod datadog;
mod file;
mod http;
mod offline;
mod retry;
mod sentry;

pub use batch::{BatchConfig, BatchCore, BatchHooks, BatchSender, DropHook, FlushErrorHook};
pub use console::{ConsoleConfig, ConsoleTransport, StdTarget};
pub use datadog::{DatadogConfig, DatadogTransport};
pub use file::{FileTransport, FileTransportConfig};
pub use http::{HttpTransport, HttpTransportConfig};
pub use offline::{
    FileStore, KeyValueStore, MemoryStore, OfflineQueue, OfflineQueueConfig, DEFAULT_OFFLINE_KEY,
};
pub use retry::RetryConfig;
pub use sentry::{SentryConfig, SentryTransport};

use crate::error::TransportError;
use crate::level::LogLevel;
use crate::record::LogRecord;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, LazyLock, Mutex, Weak};
use std::time::Duration;
use vestig_common::MutexExt;

/// Per-record gating predicate.
pub type RecordFilter = Arc<dyn Fn(&LogRecord) -> bool + Send + Sync>;

/// Settings every transport carries, checked by the dispatcher before a
/// record is handed over.
#[derive(Clone, Default)]
pub struct TransportConfig {
    disabled: bool,
    min_level: Option<LogLevel>,
    filter: Option<RecordFilter>,
}

impl TransportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.disabled = !enabled;
        self
    }

    /// Only records at or above this level are handed to the transport.
    pub fn min_level(mut self, level: LogLevel) -> Self {
        self.min_level = Some(level);
        self
    }

    pub fn filter(mut self, filter: RecordFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn is_enabled(&self) -> bool {
        !self.disabled
    }

    /// The dispatcher gate: enabled, level reached, filter passed.
    pub fn accepts(&self, record: &LogRecord) -> bool {
        if self.disabled {
            return false;
        }
        if let Some(min) = self.min_level {
            if record.level < min {
                return false;
            }
        }
        match &self.filter {
            Some(filter) => filter(record),
            None => true,
        }
    }
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConfig")
            .field("enabled", &!self.disabled)
            .field("min_level", &self.min_level)
            .field("filter", &self.filter.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// Counters exposed by every transport.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TransportStats {
    /// Records currently staged in the internal buffer.
    pub buffered: usize,
    pub max_buffer: usize,
    /// Records lost to overflow, shutdown deadline or permanent failure.
    pub dropped: u64,
    /// Records delivered.
    pub sent: u64,
    /// Flush cycles that ended in a final failure.
    pub failed_flushes: u64,
}

/// A sink for log records.
///
/// `log` is a synchronous, non-blocking enqueue. `destroy` is idempotent;
/// after it resolves, further `log` calls are no-ops.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    fn config(&self) -> &TransportConfig;

    /// Accept a record. Must never block or fail.
    fn log(&self, record: LogRecord);

    /// Start background machinery (flush timers). Requires a tokio runtime.
    async fn init(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Deliver everything currently buffered.
    async fn flush(&self) -> Result<(), TransportError>;

    /// Stop timers, attempt a bounded final flush, and drop the rest.
    async fn destroy(&self) -> Result<(), TransportError>;

    fn stats(&self) -> TransportStats {
        TransportStats::default()
    }
}

// Process-wide registry of live transports, for the shutdown flush. Holds
// weak references so it never extends a transport's lifetime.
static REGISTRY: LazyLock<Mutex<Vec<Weak<dyn Transport>>>> = LazyLock::new(|| Mutex::new(Vec::new()));

/// Track a transport for [`flush_all`]/[`shutdown_all`].
pub fn register_transport(transport: &Arc<dyn Transport>) {
    let mut registry = REGISTRY.lock_or_panic();
    registry.retain(|t| t.strong_count() > 0);
    registry.push(Arc::downgrade(transport));
}

fn live_transports() -> Vec<Arc<dyn Transport>> {
    REGISTRY
        .lock_or_panic()
        .iter()
        .filter_map(Weak::upgrade)
        .collect()
}

/// Flush every registered transport. Individual failures are logged to the
/// fallback and do not stop the sweep.
pub async fn flush_all() {
    for transport in live_transports() {
        if let Err(e) = transport.flush().await {
            tracing::warn!(transport = transport.name(), error = %e, "flush failed");
        }
    }
}

/// Destroy every registered transport, bounded by `deadline` overall.
pub async fn shutdown_all(deadline: Duration) {
    let sweep = async {
        for transport in live_transports() {
            if let Err(e) = transport.destroy().await {
                tracing::warn!(transport = transport.name(), error = %e, "destroy failed");
            }
        }
    };
    if tokio::time::timeout(deadline, sweep).await.is_err() {
        tracing::warn!("transport shutdown exceeded deadline");
    }
    REGISTRY.lock_or_panic().clear();
}
