// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Span lifecycle and the span processor registry.
//!
//! A [`Span`] is a cheap cloneable handle; the scoped [`span`] and
//! [`span_sync`] helpers guarantee the span is ended on every exit path and
//! that trace correlation flows into the ambient context for its extent.
//! Once ended, a span is frozen: further mutation is silently discarded.

use crate::context::{self, active_span, Scoped};
use crate::correlation::{generate_span_id, generate_trace_id};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::{Arc, LazyLock, Mutex, RwLock};
use std::time::Duration;
use vestig_common::runtime::{monotonic_ms, rfc3339_now};
use vestig_common::MutexExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    Unset,
    Ok,
    Error,
}

/// A timestamped event attached to a span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEvent {
    pub name: String,
    /// RFC3339, UTC.
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub attributes: Option<Value>,
}

#[derive(Debug)]
struct SpanState {
    span_id: String,
    trace_id: String,
    parent_span_id: Option<String>,
    name: String,
    start_time: u64,
    end_time: Option<u64>,
    duration: Option<u64>,
    status: SpanStatus,
    status_message: Option<String>,
    attributes: Map<String, Value>,
    events: Vec<SpanEvent>,
    ended: bool,
}

/// Options for [`start_span`].
#[derive(Default)]
pub struct SpanOptions {
    /// Explicit parent; when absent the active span is used.
    pub parent: Option<Span>,
    /// Trace to join when there is no parent.
    pub trace_id: Option<String>,
    /// Initial attributes.
    pub attributes: Option<Map<String, Value>>,
}

/// A handle to a live or ended span.
#[derive(Debug, Clone)]
pub struct Span {
    inner: Arc<Mutex<SpanState>>,
}

impl Span {
    fn create(name: &str, opts: SpanOptions) -> Span {
        let parent = opts.parent.or_else(active_span);
        let (trace_id, parent_span_id) = match &parent {
            Some(p) => (p.trace_id(), Some(p.span_id())),
            None => (opts.trace_id.unwrap_or_else(generate_trace_id), None),
        };
        Span {
            inner: Arc::new(Mutex::new(SpanState {
                span_id: generate_span_id(),
                trace_id,
                parent_span_id,
                name: name.to_string(),
                start_time: monotonic_ms(),
                end_time: None,
                duration: None,
                status: SpanStatus::Unset,
                status_message: None,
                attributes: opts.attributes.unwrap_or_default(),
                events: Vec::new(),
                ended: false,
            })),
        }
    }

    pub fn span_id(&self) -> String {
        self.inner.lock_or_panic().span_id.clone()
    }

    pub fn trace_id(&self) -> String {
        self.inner.lock_or_panic().trace_id.clone()
    }

    pub fn parent_span_id(&self) -> Option<String> {
        self.inner.lock_or_panic().parent_span_id.clone()
    }

    pub fn name(&self) -> String {
        self.inner.lock_or_panic().name.clone()
    }

    pub fn status(&self) -> SpanStatus {
        self.inner.lock_or_panic().status
    }

    pub fn duration(&self) -> Option<u64> {
        self.inner.lock_or_panic().duration
    }

    pub fn is_ended(&self) -> bool {
        self.inner.lock_or_panic().ended
    }

    /// Set an attribute. Discarded once the span has ended.
    pub fn set_attribute(&self, key: &str, value: Value) {
        let mut state = self.inner.lock_or_panic();
        if state.ended {
            return;
        }
        state.attributes.insert(key.to_string(), value);
    }

    /// Append an event. Discarded once the span has ended.
    pub fn add_event(&self, name: &str, attributes: Option<Value>) {
        let mut state = self.inner.lock_or_panic();
        if state.ended {
            return;
        }
        state.events.push(SpanEvent {
            name: name.to_string(),
            timestamp: rfc3339_now(),
            attributes,
        });
    }

    /// Set the status. Discarded once the span has ended.
    pub fn set_status(&self, status: SpanStatus, message: Option<&str>) {
        let mut state = self.inner.lock_or_panic();
        if state.ended {
            return;
        }
        state.status = status;
        state.status_message = message.map(str::to_string);
    }

    fn set_status_if_unset(&self, status: SpanStatus) {
        let mut state = self.inner.lock_or_panic();
        if state.ended || state.status != SpanStatus::Unset {
            return;
        }
        state.status = status;
    }

    /// Immutable snapshot for export.
    pub fn data(&self) -> SpanData {
        let state = self.inner.lock_or_panic();
        SpanData {
            span_id: state.span_id.clone(),
            trace_id: state.trace_id.clone(),
            parent_span_id: state.parent_span_id.clone(),
            name: state.name.clone(),
            start_time: state.start_time,
            end_time: state.end_time,
            duration: state.duration,
            status: state.status,
            status_message: state.status_message.clone(),
            attributes: state.attributes.clone(),
            events: state.events.clone(),
        }
    }
}

/// The immutable export snapshot handed to span processors.
#[derive(Debug, Clone, Serialize)]
pub struct SpanData {
    #[serde(rename = "spanId")]
    pub span_id: String,
    #[serde(rename = "traceId")]
    pub trace_id: String,
    #[serde(rename = "parentSpanId", skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    pub name: String,
    #[serde(rename = "startTime")]
    pub start_time: u64,
    #[serde(rename = "endTime", skip_serializing_if = "Option::is_none")]
    pub end_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    pub status: SpanStatus,
    #[serde(rename = "statusMessage", skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<SpanEvent>,
}

/// Start a span and make it the active span.
///
/// Trace identity comes from the explicit parent, the active span, or a
/// fresh trace ID, in that order. Pair with [`end_span`], or use the scoped
/// [`span`]/[`span_sync`] helpers which cannot leak the active slot.
pub fn start_span(name: &str, opts: SpanOptions) -> Span {
    let span = Span::create(name, opts);
    context::push_span(&span);
    span
}

/// End a span: freeze it, pop it from the active stack if it is on top, and
/// notify registered span processors. Idempotent.
pub fn end_span(span: &Span) {
    let data = {
        let mut state = span.inner.lock_or_panic();
        if state.ended {
            return;
        }
        let end = monotonic_ms();
        state.end_time = Some(end);
        state.duration = Some(end.saturating_sub(state.start_time));
        state.ended = true;
        drop(state);
        span.data()
    };
    context::pop_span(span);
    notify_span_end(&data);
}

/// Run an async operation inside a span.
///
/// The span is active for every poll of the future, the status is set from
/// the outcome (`ok` on success, `error` with the failure's message
/// otherwise), the span is ended on every exit path, and the original
/// failure is returned unchanged.
pub async fn span<T, E, F, Fut>(name: &str, f: F) -> Result<T, E>
where
    F: FnOnce(Span) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let s = Span::create(name, SpanOptions::default());
    let _end = EndOnDrop(s.clone());
    let result = Scoped::for_span(s.clone(), f(s.clone())).await;
    match &result {
        Ok(_) => s.set_status_if_unset(SpanStatus::Ok),
        Err(e) => s.set_status(SpanStatus::Error, Some(&e.to_string())),
    }
    result
}

/// Synchronous counterpart of [`span`].
pub fn span_sync<T, E, F>(name: &str, f: F) -> Result<T, E>
where
    F: FnOnce(Span) -> Result<T, E>,
    E: std::fmt::Display,
{
    let s = Span::create(name, SpanOptions::default());
    let _end = EndOnDrop(s.clone());
    let _scope = context::enter_span(&s);
    let result = f(s.clone());
    match &result {
        Ok(_) => s.set_status_if_unset(SpanStatus::Ok),
        Err(e) => s.set_status(SpanStatus::Error, Some(&e.to_string())),
    }
    result
}

// Ends the span when the owning helper unwinds or completes.
struct EndOnDrop(Span);

impl Drop for EndOnDrop {
    fn drop(&mut self) {
        end_span(&self.0);
    }
}

/// Re-export of the propagator accessor, for symmetry with [`start_span`].
pub fn get_active_span() -> Option<Span> {
    active_span()
}

/// A consumer of finished spans (batching exporter, sampling filter, the
/// OTLP exporter).
#[async_trait]
pub trait SpanProcessor: Send + Sync {
    /// Called once per span, after it has been frozen.
    fn on_span_end(&self, span: &SpanData);

    /// Flush any pending work. Called during engine shutdown.
    async fn shutdown(&self);
}

static PROCESSORS: LazyLock<RwLock<Vec<Arc<dyn SpanProcessor>>>> =
    LazyLock::new(|| RwLock::new(Vec::new()));

/// Register a processor. Processors are invoked in registration order.
pub fn register_span_processor(processor: Arc<dyn SpanProcessor>) {
    if let Ok(mut processors) = PROCESSORS.write() {
        processors.push(processor);
    }
}

/// Remove every registered processor. Intended for process teardown and
/// tests.
pub fn clear_span_processors() {
    if let Ok(mut processors) = PROCESSORS.write() {
        processors.clear();
    }
}

fn notify_span_end(data: &SpanData) {
    // Snapshot under the read lock; process outside it.
    let processors: Vec<_> = match PROCESSORS.read() {
        Ok(p) => p.clone(),
        Err(_) => return,
    };
    for processor in processors {
        processor.on_span_end(data);
    }
}

/// Shut down every registered processor, bounded by `deadline` overall.
/// Processors that do not finish in time are abandoned.
pub async fn shutdown_span_processors(deadline: Duration) {
    let processors: Vec<_> = match PROCESSORS.read() {
        Ok(p) => p.clone(),
        Err(_) => return,
    };
    let all = async {
        for processor in processors {
            processor.shutdown().await;
        }
    };
    if tokio::time::timeout(deadline, all).await.is_err() {
        tracing::warn!("span processor shutdown exceeded deadline");
    }
    clear_span_processors();
}
