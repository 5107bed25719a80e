// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Request-scoped ambient context.
//!
//! Two pieces of ambient state ride along with the current logical task: the
//! [`LogContext`] visible to every emission, and the active-span stack.
//! Scopes nest save-restore in LIFO order and are restored on every exit
//! path, panics included, via drop guards.
//!
//! The store is per OS thread. Synchronous code and single-threaded hosts
//! get full fidelity; futures that may migrate between worker threads must
//! be wrapped with [`with_context_async`] (or the span helpers), which
//! re-enter the scope on every poll.

use crate::correlation::{generate_request_id, generate_trace_id};
use crate::span::Span;
use crate::wide::WideEventBuilder;
use pin_project::pin_project;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

/// Correlation context attached to every record emitted in its scope.
///
/// Snapshot-valued: once captured into a record it is never mutated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogContext {
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(rename = "traceId", skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(rename = "spanId", skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    #[serde(rename = "parentSpanId", skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    #[serde(rename = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Free-form entries beyond the recognized keys.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl LogContext {
    pub fn is_empty(&self) -> bool {
        self.request_id.is_none()
            && self.trace_id.is_none()
            && self.span_id.is_none()
            && self.parent_span_id.is_none()
            && self.user_id.is_none()
            && self.session_id.is_none()
            && self.extra.is_empty()
    }

    /// A copy of `self` with `overlay`'s populated fields winning.
    pub fn merged(&self, overlay: &LogContext) -> LogContext {
        let mut out = self.clone();
        macro_rules! take {
            ($field:ident) => {
                if overlay.$field.is_some() {
                    out.$field = overlay.$field.clone();
                }
            };
        }
        take!(request_id);
        take!(trace_id);
        take!(span_id);
        take!(parent_span_id);
        take!(user_id);
        take!(session_id);
        for (k, v) in &overlay.extra {
            out.extra.insert(k.clone(), v.clone());
        }
        out
    }

    /// A copy with trace correlation pointing at the given span.
    pub fn with_span(&self, trace_id: &str, span_id: &str) -> LogContext {
        let mut out = self.clone();
        out.trace_id = Some(trace_id.to_string());
        out.span_id = Some(span_id.to_string());
        out
    }
}

/// Build a correlation context, generating a request ID and trace ID for
/// any the partial input does not provide.
pub fn create_correlation_context(partial: Option<LogContext>) -> LogContext {
    let mut ctx = partial.unwrap_or_default();
    if ctx.request_id.is_none() {
        ctx.request_id = Some(generate_request_id());
    }
    if ctx.trace_id.is_none() {
        ctx.trace_id = Some(generate_trace_id());
    }
    ctx
}

#[derive(Default)]
struct Ambient {
    context_stack: Vec<LogContext>,
    span_stack: Vec<Span>,
    wide_stack: Vec<WideEventBuilder>,
}

thread_local! {
    static AMBIENT: RefCell<Ambient> = RefCell::new(Ambient::default());
}

/// Snapshot of the current ambient context, or the empty context outside of
/// any scope.
pub fn get_context() -> LogContext {
    AMBIENT.with(|a| {
        a.borrow()
            .context_stack
            .last()
            .cloned()
            .unwrap_or_default()
    })
}

/// The innermost active span, if any.
pub fn active_span() -> Option<Span> {
    AMBIENT.with(|a| a.borrow().span_stack.last().cloned())
}

/// The innermost ambient wide event builder, if any.
pub fn active_wide_event() -> Option<WideEventBuilder> {
    AMBIENT.with(|a| a.borrow().wide_stack.last().cloned())
}

// A scope guard popping exactly what its constructor pushed. A span frame
// only pops while its span is still on top, because `end_span` may have
// popped it already.
pub(crate) enum ScopeGuard {
    Context,
    SpanFrame { span_id: String },
    Wide,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        AMBIENT.with(|a| {
            let mut a = a.borrow_mut();
            match self {
                ScopeGuard::Context => {
                    a.context_stack.pop();
                }
                ScopeGuard::SpanFrame { span_id } => {
                    let on_top = a
                        .span_stack
                        .last()
                        .is_some_and(|top| top.span_id() == *span_id);
                    if on_top {
                        a.span_stack.pop();
                        a.context_stack.pop();
                    }
                }
                ScopeGuard::Wide => {
                    a.wide_stack.pop();
                }
            }
        });
    }
}

pub(crate) fn enter_context(ctx: LogContext) -> ScopeGuard {
    AMBIENT.with(|a| a.borrow_mut().context_stack.push(ctx));
    ScopeGuard::Context
}

/// Push a span and overlay its trace correlation onto the context for the
/// span's extent.
pub(crate) fn enter_span(span: &Span) -> ScopeGuard {
    AMBIENT.with(|a| {
        let mut a = a.borrow_mut();
        let overlaid = a
            .context_stack
            .last()
            .cloned()
            .unwrap_or_default()
            .with_span(&span.trace_id(), &span.span_id());
        a.context_stack.push(overlaid);
        a.span_stack.push(span.clone());
    });
    ScopeGuard::SpanFrame {
        span_id: span.span_id(),
    }
}

pub(crate) fn enter_wide_event(builder: &WideEventBuilder) -> ScopeGuard {
    AMBIENT.with(|a| a.borrow_mut().wide_stack.push(builder.clone()));
    ScopeGuard::Wide
}

/// Make a span the innermost active span without a guard.
///
/// Prefer the scoped [`crate::span`]/[`crate::span_sync`] helpers; this
/// low-level pair exists for callers that manage span extents by hand.
pub fn push_span(span: &Span) {
    std::mem::forget(enter_span(span));
}

/// Pop the given span if it is the innermost active span. Returns whether a
/// pop happened.
pub fn pop_span(span: &Span) -> bool {
    AMBIENT.with(|a| {
        let mut a = a.borrow_mut();
        let on_top = a
            .span_stack
            .last()
            .is_some_and(|top| top.span_id() == span.span_id());
        if on_top {
            a.span_stack.pop();
            a.context_stack.pop();
        }
        on_top
    })
}

/// Run `f` with `ctx` as the ambient context, restoring the previous
/// context on every exit path.
pub fn with_context<T>(ctx: LogContext, f: impl FnOnce() -> T) -> T {
    let _guard = enter_context(ctx);
    f()
}

/// Wrap a future so that `ctx` is the ambient context during every poll.
pub fn with_context_async<F: Future>(ctx: LogContext, fut: F) -> Scoped<F> {
    Scoped {
        inner: fut,
        context: Some(ctx),
        span: None,
        wide: None,
    }
}

/// Run `f` with `builder` as the ambient wide event.
pub fn with_wide_event<T>(builder: &WideEventBuilder, f: impl FnOnce() -> T) -> T {
    let _guard = enter_wide_event(builder);
    f()
}

/// Wrap a future so that `builder` is the ambient wide event during every
/// poll.
pub fn with_wide_event_async<F: Future>(builder: &WideEventBuilder, fut: F) -> Scoped<F> {
    Scoped {
        inner: fut,
        context: None,
        span: None,
        wide: Some(builder.clone()),
    }
}

/// A future that re-enters an ambient scope on each poll and restores the
/// previous scope when the poll returns, so the wrapped work observes the
/// intended context across suspension points and worker threads.
#[pin_project]
pub struct Scoped<F> {
    #[pin]
    inner: F,
    context: Option<LogContext>,
    span: Option<Span>,
    wide: Option<WideEventBuilder>,
}

impl<F> Scoped<F> {
    pub(crate) fn for_span(span: Span, inner: F) -> Self {
        Scoped {
            inner,
            context: None,
            span: Some(span),
            wide: None,
        }
    }
}

impl<F: Future> Future for Scoped<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let _ctx_guard = this.context.as_ref().map(|c| enter_context(c.clone()));
        let _span_guard = this.span.as_ref().map(enter_span);
        let _wide_guard = this.wide.as_ref().map(enter_wide_event);
        this.inner.poll(cx)
    }
}
