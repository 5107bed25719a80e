// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Structured logging and tracing for server and edge environments.
//!
//! Records are enriched with correlation context, sanitized, sampled, and
//! delivered to one or more transports with batching, retry and a bounded
//! shutdown flush. Emission calls never block and never fail.
//!
//! ```
//! use serde_json::json;
//! use vestig::{create_logger, LogLevel, LoggerConfig};
//!
//! let log = create_logger(
//!     LoggerConfig::new().level(LogLevel::Debug).namespace("api"),
//! )
//! .unwrap();
//! // `password` is redacted, the email is masked, before any transport
//! // sees the record.
//! log.info(
//!     "user logged in",
//!     Some(json!({"email": "user@example.com", "password": "hunter2"})),
//! );
//! ```
//!
//! Spans correlate everything logged in their extent:
//!
//! ```
//! use vestig::span_sync;
//!
//! let result: Result<u32, String> = span_sync("checkout", |span| {
//!     span.set_attribute("cart_items", serde_json::json!(3));
//!     Ok(42)
//! });
//! assert_eq!(result.unwrap(), 42);
//! ```

pub mod config;
pub mod context;
pub mod correlation;
pub mod error;
pub mod level;
pub mod logger;
pub mod record;
pub mod sample;
pub mod sanitize;
pub mod span;
pub mod transport;
pub mod wide;

pub use vestig_common::buffer::{BufferStats, CircularBuffer};
pub use vestig_common::runtime::{
    is_edge, is_server, now_unix_ms, runtime, Capabilities, RuntimeInfo, RuntimeKind,
};

pub use config::{from_env, is_production, EnvConfig, OtlpConfig};
pub use context::{
    active_wide_event, create_correlation_context, get_context, pop_span, push_span,
    with_context, with_context_async, with_wide_event, with_wide_event_async, LogContext, Scoped,
};
pub use correlation::{
    create_traceparent, create_tracestate, delete_tracestate_key, generate_request_id,
    generate_span_id, generate_trace_id, get_tracestate_value, parse_traceparent,
    parse_tracestate, set_tracestate_value, Traceparent, TracestateEntry,
    TRACESTATE_MAX_ENTRIES,
};
pub use error::{ConfigError, TransportError};
pub use level::LogLevel;
pub use logger::{create_logger, ChildOverrides, Logger, LoggerConfig};
pub use record::{LogRecord, SerializedError};
pub use sample::{
    create_composite_sampler, create_namespace_sampler, create_probability_sampler,
    create_rate_limit_sampler, create_sampler_from_config, CompositeSampler, NamespaceRule,
    NamespaceRuleConfig, NamespaceSampler, ProbabilitySampler, RateLimitSampler, Sampler,
    SamplerConfig, SamplerSpec, SamplingPolicy,
};
pub use sanitize::{SanitizeConfig, SanitizePreset, Sanitizer};
pub use span::{
    clear_span_processors, end_span, get_active_span, register_span_processor,
    shutdown_span_processors, span, span_sync, start_span, Span, SpanData, SpanEvent,
    SpanOptions, SpanProcessor, SpanStatus,
};
pub use transport::{
    flush_all, register_transport, shutdown_all, BatchConfig, BatchCore, BatchHooks, BatchSender,
    ConsoleConfig, ConsoleTransport, DatadogConfig, DatadogTransport, FileStore, FileTransport,
    FileTransportConfig, HttpTransport, HttpTransportConfig, KeyValueStore, MemoryStore,
    OfflineQueue, OfflineQueueConfig, RecordFilter, RetryConfig, SentryConfig, SentryTransport,
    StdTarget, Transport, TransportConfig, TransportStats, DEFAULT_OFFLINE_KEY,
};
pub use wide::{
    create_wide_event, TailSampler, TailSamplerConfig, WideEvent, WideEventBuilder,
    WideEventConfig, WideEventEndOptions, WideEventStatus,
};
