// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wide events: one accumulating event per request, emitted once.
//!
//! A [`WideEventBuilder`] collects categorized fields across a request's
//! lifetime. `end()` freezes it exactly once; the tail sampler then decides
//! — with full knowledge of status, latency and VIP signals — whether the
//! finished event is worth keeping. Errors and slow requests always survive;
//! routine successes can be downsampled without losing anything that matters.

use crate::context::{get_context, LogContext};
use crate::level::LogLevel;
use crate::logger::Logger;
use crate::record::SerializedError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};
use vestig_common::runtime::{monotonic_ms, rfc3339_now, runtime};
use vestig_common::MutexExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WideEventStatus {
    Success,
    Error,
    Timeout,
    Cancelled,
}

/// Tail sampling decision inputs, evaluated when the event ends.
#[derive(Debug, Clone)]
pub struct TailSamplerConfig {
    /// Statuses that are always kept.
    pub always_keep_statuses: Vec<WideEventStatus>,
    /// Keep any event at least this slow.
    pub slow_threshold_ms: Option<u64>,
    /// Dotted path into the event's fields holding the subscription tier.
    pub tier_field_path: String,
    /// Tier values that are always kept.
    pub vip_tiers: Vec<String>,
    /// User IDs that are always kept.
    pub vip_user_ids: Vec<String>,
    /// Keep probability for everything else.
    pub success_sample_rate: f64,
}

impl Default for TailSamplerConfig {
    fn default() -> Self {
        Self {
            always_keep_statuses: vec![
                WideEventStatus::Error,
                WideEventStatus::Timeout,
                WideEventStatus::Cancelled,
            ],
            slow_threshold_ms: None,
            tier_field_path: "user.subscription".to_string(),
            vip_tiers: Vec::new(),
            vip_user_ids: Vec::new(),
            success_sample_rate: 1.0,
        }
    }
}

/// The tail decision function.
pub struct TailSampler {
    config: TailSamplerConfig,
}

impl TailSampler {
    pub fn new(config: TailSamplerConfig) -> Self {
        Self { config }
    }

    pub fn should_keep(&self, event: &WideEvent) -> bool {
        if self.config.always_keep_statuses.contains(&event.status) {
            return true;
        }
        if let Some(threshold) = self.config.slow_threshold_ms {
            if event.duration_ms >= threshold {
                return true;
            }
        }
        if !self.config.vip_tiers.is_empty() {
            if let Some(tier) = field_at_path(&event.fields, &self.config.tier_field_path) {
                if self.config.vip_tiers.iter().any(|t| t == tier) {
                    return true;
                }
            }
        }
        if let Some(user_id) = &event.context.user_id {
            if self.config.vip_user_ids.iter().any(|u| u == user_id) {
                return true;
            }
        }
        let rate = self.config.success_sample_rate;
        if rate >= 1.0 {
            return true;
        }
        if rate <= 0.0 {
            return false;
        }
        rand::thread_rng().gen::<f64>() < rate
    }
}

fn field_at_path<'a>(fields: &'a Value, path: &str) -> Option<&'a str> {
    let mut cursor = fields;
    for segment in path.split('.') {
        cursor = cursor.as_object()?.get(segment)?;
    }
    cursor.as_str()
}

/// The immutable, emitted shape of a finished wide event.
#[derive(Debug, Clone, Serialize)]
pub struct WideEvent {
    pub event_type: String,
    pub started_at: String,
    pub ended_at: String,
    pub duration_ms: u64,
    pub status: WideEventStatus,
    #[serde(skip_serializing_if = "LogContext::is_empty")]
    pub context: LogContext,
    pub runtime: String,
    pub fields: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SerializedError>,
    pub level: LogLevel,
}

/// Configuration for [`create_wide_event`].
#[derive(Debug, Clone, Default)]
pub struct WideEventConfig {
    pub event_type: String,
    pub tail: TailSamplerConfig,
}

impl WideEventConfig {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            tail: TailSamplerConfig::default(),
        }
    }

    pub fn tail(mut self, tail: TailSamplerConfig) -> Self {
        self.tail = tail;
        self
    }
}

/// Options for ending a wide event.
#[derive(Debug, Default)]
pub struct WideEventEndOptions {
    /// Explicit final status; inferred from the error otherwise.
    pub status: Option<WideEventStatus>,
    pub error: Option<SerializedError>,
}

struct WideState {
    event_type: String,
    tail: TailSamplerConfig,
    started_at: String,
    start_monotonic: u64,
    context: LogContext,
    fields: Map<String, Value>,
    ended: bool,
}

/// Accumulator for one request's wide event. Cheap cloneable handle; every
/// clone observes the same state.
#[derive(Clone)]
pub struct WideEventBuilder {
    inner: Arc<Mutex<WideState>>,
}

/// Start accumulating a wide event. The ambient context is captured as the
/// event's initial context.
pub fn create_wide_event(config: WideEventConfig) -> WideEventBuilder {
    WideEventBuilder {
        inner: Arc::new(Mutex::new(WideState {
            event_type: config.event_type,
            tail: config.tail,
            started_at: rfc3339_now(),
            start_monotonic: monotonic_ms(),
            context: get_context(),
            fields: Map::new(),
            ended: false,
        })),
    }
}

impl WideEventBuilder {
    /// Set one field under a category. Ignored once ended.
    pub fn set(&self, category: &str, key: &str, value: Value) -> &Self {
        let mut state = self.inner.lock_or_panic();
        if !state.ended {
            let slot = state
                .fields
                .entry(category.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Some(map) = slot.as_object_mut() {
                map.insert(key.to_string(), value);
            }
        }
        self
    }

    /// Merge a set of fields into one category. Ignored once ended.
    pub fn merge(&self, category: &str, fields: Map<String, Value>) -> &Self {
        let mut state = self.inner.lock_or_panic();
        if !state.ended {
            let slot = state
                .fields
                .entry(category.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Some(existing) = slot.as_object_mut() {
                existing.extend(fields);
            }
        }
        self
    }

    /// Merge categorized fields wholesale. Ignored once ended.
    pub fn merge_all(&self, fields: Map<String, Value>) -> &Self {
        for (category, value) in fields {
            match value {
                Value::Object(map) => {
                    self.merge(&category, map);
                }
                other => {
                    let mut state = self.inner.lock_or_panic();
                    if !state.ended {
                        state.fields.insert(category, other);
                    }
                }
            }
        }
        self
    }

    /// Replace the event's context. Ignored once ended.
    pub fn set_context(&self, context: LogContext) -> &Self {
        let mut state = self.inner.lock_or_panic();
        if !state.ended {
            state.context = context;
        }
        self
    }

    pub fn get_context(&self) -> LogContext {
        self.inner.lock_or_panic().context.clone()
    }

    pub fn get_fields(&self) -> Value {
        Value::Object(self.inner.lock_or_panic().fields.clone())
    }

    pub fn is_ended(&self) -> bool {
        self.inner.lock_or_panic().ended
    }

    /// Freeze the builder and produce the event. The first call wins;
    /// subsequent calls return `None`.
    pub fn end(&self, opts: WideEventEndOptions) -> Option<WideEvent> {
        let mut state = self.inner.lock_or_panic();
        if state.ended {
            return None;
        }
        state.ended = true;

        let status = opts.status.unwrap_or(if opts.error.is_some() {
            WideEventStatus::Error
        } else {
            WideEventStatus::Success
        });
        let level = if status == WideEventStatus::Error {
            LogLevel::Error
        } else {
            LogLevel::Info
        };
        Some(WideEvent {
            event_type: state.event_type.clone(),
            started_at: state.started_at.clone(),
            ended_at: rfc3339_now(),
            duration_ms: monotonic_ms().saturating_sub(state.start_monotonic),
            status,
            context: state.context.clone(),
            runtime: runtime().kind.tag().to_string(),
            fields: Value::Object(state.fields.clone()),
            error: opts.error,
            level,
        })
    }

    /// End the event, apply the tail sampling decision, and emit kept events
    /// through `logger`.
    ///
    /// Returns the event when it was kept and emitted. Never propagates a
    /// failure to the request handler: emission problems go to the internal
    /// fallback.
    pub fn emit(&self, logger: &Logger, opts: WideEventEndOptions) -> Option<WideEvent> {
        let tail = TailSampler::new(self.inner.lock_or_panic().tail.clone());
        let event = self.end(opts)?;
        if !tail.should_keep(&event) {
            return None;
        }
        match serde_json::to_value(&event) {
            Ok(body) => {
                let message = event.event_type.clone();
                logger.log(event.level, &message, Some(body));
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize wide event");
            }
        }
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn finished(status: WideEventStatus, duration_ms: u64) -> WideEvent {
        WideEvent {
            event_type: "http_request".into(),
            started_at: rfc3339_now(),
            ended_at: rfc3339_now(),
            duration_ms,
            status,
            context: LogContext::default(),
            runtime: "server".into(),
            fields: json!({}),
            error: None,
            level: LogLevel::Info,
        }
    }

    #[test]
    fn builder_accumulates_categorized_fields() {
        let builder = create_wide_event(WideEventConfig::new("http_request"));
        builder
            .set("http", "method", json!("POST"))
            .set("http", "status", json!(201))
            .merge(
                "user",
                json!({"subscription": "pro"}).as_object().unwrap().clone(),
            );
        let fields = builder.get_fields();
        assert_eq!(fields["http"]["method"], json!("POST"));
        assert_eq!(fields["http"]["status"], json!(201));
        assert_eq!(fields["user"]["subscription"], json!("pro"));
    }

    #[test]
    fn merge_all_handles_categories() {
        let builder = create_wide_event(WideEventConfig::new("job"));
        builder.set("db", "queries", json!(3));
        builder.merge_all(
            json!({"db": {"rows": 42}, "cache": {"hits": 7}})
                .as_object()
                .unwrap()
                .clone(),
        );
        let fields = builder.get_fields();
        assert_eq!(fields["db"]["queries"], json!(3));
        assert_eq!(fields["db"]["rows"], json!(42));
        assert_eq!(fields["cache"]["hits"], json!(7));
    }

    #[test]
    fn end_transitions_once_and_freezes() {
        let builder = create_wide_event(WideEventConfig::new("http_request"));
        builder.set("http", "method", json!("GET"));
        let event = builder.end(WideEventEndOptions::default()).unwrap();
        assert_eq!(event.status, WideEventStatus::Success);
        assert_eq!(event.level, LogLevel::Info);
        assert_eq!(event.fields["http"]["method"], json!("GET"));

        // Frozen: mutation is ignored, a second end yields nothing.
        builder.set("http", "late", json!(true));
        assert!(builder.end(WideEventEndOptions::default()).is_none());
        assert_eq!(builder.get_fields()["http"].get("late"), None);
    }

    #[test]
    fn status_inferred_from_error() {
        let builder = create_wide_event(WideEventConfig::new("http_request"));
        let event = builder
            .end(WideEventEndOptions {
                status: None,
                error: Some(SerializedError::new("Error", "upstream failed")),
            })
            .unwrap();
        assert_eq!(event.status, WideEventStatus::Error);
        assert_eq!(event.level, LogLevel::Error);
        assert_eq!(event.error.unwrap().message, "upstream failed");
    }

    #[test]
    fn tail_always_keeps_error_statuses() {
        let sampler = TailSampler::new(TailSamplerConfig {
            success_sample_rate: 0.0,
            ..Default::default()
        });
        assert!(sampler.should_keep(&finished(WideEventStatus::Error, 50)));
        assert!(sampler.should_keep(&finished(WideEventStatus::Timeout, 50)));
        assert!(!sampler.should_keep(&finished(WideEventStatus::Success, 50)));
    }

    #[test]
    fn tail_keeps_slow_requests() {
        let sampler = TailSampler::new(TailSamplerConfig {
            slow_threshold_ms: Some(1_000),
            success_sample_rate: 0.0,
            ..Default::default()
        });
        assert!(sampler.should_keep(&finished(WideEventStatus::Success, 1_500)));
        assert!(!sampler.should_keep(&finished(WideEventStatus::Success, 200)));
    }

    #[test]
    fn tail_keeps_vip_tiers() {
        let sampler = TailSampler::new(TailSamplerConfig {
            vip_tiers: vec!["enterprise".to_string()],
            success_sample_rate: 0.0,
            ..Default::default()
        });
        let mut event = finished(WideEventStatus::Success, 10);
        event.fields = json!({"user": {"subscription": "enterprise"}});
        assert!(sampler.should_keep(&event));
        event.fields = json!({"user": {"subscription": "free"}});
        assert!(!sampler.should_keep(&event));
    }

    #[test]
    fn tail_keeps_vip_users() {
        let sampler = TailSampler::new(TailSamplerConfig {
            vip_user_ids: vec!["user-1".to_string()],
            success_sample_rate: 0.0,
            ..Default::default()
        });
        let mut event = finished(WideEventStatus::Success, 10);
        event.context.user_id = Some("user-1".to_string());
        assert!(sampler.should_keep(&event));
        event.context.user_id = Some("user-2".to_string());
        assert!(!sampler.should_keep(&event));
    }

    #[test]
    fn tail_default_keeps_successes() {
        let sampler = TailSampler::new(TailSamplerConfig::default());
        assert!(sampler.should_keep(&finished(WideEventStatus::Success, 5)));
    }

    #[test]
    fn ambient_wide_event_scoping() {
        use crate::context::{active_wide_event, with_wide_event};
        let builder = create_wide_event(WideEventConfig::new("req"));
        assert!(active_wide_event().is_none());
        with_wide_event(&builder, || {
            active_wide_event()
                .unwrap()
                .set("http", "method", json!("GET"));
        });
        assert!(active_wide_event().is_none());
        assert_eq!(builder.get_fields()["http"]["method"], json!("GET"));
    }

    #[test]
    fn event_wire_shape() {
        let mut event = finished(WideEventStatus::Success, 12);
        event.fields = json!({"http": {"status": 200}});
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event_type"], json!("http_request"));
        assert_eq!(value["duration_ms"], json!(12));
        assert_eq!(value["status"], json!("success"));
        assert_eq!(value["fields"]["http"]["status"], json!(200));
        assert!(value.get("error").is_none());
    }
}
