// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sentry store sink: one event per record over the shared batch machinery.

use super::batch::{BatchConfig, BatchCore, BatchHooks, BatchSender};
use crate::error::{ConfigError, TransportError};
use crate::level::LogLevel;
use crate::record::LogRecord;
use crate::transport::{Transport, TransportConfig, TransportStats};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const SENTRY_CLIENT: &str = concat!("vestig/", env!("CARGO_PKG_VERSION"));

/// Settings for [`SentryTransport`].
#[derive(Clone)]
pub struct SentryConfig {
    /// `scheme://public_key@host/project_id`
    pub dsn: String,
    pub environment: Option<String>,
    pub release: Option<String>,
    pub server_name: Option<String>,
    pub timeout: Option<Duration>,
    pub batch: Option<BatchConfig>,
    pub transport: TransportConfig,
    pub hooks: BatchHooks,
}

impl SentryConfig {
    pub fn new(dsn: impl Into<String>) -> Self {
        Self {
            dsn: dsn.into(),
            environment: None,
            release: None,
            server_name: None,
            timeout: None,
            batch: None,
            transport: TransportConfig::default(),
            hooks: BatchHooks::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Dsn {
    scheme: String,
    public_key: String,
    host: String,
    project_id: String,
}

impl Dsn {
    fn store_url(&self) -> String {
        format!(
            "{}://{}/api/{}/store/",
            self.scheme, self.host, self.project_id
        )
    }

    fn auth_header(&self) -> String {
        format!(
            "Sentry sentry_version=7, sentry_key={}, sentry_client={}",
            self.public_key, SENTRY_CLIENT
        )
    }
}

fn parse_dsn(dsn: &str) -> Result<Dsn, ConfigError> {
    static RE: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::unwrap_used)]
    let re = RE.get_or_init(|| {
        Regex::new(r"^(https?)://([A-Za-z0-9]+)@([A-Za-z0-9.:\-]+)/(\d+)$").unwrap()
    });
    let caps = re
        .captures(dsn.trim())
        .ok_or_else(|| ConfigError::InvalidDsn(dsn.to_string()))?;
    Ok(Dsn {
        scheme: caps[1].to_string(),
        public_key: caps[2].to_string(),
        host: caps[3].to_string(),
        project_id: caps[4].to_string(),
    })
}

fn sentry_level(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Trace | LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warning",
        LogLevel::Error => "error",
    }
}

/// Parse a captured stack string into Sentry frames, innermost frame last.
///
/// Accepts the common `at function (file:line:col)` and `at file:line:col`
/// shapes; unrecognized lines are skipped.
fn parse_stack_frames(stack: &str) -> Vec<Value> {
    static WITH_FN: OnceLock<Regex> = OnceLock::new();
    static BARE: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::unwrap_used)]
    let with_fn =
        WITH_FN.get_or_init(|| Regex::new(r"^\s*at\s+(.+?)\s+\((.+?):(\d+):(\d+)\)\s*$").unwrap());
    #[allow(clippy::unwrap_used)]
    let bare = BARE.get_or_init(|| Regex::new(r"^\s*at\s+(.+?):(\d+):(\d+)\s*$").unwrap());

    let mut frames: Vec<Value> = stack
        .lines()
        .filter_map(|line| {
            if let Some(caps) = with_fn.captures(line) {
                Some(json!({
                    "function": &caps[1],
                    "filename": &caps[2],
                    "lineno": caps[3].parse::<u64>().ok(),
                    "colno": caps[4].parse::<u64>().ok(),
                }))
            } else {
                bare.captures(line).map(|caps| {
                    json!({
                        "function": "<anonymous>",
                        "filename": &caps[1],
                        "lineno": caps[2].parse::<u64>().ok(),
                        "colno": caps[3].parse::<u64>().ok(),
                    })
                })
            }
        })
        .collect();
    // Stack strings list the innermost call first; Sentry wants it last.
    frames.reverse();
    frames
}

struct SentrySender {
    client: reqwest::Client,
    url: reqwest::Url,
    auth: String,
    environment: Option<String>,
    release: Option<String>,
    server_name: Option<String>,
}

impl SentrySender {
    fn event(&self, record: &LogRecord) -> Value {
        let mut tags = Map::new();
        tags.insert("runtime".to_string(), json!(record.runtime));
        if let Some(namespace) = &record.namespace {
            tags.insert("namespace".to_string(), json!(namespace));
        }

        let mut event = json!({
            "event_id": uuid::Uuid::new_v4().simple().to_string(),
            "timestamp": record.timestamp,
            "level": sentry_level(record.level),
            "platform": "native",
            "logger": record.namespace.as_deref().unwrap_or("vestig"),
            "message": {"formatted": record.message},
            "tags": Value::Object(tags),
        });
        if let Some(environment) = &self.environment {
            event["environment"] = json!(environment);
        }
        if let Some(release) = &self.release {
            event["release"] = json!(release);
        }
        if let Some(server_name) = &self.server_name {
            event["server_name"] = json!(server_name);
        }
        if let Some(metadata) = &record.metadata {
            event["extra"] = metadata.clone();
        }
        if let Some(error) = &record.error {
            let mut exception = json!({
                "type": error.name,
                "value": error.message,
            });
            if let Some(stack) = &error.stack {
                let frames = parse_stack_frames(stack);
                if !frames.is_empty() {
                    exception["stacktrace"] = json!({ "frames": frames });
                }
            }
            event["exception"] = json!({ "values": [exception] });
        }
        if let (Some(trace_id), Some(span_id)) =
            (&record.context.trace_id, &record.context.span_id)
        {
            event["contexts"] = json!({
                "trace": {"trace_id": trace_id, "span_id": span_id}
            });
        }
        event
    }

    async fn send_one(&self, record: &LogRecord) -> Result<(), TransportError> {
        let response = self
            .client
            .post(self.url.clone())
            .header("X-Sentry-Auth", &self.auth)
            .header("Content-Type", "application/json")
            .json(&self.event(record))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::TimedOut
                } else {
                    TransportError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body_bytes = response.bytes().await.map(|b| b.len()).unwrap_or(0);
        Err(TransportError::Http {
            status: status.as_u16(),
            body_bytes,
        })
    }
}

#[async_trait]
impl BatchSender for SentrySender {
    // Sentry takes one event per request; the buffer and retry machinery are
    // still shared with the other transports.
    async fn send(&self, batch: &[LogRecord]) -> Result<(), TransportError> {
        for record in batch {
            self.send_one(record).await?;
        }
        Ok(())
    }
}

/// Transport for the Sentry store API.
pub struct SentryTransport {
    config: TransportConfig,
    core: Arc<BatchCore<SentrySender>>,
}

impl SentryTransport {
    pub fn new(config: SentryConfig) -> Result<Self, ConfigError> {
        let dsn = parse_dsn(&config.dsn)?;
        let url = reqwest::Url::parse(&dsn.store_url())
            .map_err(|e| ConfigError::InvalidDsn(format!("{}: {e}", config.dsn)))?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout.unwrap_or(DEFAULT_TIMEOUT))
            .build()
            .map_err(|e| ConfigError::Invalid(format!("http client: {e}")))?;

        let sender = SentrySender {
            client,
            url,
            auth: dsn.auth_header(),
            environment: config.environment,
            release: config.release,
            server_name: config.server_name,
        };
        Ok(Self {
            config: config.transport,
            core: BatchCore::new("sentry", sender, config.batch.unwrap_or_default(), config.hooks),
        })
    }
}

#[async_trait]
impl Transport for SentryTransport {
    fn name(&self) -> &str {
        "sentry"
    }

    fn config(&self) -> &TransportConfig {
        &self.config
    }

    fn log(&self, record: LogRecord) {
        self.core.enqueue(record);
    }

    async fn init(&self) -> Result<(), TransportError> {
        self.core.ensure_timer();
        Ok(())
    }

    async fn flush(&self) -> Result<(), TransportError> {
        self.core.flush().await
    }

    async fn destroy(&self) -> Result<(), TransportError> {
        self.core.destroy().await
    }

    fn stats(&self) -> TransportStats {
        self.core.stats()
    }
}
