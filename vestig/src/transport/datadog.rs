// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Datadog Logs intake sink.

use super::batch::{BatchConfig, BatchCore, BatchHooks, BatchSender};
use super::http::build_headers;
use crate::error::{ConfigError, TransportError};
use crate::level::LogLevel;
use crate::record::LogRecord;
use crate::transport::{Transport, TransportConfig, TransportStats};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_SITE: &str = "datadoghq.com";
const DEFAULT_SOURCE: &str = "vestig";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings for [`DatadogTransport`].
#[derive(Clone)]
pub struct DatadogConfig {
    pub api_key: String,
    /// Intake site (`datadoghq.com`, `datadoghq.eu`, `us3.datadoghq.com`, …).
    pub site: String,
    pub service: String,
    /// `ddsource` on every entry.
    pub source: String,
    pub hostname: Option<String>,
    /// Static `ddtags`.
    pub tags: Vec<String>,
    pub timeout: Option<Duration>,
    pub batch: Option<BatchConfig>,
    pub transport: TransportConfig,
    pub hooks: BatchHooks,
}

impl DatadogConfig {
    pub fn new(api_key: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            site: DEFAULT_SITE.to_string(),
            service: service.into(),
            source: DEFAULT_SOURCE.to_string(),
            hostname: None,
            tags: Vec::new(),
            timeout: None,
            batch: None,
            transport: TransportConfig::default(),
            hooks: BatchHooks::default(),
        }
    }
}

/// `trace|debug → debug`, `info → info`, `warn → warning`, `error → error`.
fn datadog_status(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Trace | LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warning",
        LogLevel::Error => "error",
    }
}

struct DatadogSender {
    client: reqwest::Client,
    url: reqwest::Url,
    headers: HeaderMap,
    service: String,
    source: String,
    hostname: Option<String>,
    ddtags: String,
}

impl DatadogSender {
    fn entry(&self, record: &LogRecord) -> Value {
        let mut attributes = Map::new();
        if !record.context.is_empty() {
            if let Ok(context) = serde_json::to_value(&record.context) {
                attributes.insert("context".to_string(), context);
            }
        }
        if let Some(metadata) = &record.metadata {
            attributes.insert("metadata".to_string(), metadata.clone());
        }
        attributes.insert("runtime".to_string(), json!(record.runtime));
        if let Some(namespace) = &record.namespace {
            attributes.insert("namespace".to_string(), json!(namespace));
        }

        let mut entry = json!({
            "message": record.message,
            "ddsource": self.source,
            "service": self.service,
            "status": datadog_status(record.level),
            "ddtags": self.ddtags,
            "attributes": Value::Object(attributes),
        });
        if let Some(hostname) = &self.hostname {
            entry["hostname"] = json!(hostname);
        }
        if let Some(error) = &record.error {
            if let Ok(value) = serde_json::to_value(error) {
                entry["error"] = value;
            }
        }
        entry
    }
}

#[async_trait]
impl BatchSender for DatadogSender {
    async fn send(&self, batch: &[LogRecord]) -> Result<(), TransportError> {
        let body: Vec<Value> = batch.iter().map(|r| self.entry(r)).collect();
        let response = self
            .client
            .post(self.url.clone())
            .headers(self.headers.clone())
            .json(&body)
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

/// Batching transport for the Datadog Logs v2 intake.
pub struct DatadogTransport {
    config: TransportConfig,
    core: Arc<BatchCore<DatadogSender>>,
}

impl DatadogTransport {
    pub fn new(config: DatadogConfig) -> Result<Self, ConfigError> {
        if config.api_key.trim().is_empty() {
            return Err(ConfigError::Invalid("datadog api key is required".into()));
        }
        if config.site.trim().is_empty() {
            return Err(ConfigError::Invalid("datadog site is required".into()));
        }
        let url = reqwest::Url::parse(&format!(
            "https://http-intake.logs.{}/api/v2/logs",
            config.site
        ))
        .map_err(|e| ConfigError::Invalid(format!("datadog site: {e}")))?;
        let headers = build_headers(&[
            ("DD-API-KEY".to_string(), config.api_key.clone()),
            ("Content-Type".to_string(), "application/json".to_string()),
        ])?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout.unwrap_or(DEFAULT_TIMEOUT))
            .build()
            .map_err(|e| ConfigError::Invalid(format!("http client: {e}")))?;

        let sender = DatadogSender {
            client,
            url,
            headers,
            service: config.service,
            source: config.source,
            hostname: config.hostname,
            ddtags: config.tags.join(","),
        };
        Ok(Self {
            config: config.transport,
            core: BatchCore::new("datadog", sender, config.batch.unwrap_or_default(), config.hooks),
        })
    }
}

#[async_trait]
impl Transport for DatadogTransport {
    fn name(&self) -> &str {
        "datadog"
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
