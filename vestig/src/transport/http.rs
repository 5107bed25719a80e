// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Generic HTTP collector sink: batches POSTed as a JSON array.

use super::batch::{BatchConfig, BatchCore, BatchHooks, BatchSender};
use super::offline::OfflineQueue;
use crate::error::{ConfigError, TransportError};
use crate::record::LogRecord;
use crate::transport::{Transport, TransportConfig, TransportStats};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_HTTP_BATCH_SIZE: usize = 50;

/// Settings for [`HttpTransport`].
#[derive(Clone, Default)]
pub struct HttpTransportConfig {
    /// Collector endpoint receiving the JSON array body.
    pub url: String,
    /// Extra request headers.
    pub headers: Vec<(String, String)>,
    /// Per-request timeout.
    pub timeout: Option<Duration>,
    pub batch: Option<BatchConfig>,
    /// Persist undeliverable batches instead of retrying them forever.
    pub offline: Option<OfflineQueue>,
    pub transport: TransportConfig,
    pub hooks: BatchHooks,
}

impl HttpTransportConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

struct HttpSender {
    client: reqwest::Client,
    url: reqwest::Url,
    headers: HeaderMap,
    offline: Option<OfflineQueue>,
}

#[async_trait]
impl BatchSender for HttpSender {
    async fn send(&self, batch: &[LogRecord]) -> Result<(), TransportError> {
        let response = self
            .client
            .post(self.url.clone())
            .headers(self.headers.clone())
            .json(&batch)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                let err = if e.is_timeout() {
                    TransportError::TimedOut
                } else {
                    TransportError::Network(e.to_string())
                };
                // Connectivity loss with an offline queue configured:
                // persist instead of spinning in retries.
                if let Some(queue) = &self.offline {
                    queue.persist(batch);
                    tracing::warn!(error = %err, count = batch.len(), "batch parked in offline queue");
                    return Ok(());
                }
                return Err(err);
            }
        };

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        // The body is discarded unread beyond its length; collector error
        // bodies may echo record contents.
        let body_bytes = response.bytes().await.map(|b| b.len()).unwrap_or(0);
        Err(TransportError::Http {
            status: status.as_u16(),
            body_bytes,
        })
    }
}

/// Batching POST transport for self-hosted collectors.
pub struct HttpTransport {
    config: TransportConfig,
    core: Arc<BatchCore<HttpSender>>,
    offline: Option<OfflineQueue>,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self, ConfigError> {
        let url = reqwest::Url::parse(&config.url)
            .map_err(|e| ConfigError::Invalid(format!("invalid transport url: {e}")))?;
        let headers = build_headers(&config.headers)?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout.unwrap_or(DEFAULT_TIMEOUT))
            .build()
            .map_err(|e| ConfigError::Invalid(format!("http client: {e}")))?;

        let sender = HttpSender {
            client,
            url,
            headers,
            offline: config.offline.clone(),
        };
        let batch = config
            .batch
            .unwrap_or_else(|| BatchConfig::new().batch_size(DEFAULT_HTTP_BATCH_SIZE));
        Ok(Self {
            config: config.transport,
            core: BatchCore::new("http", sender, batch, config.hooks),
            offline: config.offline,
        })
    }

    // Entries parked while offline rejoin the head of the buffer.
    fn recover_offline(&self) {
        if let Some(queue) = &self.offline {
            let recovered = queue.take_all();
            if !recovered.is_empty() {
                tracing::info!(count = recovered.len(), "recovered offline queue");
                self.core.requeue_records(recovered);
            }
        }
    }
}

pub(crate) fn build_headers(pairs: &[(String, String)]) -> Result<HeaderMap, ConfigError> {
    let mut headers = HeaderMap::new();
    for (key, value) in pairs {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|_| ConfigError::Invalid(format!("invalid header name: {key}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| ConfigError::Invalid(format!("invalid header value for {key}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    fn config(&self) -> &TransportConfig {
        &self.config
    }

    fn log(&self, record: LogRecord) {
        self.core.enqueue(record);
    }

    async fn init(&self) -> Result<(), TransportError> {
        self.recover_offline();
        self.core.ensure_timer();
        Ok(())
    }

    async fn flush(&self) -> Result<(), TransportError> {
        self.recover_offline();
        self.core.flush().await
    }

    async fn destroy(&self) -> Result<(), TransportError> {
        self.core.destroy().await
    }

    fn stats(&self) -> TransportStats {
        self.core.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_url() {
        let result = HttpTransport::new(HttpTransportConfig::new("not a url"));
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_invalid_header() {
        let mut config = HttpTransportConfig::new("https://collector.example.com/logs");
        config.headers = vec![("bad header\n".to_string(), "v".to_string())];
        assert!(matches!(
            HttpTransport::new(config),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn builds_with_custom_headers() {
        let mut config = HttpTransportConfig::new("https://collector.example.com/logs");
        config.headers = vec![("x-api-key".to_string(), "secret".to_string())];
        assert!(HttpTransport::new(config).is_ok());
    }
}
