// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared test helpers.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use vestig::{LogRecord, Transport, TransportConfig, TransportError};

/// Captures every accepted record for assertions.
pub struct CaptureTransport {
    config: TransportConfig,
    pub records: Mutex<Vec<LogRecord>>,
}

impl CaptureTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            config: TransportConfig::default(),
            records: Mutex::new(Vec::new()),
        })
    }

    pub fn messages(&self) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.message.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for CaptureTransport {
    fn name(&self) -> &str {
        "capture"
    }

    fn config(&self) -> &TransportConfig {
        &self.config
    }

    fn log(&self, record: LogRecord) {
        self.records.lock().unwrap().push(record);
    }

    async fn flush(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn destroy(&self) -> Result<(), TransportError> {
        Ok(())
    }
}
