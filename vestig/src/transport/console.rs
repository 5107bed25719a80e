// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Console sink: one line per record, pretty or JSON, no batching.

use crate::error::TransportError;
use crate::record::LogRecord;
use crate::transport::{Transport, TransportConfig, TransportStats};
use async_trait::async_trait;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Target for standard stream output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdTarget {
    /// Write to standard output (stdout).
    Out,
    /// Write to standard error (stderr).
    Err,
}

#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    /// Human-oriented lines instead of JSON.
    pub pretty: bool,
    pub target: StdTarget,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            pretty: false,
            target: StdTarget::Out,
        }
    }
}

/// Writes each record immediately; `flush` only flushes the stream.
pub struct ConsoleTransport {
    config: TransportConfig,
    pretty: bool,
    target: StdTarget,
    destroyed: AtomicBool,
    sent: AtomicU64,
}

impl ConsoleTransport {
    pub fn new(console: ConsoleConfig, config: TransportConfig) -> Self {
        Self {
            config,
            pretty: console.pretty,
            target: console.target,
            destroyed: AtomicBool::new(false),
            sent: AtomicU64::new(0),
        }
    }

    fn render(&self, record: &LogRecord) -> String {
        if !self.pretty {
            return serde_json::to_string(record)
                .unwrap_or_else(|_| format!("{{\"message\":{:?}}}", record.message));
        }
        let mut line = format!(
            "{} {:<5}",
            record.timestamp,
            record.level.as_str().to_ascii_uppercase()
        );
        if let Some(namespace) = &record.namespace {
            line.push_str(&format!(" [{namespace}]"));
        }
        line.push(' ');
        line.push_str(&record.message);
        if let Some(metadata) = &record.metadata {
            if let Ok(rendered) = serde_json::to_string(metadata) {
                line.push(' ');
                line.push_str(&rendered);
            }
        }
        if let Some(error) = &record.error {
            line.push_str(&format!(" {}: {}", error.name, error.message));
        }
        line
    }

    fn write_line(&self, line: &str) {
        // Console write failures are not recoverable and not worth a retry.
        let _ = match self.target {
            StdTarget::Out => writeln!(std::io::stdout(), "{line}"),
            StdTarget::Err => writeln!(std::io::stderr(), "{line}"),
        };
    }
}

#[async_trait]
impl Transport for ConsoleTransport {
    fn name(&self) -> &str {
        "console"
    }

    fn config(&self) -> &TransportConfig {
        &self.config
    }

    fn log(&self, record: LogRecord) {
        if self.destroyed.load(Ordering::SeqCst) {
            return;
        }
        let line = self.render(&record);
        self.write_line(&line);
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    async fn flush(&self) -> Result<(), TransportError> {
        match self.target {
            StdTarget::Out => std::io::stdout().flush()?,
            StdTarget::Err => std::io::stderr().flush()?,
        }
        Ok(())
    }

    async fn destroy(&self) -> Result<(), TransportError> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.flush().await
    }

    fn stats(&self) -> TransportStats {
        TransportStats {
            sent: self.sent.load(Ordering::Relaxed),
            ..Default::default()
        }
    }
}
