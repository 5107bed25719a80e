// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The user-facing logger: config resolution, the child namespace tree, and
//! the emission pipeline.
//!
//! Emission never blocks and never fails: gate, build, serialize the error
//! chain, sanitize, sample, fan out to the enabled transports.

use crate::config;
use crate::context::{get_context, LogContext};
use crate::error::{ConfigError, TransportError};
use crate::level::LogLevel;
use crate::record::{LogRecord, SerializedError};
use crate::sample::{SamplerConfig, SamplingPolicy};
use crate::sanitize::{SanitizeConfig, Sanitizer};
use crate::transport::{
    register_transport, ConsoleConfig, ConsoleTransport, StdTarget, Transport, TransportConfig,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use vestig_common::runtime::{rfc3339_now, runtime};

/// Construction-time logger settings. Unset fields resolve from the
/// environment, then from production-aware defaults.
#[derive(Default)]
pub struct LoggerConfig {
    pub level: Option<LogLevel>,
    pub enabled: Option<bool>,
    /// JSON output (defaults on in production).
    pub structured: Option<bool>,
    pub namespace: Option<String>,
    /// Static context merged under the ambient context.
    pub context: LogContext,
    /// Defaults to the `default` preset (or `LOG_SANITIZE`).
    pub sanitize: Option<SanitizeConfig>,
    pub sampling: Option<SamplerConfig>,
    /// Defaults to a single console transport.
    pub transports: Vec<Arc<dyn Transport>>,
}

impl LoggerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn structured(mut self, structured: bool) -> Self {
        self.structured = Some(structured);
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn context(mut self, context: LogContext) -> Self {
        self.context = context;
        self
    }

    pub fn sanitize(mut self, sanitize: SanitizeConfig) -> Self {
        self.sanitize = Some(sanitize);
        self
    }

    pub fn sampling(mut self, sampling: SamplerConfig) -> Self {
        self.sampling = Some(sampling);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transports.push(transport);
        self
    }
}

/// Per-child configuration overrides for [`Logger::child`].
#[derive(Default)]
pub struct ChildOverrides {
    pub level: Option<LogLevel>,
    /// Merged over the parent's static context.
    pub context: Option<LogContext>,
    /// Replaces the transport list for this child only.
    pub transports: Option<Vec<Arc<dyn Transport>>>,
    pub sampling: Option<SamplerConfig>,
}

struct LoggerCore {
    enabled: bool,
    level: AtomicU8,
    structured: bool,
    namespace: Option<String>,
    context: LogContext,
    sanitizer: Arc<Sanitizer>,
    policy: Arc<SamplingPolicy>,
    // Children hold this by reference; overriding transports swaps in a new
    // list for the child alone.
    transports: Arc<RwLock<Vec<Arc<dyn Transport>>>>,
}

/// The logging entry point. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Logger {
    core: Arc<LoggerCore>,
}

/// Build a logger. Fails fast on invalid configuration; emission itself
/// never fails.
pub fn create_logger(config: LoggerConfig) -> Result<Logger, ConfigError> {
    Logger::new(config)
}

impl Logger {
    pub fn new(config: LoggerConfig) -> Result<Logger, ConfigError> {
        let env = config::from_env();
        let production = config::is_production();

        let level = config
            .level
            .or(env.level)
            .unwrap_or(if production { LogLevel::Warn } else { LogLevel::Info });
        let enabled = config.enabled.or(env.enabled).unwrap_or(true);
        let structured = config.structured.or(env.structured).unwrap_or(production);

        let sanitize = match config.sanitize {
            Some(sanitize) => sanitize,
            None => SanitizeConfig::new(env.sanitize.unwrap_or_default()),
        };
        let sanitizer = Arc::new(Sanitizer::new(&sanitize)?);

        // Environment context fills gaps; explicit context wins.
        let mut context = config.context;
        for (key, value) in env.context {
            context.extra.entry(key).or_insert_with(|| json!(value));
        }

        let transports = if config.transports.is_empty() {
            vec![Arc::new(ConsoleTransport::new(
                ConsoleConfig {
                    pretty: !structured,
                    target: StdTarget::Out,
                },
                TransportConfig::default(),
            )) as Arc<dyn Transport>]
        } else {
            config.transports
        };
        for transport in &transports {
            register_transport(transport);
        }

        Ok(Logger {
            core: Arc::new(LoggerCore {
                enabled,
                level: AtomicU8::new(level as u8),
                structured,
                namespace: config.namespace,
                context,
                sanitizer,
                policy: Arc::new(SamplingPolicy::from_config(config.sampling.as_ref())),
                transports: Arc::new(RwLock::new(transports)),
            }),
        })
    }

    pub fn level(&self) -> LogLevel {
        LogLevel::from_u8(self.core.level.load(Ordering::Relaxed))
    }

    pub fn set_level(&self, level: LogLevel) {
        self.core.level.store(level as u8, Ordering::Relaxed);
    }

    pub fn namespace(&self) -> Option<String> {
        self.core.namespace.clone()
    }

    /// Whether this logger writes structured (JSON) console output.
    pub fn structured(&self) -> bool {
        self.core.structured
    }

    pub fn trace(&self, message: &str, metadata: Option<Value>) {
        self.log(LogLevel::Trace, message, metadata);
    }

    pub fn debug(&self, message: &str, metadata: Option<Value>) {
        self.log(LogLevel::Debug, message, metadata);
    }

    pub fn info(&self, message: &str, metadata: Option<Value>) {
        self.log(LogLevel::Info, message, metadata);
    }

    pub fn warn(&self, message: &str, metadata: Option<Value>) {
        self.log(LogLevel::Warn, message, metadata);
    }

    pub fn error(&self, message: &str, metadata: Option<Value>) {
        self.log(LogLevel::Error, message, metadata);
    }

    pub fn log(&self, level: LogLevel, message: &str, metadata: Option<Value>) {
        self.emit(level, message, metadata, None);
    }

    /// Emit with an error whose `source()` chain is serialized onto the
    /// record.
    pub fn log_with_error(
        &self,
        level: LogLevel,
        message: &str,
        error: &(dyn std::error::Error + 'static),
        metadata: Option<Value>,
    ) {
        self.emit(level, message, metadata, Some(error));
    }

    /// [`Logger::log_with_error`] at the error level.
    pub fn error_with(
        &self,
        message: &str,
        error: &(dyn std::error::Error + 'static),
        metadata: Option<Value>,
    ) {
        self.emit(LogLevel::Error, message, metadata, Some(error));
    }

    fn emit(
        &self,
        level: LogLevel,
        message: &str,
        metadata: Option<Value>,
        error: Option<&(dyn std::error::Error + 'static)>,
    ) {
        let core = &self.core;
        // Fast gate: no allocation below the threshold.
        if !core.enabled || level < self.level() {
            return;
        }

        let mut context = get_context().merged(&core.context);
        let mut metadata = metadata;
        let mut serialized_error = error.map(SerializedError::from_error);

        if let Some(Value::Object(map)) = metadata.as_mut() {
            // A `context` key in call-site metadata overlays the merged
            // context.
            if let Some(overlay) = map.remove("context") {
                if let Ok(overlay) = serde_json::from_value::<LogContext>(overlay) {
                    context = context.merged(&overlay);
                }
            }
            // An error-shaped `error` key is lifted onto the record.
            if serialized_error.is_none() {
                if let Some(lifted) = map.get("error").and_then(SerializedError::from_value) {
                    map.remove("error");
                    serialized_error = Some(lifted);
                }
            }
        }

        let metadata = metadata
            .map(|v| core.sanitizer.sanitize(&v))
            .filter(|v| !v.is_null());
        let context = core.sanitizer.sanitize_context(&context);

        let record = LogRecord {
            timestamp: rfc3339_now(),
            level,
            message: message.to_string(),
            namespace: core.namespace.clone(),
            runtime: runtime().kind.tag().to_string(),
            context,
            metadata,
            error: serialized_error,
        };

        if !core.policy.should_keep(&record) {
            return;
        }

        if let Ok(transports) = core.transports.read() {
            for transport in transports.iter() {
                if transport.config().accepts(&record) {
                    transport.log(record.clone());
                }
            }
        }
    }

    /// A child logger under `parent.namespace + ":" + suffix`, sharing the
    /// parent's transports by reference unless overridden.
    pub fn child(&self, suffix: &str, overrides: Option<ChildOverrides>) -> Logger {
        let overrides = overrides.unwrap_or_default();
        let core = &self.core;

        let namespace = match &core.namespace {
            Some(ns) => format!("{ns}:{suffix}"),
            None => suffix.to_string(),
        };
        let context = match &overrides.context {
            Some(overlay) => core.context.merged(overlay),
            None => core.context.clone(),
        };
        let level = overrides.level.unwrap_or_else(|| self.level());
        let policy = match &overrides.sampling {
            Some(sampling) => Arc::new(SamplingPolicy::from_config(Some(sampling))),
            None => Arc::clone(&core.policy),
        };
        let transports = match overrides.transports {
            Some(list) => {
                for transport in &list {
                    register_transport(transport);
                }
                Arc::new(RwLock::new(list))
            }
            None => Arc::clone(&core.transports),
        };

        Logger {
            core: Arc::new(LoggerCore {
                enabled: core.enabled,
                level: AtomicU8::new(level as u8),
                structured: core.structured,
                namespace: Some(namespace),
                context,
                sanitizer: Arc::clone(&core.sanitizer),
                policy,
                transports,
            }),
        }
    }

    pub fn add_transport(&self, transport: Arc<dyn Transport>) {
        register_transport(&transport);
        if let Ok(mut transports) = self.core.transports.write() {
            transports.push(transport);
        }
    }

    /// Remove every transport with the given name.
    pub fn remove_transport(&self, name: &str) {
        if let Ok(mut transports) = self.core.transports.write() {
            transports.retain(|t| t.name() != name);
        }
    }

    fn transport_snapshot(&self) -> Vec<Arc<dyn Transport>> {
        self.core
            .transports
            .read()
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    /// Start transport background machinery. Requires a tokio runtime.
    pub async fn init(&self) -> Result<(), TransportError> {
        for transport in self.transport_snapshot() {
            transport.init().await?;
        }
        Ok(())
    }

    /// Flush every transport; the first failure is returned after all have
    /// been attempted.
    pub async fn flush(&self) -> Result<(), TransportError> {
        let mut first_err = None;
        for transport in self.transport_snapshot() {
            if let Err(e) = transport.flush().await {
                tracing::warn!(transport = transport.name(), error = %e, "flush failed");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Destroy every transport (bounded final flush, then drop).
    pub async fn destroy(&self) -> Result<(), TransportError> {
        let mut first_err = None;
        for transport in self.transport_snapshot() {
            if let Err(e) = transport.destroy().await {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
