// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Environment-driven configuration.
//!
//! Malformed environment values never fail the process — they fall back to
//! defaults. Only explicit constructor arguments are validated strictly.

use crate::level::LogLevel;
use crate::sanitize::SanitizePreset;
use std::collections::BTreeMap;

/// Settings recognized from the process environment.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    /// `LOG_LEVEL`
    pub level: Option<LogLevel>,
    /// `LOG_ENABLED`
    pub enabled: Option<bool>,
    /// `LOG_STRUCTURED`
    pub structured: Option<bool>,
    /// `LOG_SANITIZE`
    pub sanitize: Option<SanitizePreset>,
    /// `LOG_CONTEXT_<KEY>` — the suffix, lowercased, becomes a context key.
    pub context: BTreeMap<String, String>,
    /// `OTEL_EXPORTER_OTLP_ENDPOINT` / `OTEL_EXPORTER_OTLP_HEADERS`
    pub otlp: Option<OtlpConfig>,
}

/// Endpoint settings for an OTLP span exporter plugged into the span
/// processor registry.
#[derive(Debug, Clone, PartialEq)]
pub struct OtlpConfig {
    pub endpoint: String,
    pub headers: Vec<(String, String)>,
}

/// Read the recognized settings from the process environment.
pub fn from_env() -> EnvConfig {
    from_vars(std::env::vars())
}

pub(crate) fn from_vars(vars: impl Iterator<Item = (String, String)>) -> EnvConfig {
    let mut out = EnvConfig::default();
    let mut otlp_endpoint: Option<String> = None;
    let mut otlp_headers: Vec<(String, String)> = Vec::new();

    for (key, value) in vars {
        match key.as_str() {
            "LOG_LEVEL" => out.level = value.parse().ok(),
            "LOG_ENABLED" => out.enabled = parse_bool(&value),
            "LOG_STRUCTURED" => out.structured = parse_bool(&value),
            "LOG_SANITIZE" => out.sanitize = value.parse().ok(),
            "OTEL_EXPORTER_OTLP_ENDPOINT" => {
                let value = value.trim();
                if !value.is_empty() {
                    otlp_endpoint = Some(value.to_string());
                }
            }
            "OTEL_EXPORTER_OTLP_HEADERS" => {
                otlp_headers = parse_header_list(&value);
            }
            _ => {
                if let Some(suffix) = key.strip_prefix("LOG_CONTEXT_") {
                    if !suffix.is_empty() {
                        out.context.insert(suffix.to_ascii_lowercase(), value);
                    }
                }
            }
        }
    }

    out.otlp = otlp_endpoint.map(|endpoint| OtlpConfig {
        endpoint,
        headers: otlp_headers,
    });
    out
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_header_list(value: &str) -> Vec<(String, String)> {
    value
        .split(',')
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            let k = k.trim();
            if k.is_empty() {
                return None;
            }
            Some((k.to_string(), v.trim().to_string()))
        })
        .collect()
}

/// Whether the process declares a production environment
/// (`ENVIRONMENT`/`NODE_ENV` set to `production`). Production flips the
/// default level to `warn` and default output to structured JSON.
pub fn is_production() -> bool {
    ["ENVIRONMENT", "NODE_ENV"].iter().any(|key| {
        std::env::var(key)
            .map(|v| v.trim().eq_ignore_ascii_case("production"))
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Iterator<Item = (String, String)> + 'a {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
    }

    #[test]
    fn reads_recognized_settings() {
        let config = from_vars(vars(&[
            ("LOG_LEVEL", "debug"),
            ("LOG_ENABLED", "false"),
            ("LOG_STRUCTURED", "1"),
            ("LOG_SANITIZE", "gdpr"),
        ]));
        assert_eq!(config.level, Some(LogLevel::Debug));
        assert_eq!(config.enabled, Some(false));
        assert_eq!(config.structured, Some(true));
        assert_eq!(config.sanitize, Some(SanitizePreset::Gdpr));
    }

    #[test]
    fn malformed_values_fall_back() {
        let config = from_vars(vars(&[
            ("LOG_LEVEL", "loudest"),
            ("LOG_ENABLED", "maybe"),
            ("LOG_SANITIZE", "strict"),
        ]));
        assert_eq!(config.level, None);
        assert_eq!(config.enabled, None);
        assert_eq!(config.sanitize, None);
    }

    #[test]
    fn context_suffix_becomes_key() {
        let config = from_vars(vars(&[
            ("LOG_CONTEXT_REGION", "eu-west-1"),
            ("LOG_CONTEXT_DEPLOYMENT", "blue"),
            ("LOG_CONTEXT_", "ignored"),
        ]));
        assert_eq!(config.context.get("region").map(String::as_str), Some("eu-west-1"));
        assert_eq!(config.context.get("deployment").map(String::as_str), Some("blue"));
        assert_eq!(config.context.len(), 2);
    }

    #[test]
    fn otlp_endpoint_with_headers() {
        let config = from_vars(vars(&[
            ("OTEL_EXPORTER_OTLP_ENDPOINT", "https://otlp.example.com:4318"),
            (
                "OTEL_EXPORTER_OTLP_HEADERS",
                "x-api-key=abc, x-tenant=prod",
            ),
        ]));
        let otlp = config.otlp.unwrap();
        assert_eq!(otlp.endpoint, "https://otlp.example.com:4318");
        assert_eq!(
            otlp.headers,
            vec![
                ("x-api-key".to_string(), "abc".to_string()),
                ("x-tenant".to_string(), "prod".to_string()),
            ]
        );
    }

    #[test]
    fn headers_without_endpoint_are_dropped() {
        let config = from_vars(vars(&[("OTEL_EXPORTER_OTLP_HEADERS", "k=v")]));
        assert!(config.otlp.is_none());
    }

    #[test]
    fn bool_parsing_variants() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("on"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool(""), None);
    }
}
