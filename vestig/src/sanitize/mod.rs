// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sensitive-field redaction over arbitrary value graphs.
//!
//! The sanitizer walks a [`serde_json::Value`], redacting by field-name
//! match and by value-pattern match under a preset policy. It never fails:
//! depth overflow produces a marker, oversized strings are truncated, and
//! everything else passes through untouched.

mod presets;

use crate::context::LogContext;
use crate::error::ConfigError;
use presets::PatternKind;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::str::FromStr;

/// Marker replacing values nested beyond the depth cap.
pub const MAX_DEPTH_MARKER: &str = "[Max Depth Exceeded]";
/// Marker appended to strings cut at the length cap.
pub const TRUNCATION_MARKER: &str = "[TRUNCATED]";

const DEFAULT_REPLACEMENT: &str = "[REDACTED]";
const DEFAULT_MAX_DEPTH: usize = 10;
const DEFAULT_MAX_STRING_LEN: usize = 10_000;

/// Built-in redaction policies, from nothing to PCI-DSS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SanitizePreset {
    /// Pass everything through unchanged.
    None,
    /// Passwords and obvious secrets only.
    Minimal,
    /// Credentials, card numbers, SSNs, emails, phone numbers.
    #[default]
    Default,
    /// [`SanitizePreset::Default`] plus personal identifiers.
    Gdpr,
    /// [`SanitizePreset::Default`] plus medical identifiers.
    Hipaa,
    /// Cardholder data and verification codes.
    PciDss,
}

impl SanitizePreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            SanitizePreset::None => "none",
            SanitizePreset::Minimal => "minimal",
            SanitizePreset::Default => "default",
            SanitizePreset::Gdpr => "gdpr",
            SanitizePreset::Hipaa => "hipaa",
            SanitizePreset::PciDss => "pci-dss",
        }
    }
}

impl FromStr for SanitizePreset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(SanitizePreset::None),
            "minimal" => Ok(SanitizePreset::Minimal),
            "default" => Ok(SanitizePreset::Default),
            "gdpr" => Ok(SanitizePreset::Gdpr),
            "hipaa" => Ok(SanitizePreset::Hipaa),
            "pci-dss" | "pci_dss" | "pcidss" => Ok(SanitizePreset::PciDss),
            other => Err(ConfigError::InvalidPreset(other.to_string())),
        }
    }
}

/// Sanitizer configuration.
#[derive(Debug, Clone)]
pub struct SanitizeConfig {
    pub preset: SanitizePreset,
    /// Additional field names to redact (normalized like the preset tables).
    pub custom_fields: Vec<String>,
    /// Additional value regexes; matches are fully replaced.
    pub custom_patterns: Vec<String>,
    /// The redaction token.
    pub replacement: String,
    /// Recursion cap.
    pub max_depth: usize,
    /// Strings longer than this are truncated with a marker.
    pub max_string_len: usize,
}

impl Default for SanitizeConfig {
    fn default() -> Self {
        Self::new(SanitizePreset::Default)
    }
}

impl SanitizeConfig {
    pub fn new(preset: SanitizePreset) -> Self {
        SanitizeConfig {
            preset,
            custom_fields: Vec::new(),
            custom_patterns: Vec::new(),
            replacement: DEFAULT_REPLACEMENT.to_string(),
            max_depth: DEFAULT_MAX_DEPTH,
            max_string_len: DEFAULT_MAX_STRING_LEN,
        }
    }

    pub fn custom_fields(mut self, fields: Vec<String>) -> Self {
        self.custom_fields = fields;
        self
    }

    pub fn custom_patterns(mut self, patterns: Vec<String>) -> Self {
        self.custom_patterns = patterns;
        self
    }

    pub fn replacement(mut self, token: impl Into<String>) -> Self {
        self.replacement = token.into();
        self
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn max_string_len(mut self, len: usize) -> Self {
        self.max_string_len = len;
        self
    }
}

fn normalize_field(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

/// A compiled sanitizer. Cheap to clone and share.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    passthrough: bool,
    fields: HashSet<String>,
    patterns: Vec<PatternKind>,
    custom_patterns: Vec<Regex>,
    replacement: String,
    max_depth: usize,
    max_string_len: usize,
}

impl Sanitizer {
    /// Compile a sanitizer. Fails fast on an invalid custom pattern.
    pub fn new(config: &SanitizeConfig) -> Result<Self, ConfigError> {
        let mut fields: HashSet<String> = presets::preset_fields(config.preset)
            .into_iter()
            .map(normalize_field)
            .collect();
        fields.extend(config.custom_fields.iter().map(|f| normalize_field(f)));

        let custom_patterns = config
            .custom_patterns
            .iter()
            .map(|source| {
                Regex::new(source)
                    .map_err(|e| ConfigError::Invalid(format!("bad sanitize pattern: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Sanitizer {
            passthrough: config.preset == SanitizePreset::None
                && config.custom_fields.is_empty()
                && config.custom_patterns.is_empty(),
            fields,
            patterns: presets::preset_patterns(config.preset).to_vec(),
            custom_patterns,
            replacement: config.replacement.clone(),
            max_depth: config.max_depth.max(1),
            max_string_len: config.max_string_len.max(16),
        })
    }

    /// Compile for a bare preset. Presets carry no custom patterns, so this
    /// cannot fail.
    pub fn from_preset(preset: SanitizePreset) -> Self {
        #[allow(clippy::unwrap_used)]
        Self::new(&SanitizeConfig::new(preset)).unwrap()
    }

    /// Redact a value graph under the configured policy.
    pub fn sanitize(&self, value: &Value) -> Value {
        if self.passthrough {
            return value.clone();
        }
        self.walk(value, 0)
    }

    /// Redact the free-form portion of a context. Recognized correlation
    /// keys are identifiers, not payload, but their string values still go
    /// through the value patterns.
    pub fn sanitize_context(&self, ctx: &LogContext) -> LogContext {
        if self.passthrough {
            return ctx.clone();
        }
        let value = match serde_json::to_value(ctx) {
            Ok(v) => v,
            Err(_) => return ctx.clone(),
        };
        match serde_json::from_value(self.walk_strings_only(&value)) {
            Ok(clean) => clean,
            Err(_) => ctx.clone(),
        }
    }

    // Context sanitization masks string values but never drops keys: the
    // recognized field names (userId, sessionId) are correlation handles.
    fn walk_strings_only(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => self.sanitize_string(s),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.walk_strings_only(v)))
                    .collect(),
            ),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.walk_strings_only(v)).collect())
            }
            other => other.clone(),
        }
    }

    fn walk(&self, value: &Value, depth: usize) -> Value {
        if depth >= self.max_depth {
            return Value::String(MAX_DEPTH_MARKER.to_string());
        }
        match value {
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, val) in map {
                    if self.matches_field(key) {
                        out.insert(key.clone(), self.redact_matched(val));
                    } else {
                        out.insert(key.clone(), self.walk(val, depth + 1));
                    }
                }
                Value::Object(out)
            }
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.walk(v, depth + 1)).collect())
            }
            Value::String(s) => self.sanitize_string(s),
            other => other.clone(),
        }
    }

    fn matches_field(&self, key: &str) -> bool {
        self.fields.contains(&normalize_field(key))
    }

    // A matched field whose string value fits a maskable pattern keeps its
    // partial mask (`us***@example.com`); everything else becomes the
    // replacement token.
    fn redact_matched(&self, value: &Value) -> Value {
        if let Value::String(s) = value {
            let masked = self.apply_patterns(s);
            if masked != *s {
                return Value::String(masked);
            }
        }
        Value::String(self.replacement.clone())
    }

    fn sanitize_string(&self, s: &str) -> Value {
        let mut out = self.apply_patterns(s);
        if out.len() > self.max_string_len {
            let mut cut = self.max_string_len;
            while cut > 0 && !out.is_char_boundary(cut) {
                cut -= 1;
            }
            out.truncate(cut);
            out.push_str(TRUNCATION_MARKER);
        }
        Value::String(out)
    }

    fn apply_patterns(&self, s: &str) -> String {
        let mut out = s.to_string();
        for kind in &self.patterns {
            out = apply_pattern(*kind, &out, &self.replacement);
        }
        for re in &self.custom_patterns {
            out = re.replace_all(&out, self.replacement.as_str()).into_owned();
        }
        out
    }
}

fn apply_pattern(kind: PatternKind, text: &str, replacement: &str) -> String {
    let re = kind.regex();
    match kind {
        PatternKind::Email => re
            .replace_all(text, |caps: &regex::Captures<'_>| {
                let local = &caps[1];
                let keep: String = local.chars().take(2.min(local.chars().count())).collect();
                format!("{keep}***@{}", &caps[2])
            })
            .into_owned(),
        PatternKind::CreditCard => re
            .replace_all(text, |caps: &regex::Captures<'_>| {
                let digits: String = caps[0].chars().filter(char::is_ascii_digit).collect();
                let last4 = &digits[digits.len().saturating_sub(4)..];
                format!("****{last4}")
            })
            .into_owned(),
        _ => re.replace_all(text, replacement).into_owned(),
    }
}
