// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The log record wire shape and error serialization.

use crate::context::LogContext;
use crate::level::LogLevel;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How deep a cause chain is followed.
const MAX_CAUSE_DEPTH: usize = 10;

/// Marker standing in for a cause that was already serialized higher up the
/// chain.
pub const CIRCULAR_REFERENCE_MARKER: &str = "[Circular Reference]";

/// The immutable unit delivered to transports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// RFC3339, UTC.
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
    /// Dotted or colon-delimited namespace (e.g. `api:users`).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub namespace: Option<String>,
    /// Host environment tag.
    pub runtime: String,
    #[serde(skip_serializing_if = "LogContext::is_empty", default)]
    pub context: LogContext,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<SerializedError>,
}

/// A serialized error with its cause chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SerializedError {
    pub name: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub stack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub code: Option<String>,
    #[serde(
        rename = "statusCode",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub errno: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub syscall: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cause: Option<Box<SerializedError>>,
}

impl SerializedError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        SerializedError {
            name: name.into(),
            message: message.into(),
            ..Default::default()
        }
    }

    /// Serialize an error and its `source()` chain, up to
    /// [`MAX_CAUSE_DEPTH`] levels. Revisited causes (identity-tracked) are
    /// replaced with a [`CIRCULAR_REFERENCE_MARKER`] entry.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> SerializedError {
        let mut visited: Vec<*const ()> = Vec::with_capacity(4);
        Self::from_error_at(err, &mut visited, 0)
    }

    fn from_error_at(
        err: &(dyn std::error::Error + 'static),
        visited: &mut Vec<*const ()>,
        depth: usize,
    ) -> SerializedError {
        let mut out = SerializedError::new(classify_name(err), err.to_string());
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            out.errno = io.raw_os_error();
            out.code = Some(format!("{:?}", io.kind()));
        }

        visited.push(err as *const _ as *const ());
        if let Some(source) = err.source() {
            let ptr = source as *const _ as *const ();
            if visited.contains(&ptr) {
                out.cause = Some(Box::new(SerializedError::new(
                    CIRCULAR_REFERENCE_MARKER,
                    CIRCULAR_REFERENCE_MARKER,
                )));
            } else if depth + 1 < MAX_CAUSE_DEPTH {
                out.cause = Some(Box::new(Self::from_error_at(source, visited, depth + 1)));
            }
        }
        out
    }

    /// Interpret an error-shaped JSON value (it must carry a `message` or
    /// `name`). Well-known fields are lifted; nested `cause` objects recurse
    /// up to [`MAX_CAUSE_DEPTH`]; a string cause becomes a message-only
    /// entry.
    pub fn from_value(value: &Value) -> Option<SerializedError> {
        Self::from_value_at(value, 0)
    }

    fn from_value_at(value: &Value, depth: usize) -> Option<SerializedError> {
        let obj = value.as_object()?;
        if !obj.contains_key("message") && !obj.contains_key("name") {
            return None;
        }
        let str_field = |key: &str| obj.get(key).and_then(Value::as_str).map(str::to_string);

        let mut out = SerializedError::new(
            str_field("name").unwrap_or_else(|| "Error".to_string()),
            str_field("message").unwrap_or_default(),
        );
        out.stack = str_field("stack");
        out.code = str_field("code");
        out.status_code = obj
            .get("statusCode")
            .and_then(Value::as_u64)
            .map(|v| v as u16);
        out.errno = obj.get("errno").and_then(Value::as_i64).map(|v| v as i32);
        out.syscall = str_field("syscall");
        out.path = str_field("path");
        out.address = str_field("address");
        out.port = obj.get("port").and_then(Value::as_u64).map(|v| v as u16);

        if depth + 1 < MAX_CAUSE_DEPTH {
            out.cause = match obj.get("cause") {
                Some(Value::String(s)) => Some(Box::new(SerializedError::new("Error", s))),
                Some(v) => Self::from_value_at(v, depth + 1).map(Box::new),
                None => None,
            };
        }
        Some(out)
    }

    /// Depth of this chain, counting `self`.
    pub fn chain_depth(&self) -> usize {
        let mut depth = 1;
        let mut cursor = self;
        while let Some(cause) = &cursor.cause {
            depth += 1;
            cursor = cause;
        }
        depth
    }
}

fn classify_name(err: &(dyn std::error::Error + 'static)) -> &'static str {
    if err.downcast_ref::<std::io::Error>().is_some() {
        "IoError"
    } else if err.downcast_ref::<std::fmt::Error>().is_some() {
        "FormatError"
    } else if err.downcast_ref::<serde_json::Error>().is_some() {
        "SerializationError"
    } else {
        "Error"
    }
}

#[cfg(test)]
pub(crate) fn test_record(level: LogLevel, namespace: Option<&str>) -> LogRecord {
    LogRecord {
        timestamp: vestig_common::runtime::rfc3339_now(),
        level,
        message: "test".to_string(),
        namespace: namespace.map(str::to_string),
        runtime: "server".to_string(),
        context: LogContext::default(),
        metadata: None,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::error::Error as StdError;
    use std::fmt;

    #[derive(Debug)]
    struct ChainError {
        label: &'static str,
        source: Option<Box<ChainError>>,
    }

    impl fmt::Display for ChainError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.label)
        }
    }

    impl StdError for ChainError {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            self.source
                .as_deref()
                .map(|e| e as &(dyn StdError + 'static))
        }
    }

    fn chain(labels: &[&'static str]) -> ChainError {
        let mut current: Option<Box<ChainError>> = None;
        for label in labels.iter().rev() {
            current = Some(Box::new(ChainError {
                label,
                source: current,
            }));
        }
        *current.unwrap()
    }

    #[test]
    fn serializes_cause_chain() {
        let err = chain(&["outer", "middle", "inner"]);
        let serialized = SerializedError::from_error(&err);
        assert_eq!(serialized.message, "outer");
        let middle = serialized.cause.as_ref().unwrap();
        assert_eq!(middle.message, "middle");
        let inner = middle.cause.as_ref().unwrap();
        assert_eq!(inner.message, "inner");
        assert!(inner.cause.is_none());
    }

    #[test]
    fn cause_chain_capped_at_ten() {
        let labels: Vec<&'static str> = (0..20)
            .map(|i| &*Box::leak(format!("level{i}").into_boxed_str()))
            .collect();
        let err = chain(&labels);
        let serialized = SerializedError::from_error(&err);
        assert_eq!(serialized.chain_depth(), 10);
    }

    #[test]
    fn io_error_carries_errno_and_code() {
        let io = std::io::Error::from_raw_os_error(2);
        let serialized = SerializedError::from_error(&io);
        assert_eq!(serialized.name, "IoError");
        assert_eq!(serialized.errno, Some(2));
        assert!(serialized.code.is_some());
    }

    #[test]
    fn from_value_lifts_well_known_fields() {
        let value = json!({
            "name": "DatabaseError",
            "message": "connection refused",
            "code": "ECONNREFUSED",
            "statusCode": 503,
            "syscall": "connect",
            "port": 5432,
            "cause": {"message": "socket closed"}
        });
        let serialized = SerializedError::from_value(&value).unwrap();
        assert_eq!(serialized.name, "DatabaseError");
        assert_eq!(serialized.code.as_deref(), Some("ECONNREFUSED"));
        assert_eq!(serialized.status_code, Some(503));
        assert_eq!(serialized.syscall.as_deref(), Some("connect"));
        assert_eq!(serialized.port, Some(5432));
        assert_eq!(serialized.cause.unwrap().message, "socket closed");
    }

    #[test]
    fn from_value_accepts_string_cause() {
        let value = json!({"message": "outer", "cause": "inner detail"});
        let serialized = SerializedError::from_value(&value).unwrap();
        assert_eq!(serialized.cause.unwrap().message, "inner detail");
    }

    #[test]
    fn from_value_rejects_non_error_shapes() {
        assert!(SerializedError::from_value(&json!("oops")).is_none());
        assert!(SerializedError::from_value(&json!({"status": 500})).is_none());
        assert!(SerializedError::from_value(&json!(null)).is_none());
    }

    #[test]
    fn record_json_shape() {
        let mut record = test_record(LogLevel::Info, Some("api:users"));
        record.metadata = Some(json!({"path": "/login"}));
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["level"], json!("info"));
        assert_eq!(value["namespace"], json!("api:users"));
        assert_eq!(value["runtime"], json!("server"));
        assert_eq!(value["metadata"]["path"], json!("/login"));
        // Empty optionals are omitted entirely.
        assert!(value.get("context").is_none());
        assert!(value.get("error").is_none());
    }

    #[test]
    fn record_round_trips_through_json() {
        let mut record = test_record(LogLevel::Warn, None);
        record.error = Some(SerializedError::new("Error", "bad"));
        let text = serde_json::to_string(&record).unwrap();
        let back: LogRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(back.level, LogLevel::Warn);
        assert_eq!(back.error.unwrap().message, "bad");
    }

    #[test]
    fn status_code_uses_camel_case_on_wire() {
        let mut err = SerializedError::new("HttpError", "bad gateway");
        err.status_code = Some(502);
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["statusCode"], json!(502));
    }
}
