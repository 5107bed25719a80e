// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Correlation identifiers and the W3C trace context header codecs.
//!
//! All parsers here are total: malformed input yields `None` or an empty
//! list, never an error.

use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::OnceLock;

/// Maximum number of `tracestate` entries carried or emitted.
pub const TRACESTATE_MAX_ENTRIES: usize = 32;

const TRACESTATE_MAX_KEY_LEN: usize = 256;
const TRACESTATE_MAX_VALUE_LEN: usize = 256;

/// Generate a 128-bit trace ID as 32 lowercase hex characters.
pub fn generate_trace_id() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Generate a 64-bit span ID as 16 lowercase hex characters.
pub fn generate_span_id() -> String {
    let mut bytes = [0u8; 8];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Generate a request identifier (UUIDv4).
pub fn generate_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A parsed `traceparent` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Traceparent {
    pub trace_id: String,
    pub span_id: String,
}

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Parse a W3C `traceparent` header.
///
/// Only version `00` is accepted; version `ff` and any other version, wrong
/// part counts, and wrong ID lengths are rejected. All-zero IDs and
/// uppercase hex are accepted even though the W3C spec disallows them —
/// deliberate leniency toward peers that emit them.
pub fn parse_traceparent(value: &str) -> Option<Traceparent> {
    let mut parts = value.trim().split('-');
    let version = parts.next()?;
    let trace_id = parts.next()?;
    let span_id = parts.next()?;
    let flags = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    if version != "00" {
        return None;
    }
    if trace_id.len() != 32 || !is_hex(trace_id) {
        return None;
    }
    if span_id.len() != 16 || !is_hex(span_id) {
        return None;
    }
    if flags.len() != 2 || !is_hex(flags) {
        return None;
    }

    Some(Traceparent {
        trace_id: trace_id.to_string(),
        span_id: span_id.to_string(),
    })
}

/// Render a `traceparent` header with the sampled flag set.
pub fn create_traceparent(trace_id: &str, span_id: &str) -> String {
    format!("00-{trace_id}-{span_id}-01")
}

/// One `tracestate` list member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracestateEntry {
    pub key: String,
    pub value: String,
}

impl TracestateEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

fn tracestate_key_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    #[allow(clippy::unwrap_used)]
    RE.get_or_init(|| {
        regex::Regex::new(r"^[a-z][a-z0-9_\-*/]*(@[a-z][a-z0-9_\-*/]*)?$").unwrap()
    })
}

fn valid_tracestate_key(key: &str) -> bool {
    key.len() <= TRACESTATE_MAX_KEY_LEN && tracestate_key_regex().is_match(key)
}

fn valid_tracestate_value(value: &str) -> bool {
    value.len() <= TRACESTATE_MAX_VALUE_LEN
        && value
            .bytes()
            .all(|b| b != b',' && b != b'=' && b >= 0x20 && b != 0x7f)
}

/// Parse a `tracestate` header into an ordered entry list.
///
/// Invalid members are discarded; at most [`TRACESTATE_MAX_ENTRIES`] valid
/// entries are kept, in header order.
pub fn parse_tracestate(value: &str) -> Vec<TracestateEntry> {
    let mut entries = Vec::new();
    for member in value.split(',') {
        if entries.len() >= TRACESTATE_MAX_ENTRIES {
            break;
        }
        let member = member.trim();
        if member.is_empty() {
            continue;
        }
        let Some((key, val)) = member.split_once('=') else {
            continue;
        };
        if valid_tracestate_key(key) && valid_tracestate_value(val) {
            entries.push(TracestateEntry::new(key, val));
        }
    }
    entries
}

/// Render an entry list as a `tracestate` header.
///
/// Invalid entries are skipped; output is capped at
/// [`TRACESTATE_MAX_ENTRIES`] members.
pub fn create_tracestate(entries: &[TracestateEntry]) -> String {
    entries
        .iter()
        .filter(|e| valid_tracestate_key(&e.key) && valid_tracestate_value(&e.value))
        .take(TRACESTATE_MAX_ENTRIES)
        .map(|e| format!("{}={}", e.key, e.value))
        .collect::<Vec<_>>()
        .join(",")
}

/// Set `key` to `value`: any existing entry with the key is removed and the
/// new entry is prepended, per the W3C mutation rules. The list is truncated
/// to [`TRACESTATE_MAX_ENTRIES`].
pub fn set_tracestate_value(
    entries: &[TracestateEntry],
    key: &str,
    value: &str,
) -> Vec<TracestateEntry> {
    let mut out = Vec::with_capacity(entries.len() + 1);
    out.push(TracestateEntry::new(key, value));
    out.extend(entries.iter().filter(|e| e.key != key).cloned());
    out.truncate(TRACESTATE_MAX_ENTRIES);
    out
}

/// Remove every entry with the given key.
pub fn delete_tracestate_key(entries: &[TracestateEntry], key: &str) -> Vec<TracestateEntry> {
    entries.iter().filter(|e| e.key != key).cloned().collect()
}

/// Look up the value for a key, if present.
pub fn get_tracestate_value<'a>(entries: &'a [TracestateEntry], key: &str) -> Option<&'a str> {
    entries
        .iter()
        .find(|e| e.key == key)
        .map(|e| e.value.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn trace_id_shape() {
        let id = generate_trace_id();
        assert_eq!(id.len(), 32);
        assert!(id.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
    }

    #[test]
    fn span_id_shape() {
        let id = generate_span_id();
        assert_eq!(id.len(), 16);
        assert!(id.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(generate_trace_id(), generate_trace_id());
        assert_ne!(generate_span_id(), generate_span_id());
        assert_ne!(generate_request_id(), generate_request_id());
    }

    #[test]
    fn request_id_is_uuid() {
        let id = generate_request_id();
        assert!(uuid::Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn parses_valid_traceparent() {
        let parsed =
            parse_traceparent("00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01").unwrap();
        assert_eq!(parsed.trace_id, "0af7651916cd43dd8448eb211c80319c");
        assert_eq!(parsed.span_id, "b7ad6b7169203331");
    }

    #[rstest]
    #[case("01-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01")] // wrong version
    #[case("ff-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01")] // forbidden version
    #[case("00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331")] // missing flags
    #[case("00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01-extra")] // extra part
    #[case("00-0af7651916cd43dd8448eb211c8031-b7ad6b7169203331-01")] // short trace id
    #[case("00-0af7651916cd43dd8448eb211c80319c-b7ad6b71692033-01")] // short span id
    #[case("00-0af7651916cd43dd8448eb211c80319g-b7ad6b7169203331-01")] // non-hex
    #[case("")]
    fn rejects_malformed_traceparent(#[case] input: &str) {
        assert!(parse_traceparent(input).is_none());
    }

    #[test]
    fn accepts_all_zero_and_uppercase_ids() {
        // Lenient by design.
        assert!(parse_traceparent(
            "00-00000000000000000000000000000000-0000000000000000-01"
        )
        .is_some());
        let parsed =
            parse_traceparent("00-0AF7651916CD43DD8448EB211C80319C-B7AD6B7169203331-01").unwrap();
        assert_eq!(parsed.trace_id, "0AF7651916CD43DD8448EB211C80319C");
    }

    #[test]
    fn traceparent_round_trip() {
        let tid = generate_trace_id();
        let sid = generate_span_id();
        let header = create_traceparent(&tid, &sid);
        let parsed = parse_traceparent(&header).unwrap();
        assert_eq!(parsed.trace_id, tid);
        assert_eq!(parsed.span_id, sid);
    }

    #[test]
    fn parses_tracestate_in_order() {
        let entries = parse_tracestate("vendor1=value1,vendor2@origin=value2");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], TracestateEntry::new("vendor1", "value1"));
        assert_eq!(entries[1], TracestateEntry::new("vendor2@origin", "value2"));
    }

    #[rstest]
    #[case("Vendor=value")] // uppercase key
    #[case("1vendor=value")] // leading digit
    #[case("=value")] // empty key
    #[case("vendor")] // no equals
    fn skips_invalid_tracestate_members(#[case] input: &str) {
        assert!(parse_tracestate(input).is_empty());
    }

    #[test]
    fn skips_values_with_forbidden_chars() {
        assert!(parse_tracestate("k=a\u{1}b").is_empty());
        // A comma inside a value splits the member, producing two invalid halves.
        assert!(parse_tracestate("k=a,b c").is_empty());
    }

    #[test]
    fn tracestate_entry_cap() {
        let header = (0..40)
            .map(|i| format!("key{i}=v"))
            .collect::<Vec<_>>()
            .join(",");
        let entries = parse_tracestate(&header);
        assert_eq!(entries.len(), TRACESTATE_MAX_ENTRIES);
        assert_eq!(entries[0].key, "key0");
    }

    #[test]
    fn tracestate_round_trip() {
        let entries = vec![
            TracestateEntry::new("congo", "t61rcwkgmzi"),
            TracestateEntry::new("rojo", "00f067aa0ba902b7"),
        ];
        let header = create_tracestate(&entries);
        assert_eq!(header, "congo=t61rcwkgmzi,rojo=00f067aa0ba902b7");
        assert_eq!(parse_tracestate(&header), entries);
    }

    #[test]
    fn set_value_prepends_and_dedups() {
        let entries = vec![
            TracestateEntry::new("a", "1"),
            TracestateEntry::new("b", "2"),
        ];
        let updated = set_tracestate_value(&entries, "b", "3");
        assert_eq!(updated[0], TracestateEntry::new("b", "3"));
        assert_eq!(updated[1], TracestateEntry::new("a", "1"));
        assert_eq!(updated.len(), 2);
    }

    #[test]
    fn set_value_truncates_to_cap() {
        let entries: Vec<_> = (0..TRACESTATE_MAX_ENTRIES)
            .map(|i| TracestateEntry::new(format!("key{i}"), "v"))
            .collect();
        let updated = set_tracestate_value(&entries, "fresh", "v");
        assert_eq!(updated.len(), TRACESTATE_MAX_ENTRIES);
        assert_eq!(updated[0].key, "fresh");
    }

    #[test]
    fn delete_and_get() {
        let entries = vec![
            TracestateEntry::new("a", "1"),
            TracestateEntry::new("b", "2"),
        ];
        assert_eq!(get_tracestate_value(&entries, "b"), Some("2"));
        assert_eq!(get_tracestate_value(&entries, "c"), None);
        let remaining = delete_tracestate_key(&entries, "a");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].key, "b");
    }
}
