// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Host runtime detection and clock helpers.
//!
//! Detection runs once on first use and is cached for the life of the
//! process. Everything here is a feature query — there is no failure mode.

use serde::Serialize;
use std::sync::OnceLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Coarse classification of the host environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// A full server host: native OS, filesystem, process introspection.
    Server,
    /// An edge worker: wasm without a browser window.
    Edge,
    /// A browser: wasm with DOM bindings.
    Browser,
    /// Anything the probe could not classify.
    Unknown,
}

impl RuntimeKind {
    /// Short tag carried on every log record.
    pub fn tag(&self) -> &'static str {
        match self {
            RuntimeKind::Server => "server",
            RuntimeKind::Edge => "edge",
            RuntimeKind::Browser => "browser",
            RuntimeKind::Unknown => "unknown",
        }
    }
}

/// Optional feature flags of the host. Components read these instead of
/// probing on their own.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Capabilities {
    /// `Instant` is monotonic on this host.
    pub has_monotonic_clock: bool,
    /// Thread-local storage is available (the ambient context store).
    pub has_thread_locals: bool,
    /// Process introspection (pid, env) is available.
    pub has_process: bool,
    /// High-resolution timing is available.
    pub has_performance: bool,
    /// A console/stdio surface exists.
    pub has_console: bool,
    /// An OS CSPRNG is reachable.
    pub has_crypto: bool,
    /// A writable filesystem exists.
    pub has_filesystem: bool,
}

/// The cached probe result.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RuntimeInfo {
    pub kind: RuntimeKind,
    pub capabilities: Capabilities,
}

static RUNTIME: OnceLock<RuntimeInfo> = OnceLock::new();

/// The detected host runtime. Computed once, then cached.
pub fn runtime() -> &'static RuntimeInfo {
    RUNTIME.get_or_init(detect)
}

/// True when running on a full server host.
pub fn is_server() -> bool {
    runtime().kind == RuntimeKind::Server
}

/// True when running on an edge worker host.
pub fn is_edge() -> bool {
    runtime().kind == RuntimeKind::Edge
}

fn detect() -> RuntimeInfo {
    #[cfg(not(target_arch = "wasm32"))]
    {
        RuntimeInfo {
            kind: RuntimeKind::Server,
            capabilities: Capabilities {
                has_monotonic_clock: true,
                has_thread_locals: true,
                has_process: true,
                has_performance: true,
                has_console: true,
                has_crypto: true,
                has_filesystem: true,
            },
        }
    }
    #[cfg(target_arch = "wasm32")]
    {
        let kind = if cfg!(target_os = "emscripten") {
            RuntimeKind::Browser
        } else {
            RuntimeKind::Edge
        };
        RuntimeInfo {
            kind,
            capabilities: Capabilities {
                has_monotonic_clock: false,
                has_thread_locals: true,
                has_process: false,
                has_performance: false,
                has_console: true,
                has_crypto: true,
                has_filesystem: false,
            },
        }
    }
}

// Wall-clock anchor taken at first use; subsequent readings advance it by a
// monotonic delta so timestamps never go backwards under clock adjustment.
static CLOCK_ANCHOR: OnceLock<(Instant, Duration)> = OnceLock::new();

fn clock_anchor() -> &'static (Instant, Duration) {
    CLOCK_ANCHOR.get_or_init(|| {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        (Instant::now(), wall)
    })
}

/// Milliseconds since the Unix epoch.
///
/// Monotonic-anchored when the host has a monotonic clock, wall clock
/// otherwise.
pub fn now_unix_ms() -> u64 {
    if runtime().capabilities.has_monotonic_clock {
        let (start, wall) = clock_anchor();
        (*wall + start.elapsed()).as_millis() as u64
    } else {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis() as u64
    }
}

/// Monotonic milliseconds, suitable for measuring durations.
pub fn monotonic_ms() -> u64 {
    clock_anchor().0.elapsed().as_millis() as u64
}

/// The current UTC time as an RFC3339 string with millisecond precision.
pub fn rfc3339_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
