// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Retry semantics of the HTTP transport against a mock collector.

use httpmock::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use vestig::{
    BatchConfig, BatchHooks, HttpTransport, HttpTransportConfig, LogLevel, Logger, LoggerConfig,
    RetryConfig, Transport, TransportError,
};

fn transport_for(server: &MockServer, hooks: BatchHooks) -> Arc<HttpTransport> {
    let mut config = HttpTransportConfig::new(server.url("/logs"));
    config.batch = Some(
        BatchConfig::new()
            .batch_size(50)
            .flush_interval(Duration::from_secs(3600))
            .retry(
                RetryConfig::new()
                    .max_retries(3)
                    .retry_delay(Duration::from_millis(10))
                    .with_jitter(false),
            ),
    );
    config.hooks = hooks;
    Arc::new(HttpTransport::new(config).unwrap())
}

fn logger_with(transport: Arc<HttpTransport>) -> Logger {
    Logger::new(LoggerConfig {
        level: Some(LogLevel::Trace),
        transports: vec![transport as Arc<dyn Transport>],
        ..Default::default()
    })
    .unwrap()
}

#[tokio::test]
async fn three_attempts_then_requeue_and_single_error_hook() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/logs");
            then.status(500).body("internal error");
        })
        .await;

    let flush_errors = Arc::new(AtomicU32::new(0));
    let hook_errors = flush_errors.clone();
    let hooks = BatchHooks {
        on_flush_error: Some(Arc::new(move |_, _| {
            hook_errors.fetch_add(1, Ordering::SeqCst);
        })),
        on_drop: None,
    };
    let transport = transport_for(&server, hooks);
    let logger = logger_with(transport.clone());

    logger.info("first", None);
    logger.info("second", None);

    let err = logger.flush().await.unwrap_err();
    assert!(matches!(err, TransportError::Http { status: 500, .. }));

    // Three consecutive 500s: three send attempts, one final failure, the
    // batch back at the head of the buffer.
    mock.assert_calls_async(3).await;
    assert_eq!(flush_errors.load(Ordering::SeqCst), 1);
    let stats = transport.stats();
    assert_eq!(stats.buffered, 2);
    assert_eq!(stats.failed_flushes, 1);
    assert_eq!(stats.sent, 0);
}

#[tokio::test]
async fn recovery_drains_in_enqueue_order() {
    let server = MockServer::start_async().await;
    let mut failing = server
        .mock_async(|when, then| {
            when.method(POST).path("/logs");
            then.status(503).body("unavailable");
        })
        .await;

    let transport = transport_for(&server, BatchHooks::default());
    let logger = logger_with(transport.clone());
    logger.info("first", None);
    logger.info("second", None);
    assert!(logger.flush().await.is_err());
    failing.delete_async().await;

    let success = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/logs")
                .body_includes("\"message\":\"first\"")
                .body_includes("\"message\":\"second\"")
                .body_includes("\"message\":\"third\"");
            then.status(202);
        })
        .await;

    logger.info("third", None);
    logger.flush().await.unwrap();

    // One request carrying all three records: the requeued batch drains
    // ahead of the new record.
    success.assert_async().await;
    assert_eq!(transport.stats().sent, 3);
    assert_eq!(transport.stats().buffered, 0);
}

#[tokio::test]
async fn non_retryable_status_drops_batch_after_one_attempt() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/logs");
            then.status(401).body("bad auth");
        })
        .await;

    let dropped = Arc::new(AtomicU32::new(0));
    let hook_dropped = dropped.clone();
    let hooks = BatchHooks {
        on_flush_error: None,
        on_drop: Some(Arc::new(move |n| {
            hook_dropped.fetch_add(n as u32, Ordering::SeqCst);
        })),
    };
    let transport = transport_for(&server, hooks);
    let logger = logger_with(transport.clone());

    logger.info("gone", None);
    let err = logger.flush().await.unwrap_err();
    assert!(!err.is_retryable());

    mock.assert_calls_async(1).await;
    assert_eq!(dropped.load(Ordering::SeqCst), 1);
    assert_eq!(transport.stats().buffered, 0);
    assert_eq!(transport.stats().dropped, 1);
}

#[tokio::test]
async fn rate_limited_status_is_retried() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/logs");
            then.status(429).body("slow down");
        })
        .await;

    let transport = transport_for(&server, BatchHooks::default());
    let logger = logger_with(transport.clone());
    logger.info("throttled", None);
    assert!(logger.flush().await.is_err());

    mock.assert_calls_async(3).await;
    // Still buffered for the next flush.
    assert_eq!(transport.stats().buffered, 1);
}

#[tokio::test]
async fn destroy_after_success_is_clean() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/logs");
            then.status(200);
        })
        .await;

    let transport = transport_for(&server, BatchHooks::default());
    let logger = logger_with(transport.clone());
    logger.info("final", None);
    logger.destroy().await.unwrap();

    mock.assert_calls_async(1).await;
    assert_eq!(transport.stats().sent, 1);

    // Destroyed transports ignore further records.
    logger.info("late", None);
    assert_eq!(transport.stats().buffered, 0);
}
