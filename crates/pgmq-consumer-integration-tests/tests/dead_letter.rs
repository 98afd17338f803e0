//! Integration tests for dead-letter routing
//!
//! These tests verify:
//! - Messages over the retry budget bypass the handler
//! - Forwarded messages carry the original payload and leave the source queue
//! - The retry comparison is strict
//! - Failed forwards leave the message in place

mod common;

use common::{
    build_consumer, deliver_unacknowledged, payload, queue, Behavior, EventLog, RecordingDriver,
    ScriptedHandler,
};
use pgmq_consumer::{
    ConsumeType, ConsumerError, ConsumerOptions, DriverError, DriverOperation, EventKind,
};
use serde_json::json;

fn options() -> ConsumerOptions {
    ConsumerOptions::new(queue("subscriptions"), ConsumeType::Read)
        .with_visibility_time(30)
        .with_pool_size(2)
        .with_enabled_polling(false)
        .with_dead_letter_queue(queue("subscriptions_dlq"), 2)
}

/// Verify that a batch of exhausted messages is forwarded without handler calls
#[tokio::test]
async fn test_exhausted_batch_is_forwarded() {
    let driver = RecordingDriver::default();
    let source = queue("subscriptions");
    for user in ["ada", "grace"] {
        driver
            .inner()
            .enqueue(&source, payload(json!({ "user": user })))
            .unwrap();
    }
    // Two unacknowledged deliveries of both messages; the next read is the third
    deliver_unacknowledged(driver.inner(), &source, 2).await;

    let handler = ScriptedHandler::new(Behavior::Succeed);
    let consumer = build_consumer(options(), &handler, &driver);
    let log = EventLog::attach(&consumer);

    tokio_test::assert_ok!(consumer.start().await);

    assert_eq!(handler.call_count(), 0);
    assert_eq!(log.count(EventKind::SendToDlq), 2);
    assert_eq!(driver.deletes().len(), 2);

    let sends = driver.sends();
    assert_eq!(sends.len(), 2);
    assert!(sends.iter().all(|(name, _)| name == "subscriptions_dlq"));

    assert_eq!(driver.inner().queue_len(&source), 0);
    assert_eq!(driver.inner().queue_len(&queue("subscriptions_dlq")), 2);
}

/// Verify that only the exhausted message of a mixed batch is forwarded
#[tokio::test]
async fn test_mixed_batch() {
    let driver = RecordingDriver::default();
    let source = queue("subscriptions");
    driver
        .inner()
        .enqueue(&source, payload(json!({ "user": "poison" })))
        .unwrap();
    deliver_unacknowledged(driver.inner(), &source, 2).await;
    driver
        .inner()
        .enqueue(&source, payload(json!({ "user": "fresh" })))
        .unwrap();

    let handler = ScriptedHandler::new(Behavior::Succeed);
    let consumer = build_consumer(options(), &handler, &driver);
    let log = EventLog::attach(&consumer);

    tokio_test::assert_ok!(consumer.start().await);

    assert_eq!(handler.call_count(), 1);
    assert_eq!(handler.payloads()[0].get("user"), Some(&json!("fresh")));
    assert_eq!(log.count(EventKind::SendToDlq), 1);
    assert_eq!(log.count(EventKind::Finish), 1);

    let sends = driver.sends();
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0].1.get("user"), Some(&json!("poison")));
}

/// Verify that a message read exactly the threshold number of times is handled
#[tokio::test]
async fn test_threshold_is_not_exceeded_at_equality() {
    let driver = RecordingDriver::default();
    let source = queue("subscriptions");
    driver
        .inner()
        .enqueue(&source, payload(json!({ "user": "borderline" })))
        .unwrap();
    deliver_unacknowledged(driver.inner(), &source, 1).await;

    let handler = ScriptedHandler::new(Behavior::Succeed);
    let consumer = build_consumer(options(), &handler, &driver);
    let log = EventLog::attach(&consumer);

    tokio_test::assert_ok!(consumer.start().await);

    assert_eq!(handler.call_count(), 1);
    assert!(driver.sends().is_empty());
    assert_eq!(log.count(EventKind::Finish), 1);
}

/// Verify that a failed forward is reported and the message stays leased
#[tokio::test]
async fn test_failed_forward_keeps_message() {
    let driver = RecordingDriver::default();
    let source = queue("subscriptions");
    driver
        .inner()
        .enqueue(&source, payload(json!({ "user": "poison" })))
        .unwrap();
    deliver_unacknowledged(driver.inner(), &source, 2).await;
    driver
        .inner()
        .fail_next(
            DriverOperation::Send,
            DriverError::ConnectionFailed {
                message: "connection reset".to_string(),
            },
        )
        .unwrap();

    let handler = ScriptedHandler::new(Behavior::Succeed);
    let consumer = build_consumer(options(), &handler, &driver);
    let log = EventLog::attach(&consumer);

    let error = tokio_test::assert_err!(consumer.start().await);

    assert!(matches!(*error, ConsumerError::Driver(_)));
    assert_eq!(log.count(EventKind::Error), 1);
    assert_eq!(log.count(EventKind::SendToDlq), 0);
    assert!(driver.deletes().is_empty());
    assert_eq!(driver.inner().queue_len(&source), 1);
}
