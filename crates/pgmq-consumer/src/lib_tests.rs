//! Tests for the pgmq-consumer library module.

use super::*;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn queue(name: &str) -> QueueName {
    QueueName::new(name.to_string()).unwrap()
}

#[test]
fn test_event_names_are_reexported() {
    let names: Vec<&str> = [
        EventKind::Finish,
        EventKind::SendToDlq,
        EventKind::AbortError,
        EventKind::Error,
    ]
    .iter()
    .map(EventKind::as_str)
    .collect();

    assert_eq!(names, vec!["finish", "send-to-dlq", "abort-error", "error"]);
}

/// Verify that a consumer drains the in-memory driver end to end.
#[tokio::test]
async fn test_consumer_with_in_memory_driver() {
    let jobs = queue("jobs");
    let driver = InMemoryDriver::default();
    for n in 0..3 {
        driver
            .enqueue(&jobs, json!({ "n": n }).as_object().cloned().unwrap())
            .unwrap();
    }

    let handler: Arc<dyn MessageHandler> =
        Arc::new(|_payload: Payload, _cancel: CancellationToken| async {
            Ok::<_, anyhow::Error>(())
        });
    let options = ConsumerOptions::new(jobs.clone(), ConsumeType::Read)
        .with_visibility_time(30)
        .with_pool_size(5)
        .with_enabled_polling(false);

    let consumer = Consumer::new(options, handler, Arc::new(driver.clone())).unwrap();
    let mut events = consumer.subscribe();

    tokio_test::assert_ok!(consumer.start().await);

    assert_eq!(driver.queue_len(&jobs), 0);
    for _ in 0..3 {
        assert_eq!(events.recv().await.unwrap().kind(), EventKind::Finish);
    }
}

/// Verify that an exhausted message ends up in the dead-letter queue.
#[tokio::test]
async fn test_dead_letter_with_in_memory_driver() {
    let jobs = queue("jobs");
    let dead_letters = queue("jobs_dlq");
    let driver = InMemoryDriver::default();
    driver
        .enqueue(&jobs, json!({ "poison": true }).as_object().cloned().unwrap())
        .unwrap();

    // Deliver twice without acknowledging so the next read is the third
    driver.get(&jobs, 30, 1).await.unwrap();
    driver.expire_leases(&jobs).unwrap();
    driver.get(&jobs, 30, 1).await.unwrap();
    driver.expire_leases(&jobs).unwrap();

    let handler: Arc<dyn MessageHandler> =
        Arc::new(|_payload: Payload, _cancel: CancellationToken| async {
            Err::<(), _>(anyhow::anyhow!("handler must not run"))
        });
    let options = ConsumerOptions::new(jobs.clone(), ConsumeType::Read)
        .with_visibility_time(30)
        .with_enabled_polling(false)
        .with_dead_letter_queue(dead_letters.clone(), 2);

    let consumer = Consumer::new(options, handler, Arc::new(driver.clone())).unwrap();
    tokio_test::assert_ok!(consumer.start().await);

    assert_eq!(driver.queue_len(&jobs), 0);
    let forwarded = driver.messages(&dead_letters);
    assert_eq!(forwarded.len(), 1);
    assert_eq!(forwarded[0].payload.get("poison"), Some(&json!(true)));
}
