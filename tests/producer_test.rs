//! Bounded retries of the producer gateway

mod common;

use broker_relay::{BrokerError, MemoryBroker, NotifyLevel, OrgUsrNode};
use bytes::Bytes;
use common::context;
use pretty_assertions::assert_eq;
use rstest::rstest;
use serde_json::json;
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_healthy_send_uses_one_attempt() {
    let broker = MemoryBroker::new();
    let (context, notifier) = context(&broker);

    let delivery = context
        .producer()
        .send("hello", "orders-topic", Some(Bytes::from_static(b"k")))
        .await
        .unwrap();

    assert_eq!(delivery.offset, 0);
    assert_eq!(broker.stats().send_attempts, 1);
    assert_eq!(broker.stats().producer_connects, 1);
    assert!(notifier.entries().is_empty());

    let records = broker.records("orders-topic");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].key.as_deref(), Some(&b"k"[..]));
    assert_eq!(records[0].value.as_deref(), Some(&b"hello"[..]));
}

#[tokio::test]
async fn test_connection_is_reused_between_sends() {
    let broker = MemoryBroker::new();
    let (context, _) = context(&broker);

    for i in 0..5 {
        context
            .producer()
            .send(format!("message {}", i), "orders-topic", None)
            .await
            .unwrap();
    }

    assert_eq!(broker.stats().producer_connects, 1);
    assert_eq!(context.producer().connections_established(), 1);
    assert_eq!(broker.records("orders-topic").len(), 5);
}

#[tokio::test]
async fn test_two_failures_then_success_reconnects_twice() {
    let broker = MemoryBroker::new();
    let (context, notifier) = context(&broker);
    broker.fail_next_sends(2);

    let started = Instant::now();
    let result = context.producer().send("payload", "orders-topic", None).await;

    assert!(result.is_ok());
    assert!(started.elapsed() >= Duration::from_millis(20));
    assert_eq!(broker.stats().send_attempts, 3);
    assert_eq!(broker.stats().producer_connects, 3);
    assert_eq!(notifier.count("PRODUCER_GATEWAY", NotifyLevel::Error), 2);
    assert_eq!(context.metrics().snapshot().send_retries, 2);
    assert_eq!(context.metrics().snapshot().sends_ok, 1);
}

#[rstest]
#[case(0, 1)]
#[case(1, 2)]
#[case(2, 3)]
#[tokio::test]
async fn test_fewer_than_three_failures_succeed(#[case] failures: u32, #[case] attempts: u64) {
    let broker = MemoryBroker::new();
    let (context, _) = context(&broker);
    broker.fail_next_sends(failures);

    context
        .producer()
        .send("payload", "orders-topic", None)
        .await
        .unwrap();

    assert_eq!(broker.stats().send_attempts, attempts);
    assert_eq!(broker.records("orders-topic").len(), 1);
}

#[rstest]
#[case(3)]
#[case(4)]
#[case(10)]
#[tokio::test]
async fn test_three_or_more_failures_return_the_last_error(#[case] failures: u32) {
    let broker = MemoryBroker::new();
    let (context, notifier) = context(&broker);
    broker.fail_next_sends(failures);

    let result = context.producer().send("payload", "orders-topic", None).await;

    match result {
        Err(BrokerError::Send(message)) => assert!(message.contains("orders-topic")),
        other => panic!("expected a send error, got {:?}", other),
    }
    assert_eq!(broker.stats().send_attempts, 3);
    assert!(broker.records("orders-topic").is_empty());
    assert_eq!(context.metrics().snapshot().sends_failed, 1);
    assert_eq!(notifier.count("PRODUCER_GATEWAY", NotifyLevel::Error), 3);
}

#[tokio::test]
async fn test_connect_failures_count_as_attempts() {
    let broker = MemoryBroker::new();
    let (context, _) = context(&broker);
    broker.fail_next_producer_connects(3);

    let result = context.producer().send("payload", "orders-topic", None).await;
    assert!(matches!(result, Err(BrokerError::Connect(_))));
    assert_eq!(broker.stats().send_attempts, 0);

    context
        .producer()
        .send("payload", "orders-topic", None)
        .await
        .unwrap();
    assert_eq!(broker.stats().producer_connects, 1);
}

#[tokio::test]
async fn test_empty_topic_is_rejected_without_attempts() {
    let broker = MemoryBroker::new();
    let (context, _) = context(&broker);

    let result = context.producer().send("payload", "", None).await;
    assert!(matches!(result, Err(BrokerError::Config(_))));
    assert_eq!(broker.stats().producer_connects, 0);
}

#[tokio::test]
async fn test_send_to_flow_topic_keys_by_node() {
    let broker = MemoryBroker::new();
    let (context, _) = context(&broker);
    let node = OrgUsrNode::from_parts("acme", "jane", "wf1").unwrap();

    context
        .producer()
        .send_to_flow_topic(&node, &json!({"result": 42}))
        .await
        .unwrap();

    let records = broker.records("acme-jane-wf1-topic");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].key.as_deref(), Some(&b"acme-jane-wf1"[..]));
    let value: serde_json::Value =
        serde_json::from_slice(records[0].value.as_deref().unwrap()).unwrap();
    assert_eq!(value, json!({"result": 42}));
}

#[tokio::test]
async fn test_disconnect_then_send_reconnects() {
    let broker = MemoryBroker::new();
    let (context, _) = context(&broker);

    context.producer().send("a", "orders-topic", None).await.unwrap();
    context.producer().disconnect().await;
    context.producer().send("b", "orders-topic", None).await.unwrap();

    assert_eq!(broker.stats().producer_connects, 2);
}
