//! Topic provisioning through the admin gateway

mod common;

use broker_relay::topics::{ConfigEntry, TopicTemplate};
use broker_relay::{BrokerError, MemoryBroker, NotifyLevel, OrgUsrNode};
use common::context;
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;

fn specs(names: &[&str]) -> Vec<broker_relay::topics::TopicSpec> {
    let template = TopicTemplate::default();
    names.iter().map(|n| template.spec(*n)).collect()
}

#[tokio::test]
async fn test_ensure_topics_is_idempotent() {
    let broker = MemoryBroker::new();
    let (context, _) = context(&broker);
    let wanted = specs(&["cam-1_detections", "cam-1_associations"]);

    let first = context.admin().ensure_topics(&wanted).await.unwrap();
    let second = context.admin().ensure_topics(&wanted).await.unwrap();

    assert_eq!(first.requested, vec!["cam-1_detections", "cam-1_associations"]);
    assert!(second.requested.is_empty());
    assert!(!second.created_any());
    assert_eq!(broker.create_batches().len(), 1);
}

#[tokio::test]
async fn test_only_missing_topics_are_requested() {
    let broker = MemoryBroker::new().with_topics(["cam-1_detections"]);
    let (context, _) = context(&broker);

    let report = context
        .admin()
        .ensure_topics(&specs(&["cam-1_detections", "cam-1_associations"]))
        .await
        .unwrap();

    assert_eq!(report.requested, vec!["cam-1_associations"]);
    assert_eq!(broker.create_batches(), vec![vec!["cam-1_associations".to_string()]]);
}

#[tokio::test]
async fn test_created_topics_carry_template_config() {
    let broker = MemoryBroker::new();
    let (context, _) = context(&broker);

    context
        .admin()
        .ensure_topics(&specs(&["cam-1_detections"]))
        .await
        .unwrap();

    let config = broker.topic_config("cam-1_detections").unwrap();
    assert_eq!(config["retention.ms"], "1080000");
    assert_eq!(config["segment.ms"], "1080000");
    assert_eq!(config["max.message.bytes"], "521048588");
    assert_eq!(config["delete.retention.ms"], "86400000");
}

#[tokio::test]
async fn test_concurrent_ensures_never_surface_duplicates() {
    let broker = MemoryBroker::new();
    let (context, _) = context(&broker);
    let wanted = specs(&["cam-9_detections", "cam-9_associations"]);

    let (a, b) = tokio::join!(
        context.admin().ensure_topics(&wanted),
        context.admin().ensure_topics(&wanted)
    );

    assert!(a.is_ok());
    assert!(b.is_ok());
    assert!(broker.topics().contains("cam-9_detections"));
    assert!(broker.topics().contains("cam-9_associations"));
}

#[tokio::test]
async fn test_already_exists_race_is_success() {
    let broker = MemoryBroker::new();
    let (context, notifier) = context(&broker);
    broker.simulate_create_race(true);

    let report = context
        .admin()
        .ensure_topics(&specs(&["cam-2_detections"]))
        .await
        .unwrap();

    assert_eq!(report.already_existed, vec!["cam-2_detections"]);
    assert_eq!(notifier.count("ADMIN_GATEWAY", NotifyLevel::Error), 0);
}

#[tokio::test]
async fn test_create_failure_is_reported() {
    let broker = MemoryBroker::new();
    let (context, notifier) = context(&broker);
    broker.fail_next_creates(1);

    let result = context
        .admin()
        .ensure_topics(&specs(&["cam-3_detections"]))
        .await;

    assert!(matches!(result, Err(BrokerError::TopicProvision(_))));
    assert_eq!(notifier.count("ADMIN_GATEWAY", NotifyLevel::Error), 1);
}

#[tokio::test]
async fn test_admin_connect_failure_is_not_retried_internally() {
    let broker = MemoryBroker::new();
    let (context, _) = context(&broker);
    broker.fail_next_admin_connects(1);

    assert!(context.admin().list_topics().await.is_err());
    assert!(!context.admin().is_connected().await);

    assert!(context.admin().list_topics().await.is_ok());
    assert!(context.admin().is_connected().await);
}

#[tokio::test]
async fn test_invalid_spec_is_rejected_before_any_call() {
    let broker = MemoryBroker::new();
    let (context, _) = context(&broker);

    let mut spec = TopicTemplate::default().spec("bad");
    spec.partitions = 0;

    let result = context.admin().ensure_topics(&[spec]).await;
    assert!(matches!(result, Err(BrokerError::Config(_))));
    assert_eq!(broker.stats().admin_connects, 0);
}

#[tokio::test]
async fn test_delete_and_alter_retention_are_best_effort() {
    let broker = MemoryBroker::new().with_topics(["a", "b"]);
    let (context, _) = context(&broker);

    assert!(context.admin().delete_topic("a").await);
    assert!(!context.admin().delete_topic("missing").await);

    assert!(
        context
            .admin()
            .alter_retention(&[ConfigEntry::new("retention.ms", 60_000)])
            .await
    );
    assert_eq!(broker.topic_config("b").unwrap()["retention.ms"], "60000");
}

#[tokio::test]
async fn test_flow_topics_and_creation() {
    let broker = MemoryBroker::new().with_topics(["cam-1_detections", "x-y-z-topic"]);
    let (context, _) = context(&broker);
    let node = OrgUsrNode::parse("acme-jane-wf1").unwrap();

    assert!(context.admin().create_flow_topic(&node, 3, 1).await);
    assert!(context.admin().create_flow_topic(&node, 3, 1).await);
    assert_eq!(broker.create_batches().len(), 1);

    let all: BTreeSet<_> = context
        .admin()
        .flow_topics(None)
        .await
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(
        all,
        BTreeSet::from(["acme-jane-wf1-topic".to_string(), "x-y-z-topic".to_string()])
    );

    let mine = context.admin().flow_topics(Some(&node)).await.unwrap();
    assert_eq!(mine, vec!["acme-jane-wf1-topic"]);

    let metadata = context
        .admin()
        .topic_metadata(&["acme-jane-wf1-topic".to_string()])
        .await
        .unwrap();
    assert_eq!(metadata[0].partitions, 3);
    assert_eq!(
        broker.topic_config("acme-jane-wf1-topic").unwrap()["cleanup.policy"],
        "delete"
    );
}

#[tokio::test]
async fn test_flow_topic_filter_matches_the_whole_key() {
    let broker = MemoryBroker::new().with_topics([
        "acme-jane-wf1-topic",
        "acme-jane-wf10-topic",
        "acme-jane-wf1-topic-archive",
    ]);
    let (context, _) = context(&broker);
    let node = OrgUsrNode::parse("acme-jane-wf1").unwrap();

    let mine = context.admin().flow_topics(Some(&node)).await.unwrap();
    assert_eq!(mine, vec!["acme-jane-wf1-topic"]);
}
