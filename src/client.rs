//! Broker client abstraction
//!
//! Gateways and sessions talk to the broker only through these traits. The
//! `kafka` feature provides an rdkafka-backed implementation; [`crate::memory`]
//! provides an in-process one.

use crate::error::BrokerResult;
use crate::topics::{ConfigEntry, TopicSpec};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// A record as delivered by the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Where a produced record landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub partition: i32,
    pub offset: i64,
}

/// Per-topic outcome of an admin batch call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicStatus {
    Done,
    AlreadyExists,
    UnknownTopic,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicOutcome {
    pub topic: String,
    pub status: TopicStatus,
}

impl TopicOutcome {
    pub fn new(topic: impl Into<String>, status: TopicStatus) -> Self {
        Self {
            topic: topic.into(),
            status,
        }
    }
}

/// Partition layout of one topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMetadata {
    pub name: String,
    pub partitions: usize,
}

/// Options for a consumer-group connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerOptions {
    pub group_id: String,
    /// Start from the earliest retained offset instead of the latest
    pub from_beginning: bool,
}

/// Factory for broker connections
#[async_trait]
pub trait BrokerClient: Send + Sync + 'static {
    /// Establish a cluster metadata connection
    async fn connect_admin(&self) -> BrokerResult<Arc<dyn AdminConnection>>;

    /// Establish a producer connection
    async fn connect_producer(&self) -> BrokerResult<Arc<dyn ProducerConnection>>;

    /// Create an unconnected consumer-group connection
    fn consumer(&self, options: ConsumerOptions) -> BrokerResult<Box<dyn ConsumerConnection>>;
}

/// Cluster metadata and topic management
#[async_trait]
pub trait AdminConnection: Send + Sync {
    async fn list_topics(&self) -> BrokerResult<Vec<String>>;

    /// Submit every spec in one batch and wait for leaders
    async fn create_topics(&self, specs: &[TopicSpec]) -> BrokerResult<Vec<TopicOutcome>>;

    async fn delete_topics(&self, names: &[String]) -> BrokerResult<Vec<TopicOutcome>>;

    /// Apply the same entries to each named topic
    async fn alter_topic_configs(
        &self,
        names: &[String],
        entries: &[ConfigEntry],
    ) -> BrokerResult<Vec<TopicOutcome>>;

    async fn topic_metadata(&self, names: &[String]) -> BrokerResult<Vec<TopicMetadata>>;

    async fn disconnect(&self) -> BrokerResult<()>;
}

/// Send path
#[async_trait]
pub trait ProducerConnection: Send + Sync {
    async fn send(&self, topic: &str, key: Option<&[u8]>, payload: &[u8]) -> BrokerResult<Delivery>;

    /// Flush and release
    async fn disconnect(&self) -> BrokerResult<()>;
}

/// One consumer-group connection, owned by a single session
#[async_trait]
pub trait ConsumerConnection: Send {
    async fn connect(&mut self) -> BrokerResult<()>;

    async fn subscribe(&mut self, topics: &[String]) -> BrokerResult<()>;

    /// Next record; `None` when the stream ended, `Err` when it broke
    async fn next_record(&mut self) -> Option<BrokerResult<RawRecord>>;

    async fn disconnect(&mut self) -> BrokerResult<()>;
}
