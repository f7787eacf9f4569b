//! Topic specifications and the topic naming convention
//!
//! Per-entity data lives on `{entity}_detections` and `{entity}_associations`;
//! workflow output lives on `{org}-{user}-{workflow}-topic`. Routing depends on
//! these names, so producers built against this crate must follow them.

use crate::error::{BrokerError, BrokerResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Suffix of per-entity detection topics
pub const DETECTIONS_SUFFIX: &str = "_detections";
/// Suffix of per-entity association topics
pub const ASSOCIATIONS_SUFFIX: &str = "_associations";
/// Suffix of workflow output topics
pub const FLOW_TOPIC_SUFFIX: &str = "-topic";

/// Topics consumed by name by the business consumer
pub const BUSINESS_TOPICS: &[&str] = &[
    "alerts",
    "alert_person_search_response",
    "biometric_data_based_search_response",
    "non_biometric_data_based_search_response",
    "avatar_based_search_response",
    "mixed_data_based_search_response",
    "video_analytics_configuration_response",
];

/// Detection topic for an entity
pub fn detections_topic(entity_id: &str) -> String {
    format!("{}{}", entity_id, DETECTIONS_SUFFIX)
}

/// Association topic for an entity
pub fn associations_topic(entity_id: &str) -> String {
    format!("{}{}", entity_id, ASSOCIATIONS_SUFFIX)
}

/// Both per-entity topics, detections first
pub fn entity_topics(entity_id: &str) -> Vec<String> {
    vec![detections_topic(entity_id), associations_topic(entity_id)]
}

/// A single `name=value` topic configuration entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    /// Config name, e.g. `retention.ms`
    pub name: String,
    /// Config value
    pub value: String,
}

impl ConfigEntry {
    pub fn new(name: impl Into<String>, value: impl ToString) -> Self {
        Self {
            name: name.into(),
            value: value.to_string(),
        }
    }
}

/// A topic creation request. Never mutated once submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSpec {
    /// Topic name
    pub name: String,
    /// Partition count, at least 1
    pub partitions: i32,
    /// Replication factor, at least 1
    pub replication_factor: i32,
    /// `retention.ms`
    pub retention_ms: i64,
    /// `segment.ms`
    pub segment_ms: i64,
    /// `max.message.bytes`, broker default when absent
    pub max_message_bytes: Option<i64>,
    /// Further entries, applied after the typed ones
    #[serde(default)]
    pub extra: Vec<ConfigEntry>,
}

impl TopicSpec {
    /// Validate partition and replica counts
    pub fn validate(&self) -> BrokerResult<()> {
        if self.name.is_empty() {
            return Err(BrokerError::Config("Topic name cannot be empty".to_string()));
        }
        if self.partitions < 1 {
            return Err(BrokerError::Config(format!(
                "Topic '{}' needs at least one partition",
                self.name
            )));
        }
        if self.replication_factor < 1 {
            return Err(BrokerError::Config(format!(
                "Topic '{}' needs a replication factor of at least 1",
                self.name
            )));
        }
        Ok(())
    }

    /// All config entries in submission order
    pub fn config_entries(&self) -> Vec<ConfigEntry> {
        let mut entries = vec![
            ConfigEntry::new("retention.ms", self.retention_ms),
            ConfigEntry::new("segment.ms", self.segment_ms),
        ];
        if let Some(max) = self.max_message_bytes {
            entries.push(ConfigEntry::new("max.message.bytes", max));
        }
        entries.extend(self.extra.iter().cloned());
        entries
    }
}

/// Configuration shared by every topic of one kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicTemplate {
    pub partitions: i32,
    pub replication_factor: i32,
    pub retention_ms: i64,
    pub segment_ms: i64,
    pub max_message_bytes: Option<i64>,
    #[serde(default)]
    pub extra: Vec<ConfigEntry>,
}

impl Default for TopicTemplate {
    /// Ephemeral per-entity camera data: 18 minutes retention, large messages
    fn default() -> Self {
        Self {
            partitions: 1,
            replication_factor: 1,
            retention_ms: 1_080_000,
            segment_ms: 1_080_000,
            max_message_bytes: Some(521_048_588),
            extra: vec![
                ConfigEntry::new("segment.bytes", 1_073_741_824i64),
                ConfigEntry::new("delete.retention.ms", 86_400_000i64),
                ConfigEntry::new("segment.index.bytes", 10_485_760i64),
            ],
        }
    }
}

impl TopicTemplate {
    /// Workflow output topics: one day retention, hourly segments
    pub fn flow(partitions: i32, replication_factor: i32) -> Self {
        Self {
            partitions,
            replication_factor,
            retention_ms: 86_400_000,
            segment_ms: 3_600_000,
            max_message_bytes: None,
            extra: vec![ConfigEntry::new("cleanup.policy", "delete")],
        }
    }

    /// Instantiate a spec for `name`
    pub fn spec(&self, name: impl Into<String>) -> TopicSpec {
        TopicSpec {
            name: name.into(),
            partitions: self.partitions,
            replication_factor: self.replication_factor,
            retention_ms: self.retention_ms,
            segment_ms: self.segment_ms,
            max_message_bytes: self.max_message_bytes,
            extra: self.extra.clone(),
        }
    }
}

/// Composite `organization-user-workflow` key of a workflow instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrgUsrNode(String);

impl OrgUsrNode {
    /// Build from its three parts; parts may not contain `-`
    pub fn from_parts(org: &str, user: &str, workflow: &str) -> BrokerResult<Self> {
        for part in [org, user, workflow] {
            if part.is_empty() || part.contains('-') {
                return Err(BrokerError::Config(format!(
                    "Invalid org/user/workflow component '{}'",
                    part
                )));
            }
        }
        Ok(Self(format!("{}-{}-{}", org, user, workflow)))
    }

    /// Parse a key, accepting anything with at least three `-`-separated parts
    pub fn parse(key: &str) -> BrokerResult<Self> {
        let parts = key.split('-').collect::<Vec<_>>();
        if parts.len() < 3 || parts.iter().any(|p| p.is_empty()) {
            return Err(BrokerError::Config(format!(
                "'{}' is not an organization-user-workflow key",
                key
            )));
        }
        Ok(Self(key.to_string()))
    }

    /// Recover the key from a workflow output topic name
    pub fn from_topic(topic: &str) -> Option<Self> {
        topic
            .strip_suffix(FLOW_TOPIC_SUFFIX)
            .and_then(|key| Self::parse(key).ok())
    }

    /// Output topic of this workflow
    pub fn topic_name(&self) -> String {
        format!("{}{}", self.0, FLOW_TOPIC_SUFFIX)
    }

    /// Whether `topic` is the output topic of this key
    pub fn owns_topic(&self, topic: &str) -> bool {
        topic.strip_suffix(FLOW_TOPIC_SUFFIX) == Some(self.as_str())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrgUsrNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for OrgUsrNode {
    type Error = BrokerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<OrgUsrNode> for String {
    fn from(value: OrgUsrNode) -> Self {
        value.0
    }
}
