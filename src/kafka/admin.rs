use super::{blocking, METADATA_TIMEOUT, OPERATION_TIMEOUT};
use crate::client::{AdminConnection, TopicMetadata, TopicOutcome, TopicStatus};
use crate::error::{BrokerError, BrokerResult};
use crate::topics::{ConfigEntry, TopicSpec};
use async_trait::async_trait;
use rdkafka::admin::{
    AdminClient, AdminOptions, AlterConfig, NewTopic, OwnedResourceSpecifier, ResourceSpecifier,
    TopicReplication,
};
use rdkafka::client::DefaultClientContext;
use rdkafka::metadata::Metadata;
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::ClientConfig;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Longest wait for new partitions to elect a leader
const LEADER_WAIT: Duration = Duration::from_secs(10);

type Admin = AdminClient<DefaultClientContext>;

/// Cluster metadata connection
pub struct KafkaAdmin {
    client: Arc<Admin>,
}

impl KafkaAdmin {
    /// Create the client and prove the cluster is reachable
    pub async fn connect(config: ClientConfig) -> BrokerResult<Self> {
        let client: Admin = config
            .create()
            .map_err(|e| BrokerError::Connect(format!("Failed to create admin client: {}", e)))?;
        let admin = Self {
            client: Arc::new(client),
        };
        admin
            .metadata(None)
            .await
            .map_err(|e| BrokerError::Connect(e.to_string()))?;
        Ok(admin)
    }

    async fn metadata(&self, topic: Option<String>) -> BrokerResult<Metadata> {
        let client = self.client.clone();
        blocking(move || {
            client
                .inner()
                .fetch_metadata(topic.as_deref(), METADATA_TIMEOUT)
                .map_err(|e| BrokerError::Admin(format!("Failed to fetch metadata: {}", e)))
        })
        .await
    }

    fn options() -> AdminOptions {
        AdminOptions::new().operation_timeout(Some(OPERATION_TIMEOUT))
    }

    /// Poll metadata until every partition of `names` has a leader
    async fn wait_for_leaders(&self, names: &[String]) {
        let deadline = Instant::now() + LEADER_WAIT;
        loop {
            let ready = match self.metadata(None).await {
                Ok(metadata) => {
                    let led: HashSet<&str> = metadata
                        .topics()
                        .iter()
                        .filter(|t| {
                            !t.partitions().is_empty() && t.partitions().iter().all(|p| p.leader() >= 0)
                        })
                        .map(|t| t.name())
                        .collect();
                    names.iter().all(|n| led.contains(n.as_str()))
                }
                Err(e) => {
                    debug!(error = %e, "Metadata poll failed while waiting for leaders");
                    false
                }
            };

            if ready {
                return;
            }
            if Instant::now() >= deadline {
                warn!(topics = ?names, "Leaders not elected within {:?}", LEADER_WAIT);
                return;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }
}

fn status_of(code: RDKafkaErrorCode) -> TopicStatus {
    match code {
        RDKafkaErrorCode::TopicAlreadyExists => TopicStatus::AlreadyExists,
        RDKafkaErrorCode::UnknownTopicOrPartition | RDKafkaErrorCode::UnknownTopic => {
            TopicStatus::UnknownTopic
        }
        other => TopicStatus::Failed(other.to_string()),
    }
}

#[async_trait]
impl AdminConnection for KafkaAdmin {
    async fn list_topics(&self) -> BrokerResult<Vec<String>> {
        let metadata = self.metadata(None).await?;
        Ok(metadata
            .topics()
            .iter()
            .map(|t| t.name().to_string())
            .filter(|name| !name.starts_with("__"))
            .collect())
    }

    async fn create_topics(&self, specs: &[TopicSpec]) -> BrokerResult<Vec<TopicOutcome>> {
        let entries: Vec<Vec<ConfigEntry>> = specs.iter().map(TopicSpec::config_entries).collect();
        let topics: Vec<NewTopic<'_>> = specs
            .iter()
            .zip(&entries)
            .map(|(spec, entries)| {
                entries.iter().fold(
                    NewTopic::new(
                        &spec.name,
                        spec.partitions,
                        TopicReplication::Fixed(spec.replication_factor),
                    ),
                    |topic, entry| topic.set(&entry.name, &entry.value),
                )
            })
            .collect();

        let results = self.client.create_topics(&topics, &Self::options()).await?;
        let outcomes: Vec<TopicOutcome> = results
            .into_iter()
            .map(|result| match result {
                Ok(name) => TopicOutcome::new(name, TopicStatus::Done),
                Err((name, code)) => TopicOutcome::new(name, status_of(code)),
            })
            .collect();

        let created: Vec<String> = outcomes
            .iter()
            .filter(|o| matches!(o.status, TopicStatus::Done | TopicStatus::AlreadyExists))
            .map(|o| o.topic.clone())
            .collect();
        if !created.is_empty() {
            self.wait_for_leaders(&created).await;
        }
        Ok(outcomes)
    }

    async fn delete_topics(&self, names: &[String]) -> BrokerResult<Vec<TopicOutcome>> {
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        let results = self.client.delete_topics(&names, &Self::options()).await?;
        Ok(results
            .into_iter()
            .map(|result| match result {
                Ok(name) => TopicOutcome::new(name, TopicStatus::Done),
                Err((name, code)) => TopicOutcome::new(name, status_of(code)),
            })
            .collect())
    }

    async fn alter_topic_configs(
        &self,
        names: &[String],
        entries: &[ConfigEntry],
    ) -> BrokerResult<Vec<TopicOutcome>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let configs: Vec<AlterConfig<'_>> = names
            .iter()
            .map(|name| {
                entries.iter().fold(
                    AlterConfig::new(ResourceSpecifier::Topic(name)),
                    |config, entry| config.set(&entry.name, &entry.value),
                )
            })
            .collect();

        let results = self.client.alter_configs(&configs, &Self::options()).await?;
        Ok(results
            .into_iter()
            .map(|result| {
                let (resource, status) = match result {
                    Ok(resource) => (resource, TopicStatus::Done),
                    Err((resource, code)) => (resource, status_of(code)),
                };
                let topic = match resource {
                    OwnedResourceSpecifier::Topic(name) => name,
                    other => format!("{:?}", other),
                };
                TopicOutcome::new(topic, status)
            })
            .collect())
    }

    async fn topic_metadata(&self, names: &[String]) -> BrokerResult<Vec<TopicMetadata>> {
        let metadata = self.metadata(None).await?;
        Ok(metadata
            .topics()
            .iter()
            .filter(|t| names.iter().any(|n| n == t.name()))
            .map(|t| TopicMetadata {
                name: t.name().to_string(),
                partitions: t.partitions().len(),
            })
            .collect())
    }

    async fn disconnect(&self) -> BrokerResult<()> {
        // Dropping the last handle stops the admin thread.
        Ok(())
    }
}
