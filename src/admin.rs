//! Lazily-connected handle to cluster metadata

use crate::client::{AdminConnection, BrokerClient, TopicMetadata, TopicStatus};
use crate::error::{BrokerError, BrokerResult};
use crate::lazy::SharedConnection;
use crate::notify::{Notifier, NotifyLevel};
use crate::topics::{ConfigEntry, OrgUsrNode, TopicSpec, TopicTemplate};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

const COMPONENT: &str = "ADMIN_GATEWAY";

/// What [`AdminGateway::ensure_topics`] did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    /// Names submitted in the create batch, in spec order
    pub requested: Vec<String>,
    /// Names that turned out to exist already (raced with another creator)
    pub already_existed: Vec<String>,
}

impl ProvisionReport {
    /// Whether a create batch was submitted at all
    pub fn created_any(&self) -> bool {
        !self.requested.is_empty()
    }
}

/// Admin gateway. Connection establishment is not retried internally.
pub struct AdminGateway {
    client: Arc<dyn BrokerClient>,
    connection: SharedConnection<dyn AdminConnection>,
    notifier: Arc<dyn Notifier>,
}

impl AdminGateway {
    pub fn new(client: Arc<dyn BrokerClient>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            client,
            connection: SharedConnection::new(),
            notifier,
        }
    }

    /// Return the live connection or establish one (single attempt)
    pub async fn connect(&self) -> BrokerResult<Arc<dyn AdminConnection>> {
        let client = self.client.clone();
        let notifier = self.notifier.clone();
        self.connection
            .get_or_connect(|| async move {
                match client.connect_admin().await {
                    Ok(conn) => {
                        info!("Admin connection established");
                        Ok(conn)
                    }
                    Err(e) => {
                        notifier.notify(
                            NotifyLevel::Error,
                            COMPONENT,
                            &format!("Admin connection failed: {}", e),
                            true,
                        );
                        Err(match e {
                            BrokerError::Connect(_) => e,
                            other => BrokerError::Connect(other.to_string()),
                        })
                    }
                }
            })
            .await
    }

    /// Run `call` on the live connection. A retryable failure drops the
    /// cached connection so the next call reconnects.
    async fn with_admin<F, Fut, R>(&self, call: F) -> BrokerResult<R>
    where
        F: FnOnce(Arc<dyn AdminConnection>) -> Fut,
        Fut: Future<Output = BrokerResult<R>>,
    {
        let admin = self.connect().await?;
        match call(admin.clone()).await {
            Err(e) if e.is_retryable() => {
                self.connection.invalidate(&admin).await;
                Err(e)
            }
            result => result,
        }
    }

    /// Every topic name in the cluster
    pub async fn list_topics(&self) -> BrokerResult<BTreeSet<String>> {
        let topics = self
            .with_admin(|admin| async move { admin.list_topics().await })
            .await?;
        Ok(topics.into_iter().collect())
    }

    /// Create whichever of `specs` are missing, in one batch.
    ///
    /// "Already exists" answers count as success, so concurrent callers with
    /// the same specs never see a duplicate-topic failure.
    pub async fn ensure_topics(&self, specs: &[TopicSpec]) -> BrokerResult<ProvisionReport> {
        if specs.is_empty() {
            return Err(BrokerError::Config("No topics to ensure".to_string()));
        }
        for spec in specs {
            spec.validate()?;
        }

        let existing = self
            .list_topics()
            .await
            .map_err(|e| BrokerError::TopicProvision(e.to_string()))?;

        let mut seen = BTreeSet::new();
        let missing: Vec<TopicSpec> = specs
            .iter()
            .filter(|s| !existing.contains(&s.name) && seen.insert(s.name.clone()))
            .cloned()
            .collect();

        let mut report = ProvisionReport {
            requested: missing.iter().map(|s| s.name.clone()).collect(),
            already_existed: Vec::new(),
        };

        if missing.is_empty() {
            debug!("All {} topics already present", specs.len());
            return Ok(report);
        }

        info!(topics = ?report.requested, "Creating missing topics");
        let outcomes = self
            .with_admin(|admin| async move { admin.create_topics(&missing).await })
            .await
            .map_err(|e| BrokerError::TopicProvision(e.to_string()))?;

        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome.status {
                TopicStatus::Done => {}
                TopicStatus::AlreadyExists => report.already_existed.push(outcome.topic),
                TopicStatus::UnknownTopic => {
                    failures.push(format!("{}: unknown topic", outcome.topic))
                }
                TopicStatus::Failed(reason) => failures.push(format!("{}: {}", outcome.topic, reason)),
            }
        }

        if !failures.is_empty() {
            let message = format!("Failed to create topics: {}", failures.join(", "));
            self.notifier
                .notify(NotifyLevel::Error, COMPONENT, &message, true);
            return Err(BrokerError::TopicProvision(message));
        }

        Ok(report)
    }

    /// Delete a topic, reporting success; never fails to the caller
    pub async fn delete_topic(&self, name: &str) -> bool {
        let names = vec![name.to_string()];
        let result = self
            .with_admin(|admin| async move { admin.delete_topics(&names).await })
            .await;

        match result {
            Ok(outcomes) => match outcomes.into_iter().find(|o| o.topic == name) {
                Some(outcome) if outcome.status == TopicStatus::Done => {
                    info!(topic = name, "Topic deleted");
                    true
                }
                Some(outcome) => {
                    warn!(topic = name, status = ?outcome.status, "Topic not deleted");
                    false
                }
                None => false,
            },
            Err(e) => {
                self.notifier.notify(
                    NotifyLevel::Error,
                    COMPONENT,
                    &format!("Error deleting topic {}: {}", name, e),
                    true,
                );
                false
            }
        }
    }

    /// Apply `entries` to every existing topic; best effort
    pub async fn alter_retention(&self, entries: &[ConfigEntry]) -> bool {
        let result = self
            .with_admin(|admin| async move {
                let topics = admin.list_topics().await?;
                admin.alter_topic_configs(&topics, entries).await
            })
            .await;

        match result {
            Ok(outcomes) => {
                let failed: Vec<_> = outcomes
                    .iter()
                    .filter(|o| o.status != TopicStatus::Done)
                    .map(|o| o.topic.as_str())
                    .collect();
                if failed.is_empty() {
                    info!(topics = outcomes.len(), "Topic configuration altered");
                    true
                } else {
                    warn!(?failed, "Topic configuration not applied everywhere");
                    false
                }
            }
            Err(e) => {
                self.notifier.notify(
                    NotifyLevel::Error,
                    COMPONENT,
                    &format!("Error altering topic retention: {}", e),
                    true,
                );
                false
            }
        }
    }

    /// Workflow output topics, optionally only those of one key
    pub async fn flow_topics(&self, filter: Option<&OrgUsrNode>) -> BrokerResult<Vec<String>> {
        let topics = self.list_topics().await?;
        Ok(topics
            .into_iter()
            .filter(|t| match filter {
                Some(node) => node.owns_topic(t),
                None => t.ends_with(crate::topics::FLOW_TOPIC_SUFFIX),
            })
            .collect())
    }

    /// Create the output topic of `node` if missing
    pub async fn create_flow_topic(
        &self,
        node: &OrgUsrNode,
        partitions: i32,
        replication_factor: i32,
    ) -> bool {
        let spec = TopicTemplate::flow(partitions, replication_factor).spec(node.topic_name());
        match self.ensure_topics(&[spec]).await {
            Ok(report) => {
                if !report.created_any() {
                    debug!(topic = %node.topic_name(), "Flow topic already exists");
                }
                true
            }
            Err(e) => {
                warn!(topic = %node.topic_name(), error = %e, "Flow topic creation failed");
                false
            }
        }
    }

    /// Partition counts for the named topics
    pub async fn topic_metadata(&self, names: &[String]) -> BrokerResult<Vec<TopicMetadata>> {
        self.with_admin(|admin| async move { admin.topic_metadata(names).await })
            .await
    }

    /// Release the connection; the next call reconnects lazily
    pub async fn disconnect(&self) {
        if let Some(admin) = self.connection.take().await {
            if let Err(e) = admin.disconnect().await {
                warn!(error = %e, "Admin disconnect failed");
            } else {
                info!("Admin disconnected");
            }
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.is_connected().await
    }
}
