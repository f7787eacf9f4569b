//! Per-deployment state: one client, its gateways and counters

use crate::admin::AdminGateway;
use crate::client::BrokerClient;
use crate::config::{ConnectionDescriptor, Settings};
use crate::consumer::{ConsumerSession, SessionConfig};
use crate::error::{BrokerError, BrokerResult};
use crate::factory::{LiveCounter, PerEntityConsumerFactory};
use crate::metrics::BrokerMetrics;
use crate::notify::{Notifier, TracingNotifier};
use crate::producer::ProducerGateway;
use crate::router::{Demux, EventRouter};
use crate::topics::OrgUsrNode;
use std::sync::Arc;
use tracing::info;

const FLOW_GROUP_PREFIX: &str = "FLOW_MONITOR";

/// Owns everything that would otherwise be a process-wide singleton.
/// Independent contexts can coexist in one process.
pub struct BrokerContext {
    settings: Settings,
    client: Arc<dyn BrokerClient>,
    admin: Arc<AdminGateway>,
    producer: Arc<ProducerGateway>,
    live: LiveCounter,
    metrics: BrokerMetrics,
    notifier: Arc<dyn Notifier>,
}

impl BrokerContext {
    /// Build a context logging through `tracing`
    pub fn new(settings: Settings, client: Arc<dyn BrokerClient>) -> Self {
        Self::with_notifier(settings, client, Arc::new(TracingNotifier))
    }

    pub fn with_notifier(
        settings: Settings,
        client: Arc<dyn BrokerClient>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let metrics = BrokerMetrics::new();
        let admin = Arc::new(AdminGateway::new(client.clone(), notifier.clone()));
        let producer = Arc::new(ProducerGateway::new(
            client.clone(),
            settings.producer.retry.clone(),
            notifier.clone(),
            metrics.clone(),
        ));

        info!(
            brokers = %settings.connection.bootstrap_servers(),
            client_id = %settings.connection.client_id,
            "Broker context created"
        );

        Self {
            settings,
            client,
            admin,
            producer,
            live: LiveCounter::new(),
            metrics,
            notifier,
        }
    }

    /// Context over the rdkafka client described by `settings`
    #[cfg(feature = "kafka")]
    pub fn kafka(settings: Settings) -> BrokerResult<Self> {
        let client = crate::kafka::RdKafkaClient::new(settings.connection.clone())?;
        Ok(Self::new(settings, Arc::new(client)))
    }

    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.settings.connection
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn admin(&self) -> &Arc<AdminGateway> {
        &self.admin
    }

    pub fn producer(&self) -> &Arc<ProducerGateway> {
        &self.producer
    }

    pub fn metrics(&self) -> &BrokerMetrics {
        &self.metrics
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    /// Per-entity sessions sharing this context's live counter
    pub fn consumer_factory(&self) -> PerEntityConsumerFactory {
        PerEntityConsumerFactory::new(
            self.client.clone(),
            self.admin.clone(),
            self.notifier.clone(),
            self.metrics.clone(),
            self.live.clone(),
        )
        .with_template(self.settings.entity_topics.clone())
        .with_retry_policy(self.settings.consumer.retry.clone())
    }

    /// Idle session with an arbitrary configuration
    pub fn session(&self, config: SessionConfig, router: EventRouter) -> BrokerResult<ConsumerSession> {
        ConsumerSession::new(
            self.client.clone(),
            config,
            router,
            self.notifier.clone(),
            self.metrics.clone(),
        )
    }

    /// Started session over the configured business topics
    pub fn business_session(&self, router: EventRouter) -> BrokerResult<ConsumerSession> {
        let topics = self.business_topics();
        let config = SessionConfig::business(&self.settings.consumer, &topics);
        let session = self.session(config, router)?;
        session.start(topics);
        Ok(session)
    }

    /// Started session over the workflow output topics that exist now,
    /// optionally only those of one key. Replays retained records.
    pub async fn flow_session(
        &self,
        filter: Option<&OrgUsrNode>,
        router: EventRouter,
    ) -> BrokerResult<ConsumerSession> {
        let topics = self.admin.flow_topics(filter).await?;
        if topics.is_empty() {
            return Err(BrokerError::Config("No workflow output topics found".to_string()));
        }

        let config = SessionConfig::builder()
            .group_prefix(FLOW_GROUP_PREFIX)
            .retry_policy(self.settings.consumer.retry.clone())
            .from_beginning(true)
            .demux(Demux::flow())
            .build()?;
        let session = self.session(config, router)?;
        session.start(topics);
        Ok(session)
    }

    /// Configured business topics, or the built-in list when none are set
    pub fn business_topics(&self) -> Vec<String> {
        if self.settings.business_topics.is_empty() {
            crate::topics::BUSINESS_TOPICS
                .iter()
                .map(|t| t.to_string())
                .collect()
        } else {
            self.settings.business_topics.clone()
        }
    }

    /// Live per-entity sessions
    pub fn live_sessions(&self) -> usize {
        self.live.get()
    }

    /// Release both gateway connections
    pub async fn shutdown(&self) {
        futures::join!(self.producer.disconnect(), self.admin.disconnect());
        info!("Broker context shut down");
    }
}
