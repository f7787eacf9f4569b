//! One consumer session per external entity

use crate::admin::AdminGateway;
use crate::client::BrokerClient;
use crate::consumer::{ConsumerSession, SessionConfig, CAMERA_GROUP_PREFIX};
use crate::error::{BrokerError, BrokerResult};
use crate::metrics::BrokerMetrics;
use crate::notify::{Notifier, NotifyLevel};
use crate::retry::RetryPolicy;
use crate::router::{Demux, EventRouter};
use crate::topics::{entity_topics, TopicTemplate};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::info;

const COMPONENT: &str = "ENTITY_CONSUMER_FACTORY";

/// Number of sessions handed out and not yet released. Shared by clones.
#[derive(Debug, Clone, Default)]
pub struct LiveCounter(Arc<AtomicUsize>);

impl LiveCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn increment(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Never goes below zero
    fn decrement(&self) -> usize {
        match self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        {
            Ok(previous) => previous - 1,
            Err(_) => 0,
        }
    }
}

/// Creates per-entity sessions over `{entity}_detections` and
/// `{entity}_associations`, provisioning the topics first
pub struct PerEntityConsumerFactory {
    client: Arc<dyn BrokerClient>,
    admin: Arc<AdminGateway>,
    template: TopicTemplate,
    retry: RetryPolicy,
    notifier: Arc<dyn Notifier>,
    metrics: BrokerMetrics,
    live: LiveCounter,
}

impl PerEntityConsumerFactory {
    pub fn new(
        client: Arc<dyn BrokerClient>,
        admin: Arc<AdminGateway>,
        notifier: Arc<dyn Notifier>,
        metrics: BrokerMetrics,
        live: LiveCounter,
    ) -> Self {
        Self {
            client,
            admin,
            template: TopicTemplate::default(),
            retry: RetryPolicy::consumer(),
            notifier,
            metrics,
            live,
        }
    }

    /// Override the per-entity topic configuration
    pub fn with_template(mut self, template: TopicTemplate) -> Self {
        self.template = template;
        self
    }

    /// Override the reconnect interval of created sessions
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Provision the entity's topics and start a session with a fresh router
    pub async fn acquire(&self, entity_id: &str) -> BrokerResult<ConsumerSession> {
        self.acquire_with(entity_id, EventRouter::new()).await
    }

    /// Like [`Self::acquire`], with listeners already registered on `router`
    pub async fn acquire_with(
        &self,
        entity_id: &str,
        router: EventRouter,
    ) -> BrokerResult<ConsumerSession> {
        if entity_id.trim().is_empty() {
            return Err(BrokerError::Config("Entity id cannot be empty".to_string()));
        }

        let topics = entity_topics(entity_id);
        let specs: Vec<_> = topics.iter().map(|t| self.template.spec(t.as_str())).collect();

        let report = match self.admin.ensure_topics(&specs).await {
            Ok(report) => report,
            Err(e) => {
                self.notifier.notify(
                    NotifyLevel::Error,
                    COMPONENT,
                    &format!("Not starting consumer for {}: {}", entity_id, e),
                    true,
                );
                return Err(match e {
                    BrokerError::TopicProvision(_) | BrokerError::Config(_) => e,
                    other => BrokerError::TopicProvision(other.to_string()),
                });
            }
        };
        if report.created_any() {
            info!(entity_id, topics = ?report.requested, "Created entity topics");
        }

        let config = SessionConfig::builder()
            .group_prefix(CAMERA_GROUP_PREFIX)
            .retry_policy(self.retry.clone())
            .demux(Demux::camera())
            .build()?;

        let session = ConsumerSession::new(
            self.client.clone(),
            config,
            router,
            self.notifier.clone(),
            self.metrics.clone(),
        )?;
        session.start(topics);

        let live = self.live.increment();
        self.metrics.set_live_sessions(live);
        info!(entity_id, group_id = %session.group_id(), live, "Entity consumer acquired");

        Ok(session)
    }

    /// Stop `session` and decrement the live count
    pub async fn release(&self, session: ConsumerSession) {
        let group_id = session.group_id().to_string();
        session.stop().await;

        let live = self.live.decrement();
        self.metrics.set_live_sessions(live);
        info!(group_id = %group_id, live, "Entity consumer released");
    }

    /// Sessions acquired and not yet released
    pub fn live_count(&self) -> usize {
        self.live.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_counter_saturates() {
        let counter = LiveCounter::new();
        assert_eq!(counter.decrement(), 0);
        assert_eq!(counter.increment(), 1);
        assert_eq!(counter.increment(), 2);
        assert_eq!(counter.decrement(), 1);
        assert_eq!(counter.decrement(), 0);
        assert_eq!(counter.decrement(), 0);
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn test_counter_clones_share_state() {
        let counter = LiveCounter::new();
        let clone = counter.clone();
        clone.increment();
        assert_eq!(counter.get(), 1);
    }
}
