//! Auto-reconnecting send path with bounded retry

use crate::client::{BrokerClient, Delivery, ProducerConnection};
use crate::error::{BrokerError, BrokerResult};
use crate::lazy::SharedConnection;
use crate::metrics::BrokerMetrics;
use crate::notify::{Notifier, NotifyLevel};
use crate::retry::{RetryExecutor, RetryPolicy, RetryResult};
use crate::topics::OrgUsrNode;
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const COMPONENT: &str = "PRODUCER_GATEWAY";

/// Producer gateway.
///
/// Holds at most one shared connection. A failed send notifies, waits the
/// policy interval, discards the cached connection and tries again on a fresh
/// one, until the policy's attempts are spent.
pub struct ProducerGateway {
    client: Arc<dyn BrokerClient>,
    connection: SharedConnection<dyn ProducerConnection>,
    policy: RetryPolicy,
    notifier: Arc<dyn Notifier>,
    metrics: BrokerMetrics,
}

impl ProducerGateway {
    pub fn new(
        client: Arc<dyn BrokerClient>,
        policy: RetryPolicy,
        notifier: Arc<dyn Notifier>,
        metrics: BrokerMetrics,
    ) -> Self {
        Self {
            client,
            connection: SharedConnection::new(),
            policy,
            notifier,
            metrics,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn producer(&self) -> BrokerResult<Arc<dyn ProducerConnection>> {
        let client = self.client.clone();
        self.connection
            .get_or_connect(|| async move {
                let producer = client.connect_producer().await.map_err(|e| match e {
                    BrokerError::Connect(_) => e,
                    other => BrokerError::Connect(other.to_string()),
                })?;
                info!("Producer connection established");
                Ok(producer)
            })
            .await
    }

    /// One attempt: obtain (or create) the connection, then send
    async fn attempt(
        &self,
        topic: &str,
        key: Option<&[u8]>,
        payload: &[u8],
    ) -> Result<Delivery, (BrokerError, Option<Arc<dyn ProducerConnection>>)> {
        let producer = self.producer().await.map_err(|e| (e, None))?;
        producer
            .send(topic, key, payload)
            .await
            .map_err(|e| (e, Some(producer)))
    }

    /// Send `payload` to `topic`. The final failure is returned as a value.
    pub async fn send(
        &self,
        payload: impl Into<Bytes>,
        topic: &str,
        key: Option<Bytes>,
    ) -> BrokerResult<Delivery> {
        if topic.is_empty() {
            return Err(BrokerError::Config("Topic cannot be empty".to_string()));
        }

        let payload = payload.into();
        let body: &[u8] = &payload;
        let key = key.as_deref();
        let executor = RetryExecutor::new(self.policy.clone());

        let result = executor
            .execute(
                move |attempt| async move {
                    if attempt > 0 {
                        debug!(topic, attempt, "Attempting to resend message");
                    }
                    self.attempt(topic, key, body).await.map_err(SendFailure::from)
                },
                move |failure: &SendFailure, attempt| {
                    let stale = failure.connection.clone();
                    let message = format!(
                        "Failed to send message to {} (attempt {}): {}",
                        topic,
                        attempt + 1,
                        failure.error
                    );
                    async move {
                        self.notifier
                            .notify(NotifyLevel::Error, COMPONENT, &message, true);
                        self.metrics.record_send_retry();
                        if let Some(stale) = stale {
                            self.connection.invalidate(&stale).await;
                        }
                    }
                },
            )
            .await;

        match result {
            RetryResult::Success { value, attempts } => {
                if attempts > 0 {
                    info!(topic, attempts, "Message sent after reconnecting");
                }
                self.metrics.record_send_ok();
                Ok(value)
            }
            RetryResult::Failed { error, attempts } => {
                let SendFailure { error, connection: stale } = error;
                if let Some(stale) = stale {
                    self.connection.invalidate(&stale).await;
                }
                error!(topic, attempts = attempts + 1, error = %error, "Stopped attempts to send message");
                self.notifier.notify(
                    NotifyLevel::Error,
                    COMPONENT,
                    &format!("Giving up on {} after {} attempts: {}", topic, attempts + 1, error),
                    true,
                );
                self.metrics.record_send_failed();
                Err(match error {
                    BrokerError::Send(_) | BrokerError::Connect(_) | BrokerError::Config(_) => error,
                    other => BrokerError::Send(other.to_string()),
                })
            }
        }
    }

    /// Serialize `value` as JSON and send it to the output topic of `node`
    pub async fn send_to_flow_topic<T: Serialize>(
        &self,
        node: &OrgUsrNode,
        value: &T,
    ) -> BrokerResult<Delivery> {
        let payload = serde_json::to_vec(value)?;
        self.send(payload, &node.topic_name(), Some(Bytes::from(node.to_string())))
            .await
    }

    /// Flush and release the connection; the next send reconnects lazily
    pub async fn disconnect(&self) {
        if let Some(producer) = self.connection.take().await {
            if let Err(e) = producer.disconnect().await {
                warn!(error = %e, "Producer disconnect failed");
            }
        }
    }

    /// Connections established so far, including reconnects
    pub fn connections_established(&self) -> u64 {
        self.connection.established()
    }
}

/// Failed attempt together with the connection it used, if any
struct SendFailure {
    error: BrokerError,
    connection: Option<Arc<dyn ProducerConnection>>,
}

impl From<(BrokerError, Option<Arc<dyn ProducerConnection>>)> for SendFailure {
    fn from((error, connection): (BrokerError, Option<Arc<dyn ProducerConnection>>)) -> Self {
        Self { error, connection }
    }
}

impl std::fmt::Display for SendFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error.fmt(f)
    }
}
