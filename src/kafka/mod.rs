//! rdkafka-backed broker client

mod admin;
mod consumer;
mod producer;

pub use admin::KafkaAdmin;
pub use consumer::KafkaConsumer;
pub use producer::KafkaProducer;

use crate::client::{
    AdminConnection, BrokerClient, ConsumerConnection, ConsumerOptions, ProducerConnection,
};
use crate::config::ConnectionDescriptor;
use crate::error::{BrokerError, BrokerResult};
use async_trait::async_trait;
use rdkafka::ClientConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Timeout for metadata requests
pub(crate) const METADATA_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout for topic create/delete/alter operations
pub(crate) const OPERATION_TIMEOUT: Duration = Duration::from_secs(30);
/// Delivery timeout for a single send
pub(crate) const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Client over a real cluster
#[derive(Debug, Clone)]
pub struct RdKafkaClient {
    descriptor: Arc<ConnectionDescriptor>,
}

impl RdKafkaClient {
    pub fn new(descriptor: ConnectionDescriptor) -> BrokerResult<Self> {
        descriptor.validate()?;
        Ok(Self {
            descriptor: Arc::new(descriptor),
        })
    }

    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    /// Base client configuration shared by every connection kind
    pub fn client_config(&self) -> ClientConfig {
        client_config(&self.descriptor)
    }
}

/// Translate a descriptor into an rdkafka configuration
pub fn client_config(descriptor: &ConnectionDescriptor) -> ClientConfig {
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", descriptor.bootstrap_servers())
        .set("client.id", &descriptor.client_id)
        .set("security.protocol", descriptor.security.protocol());

    if let Some(tls) = &descriptor.security.tls {
        config
            .set("ssl.ca.location", &tls.ca_location)
            .set("ssl.certificate.location", &tls.certificate_location)
            .set("ssl.key.location", &tls.key_location)
            .set(
                "enable.ssl.certificate.verification",
                tls.verify_certificates.to_string(),
            );
    }

    if let Some(sasl) = &descriptor.security.sasl {
        config
            .set("sasl.mechanism", sasl.mechanism.to_uppercase())
            .set("sasl.username", &sasl.username)
            .set("sasl.password", &sasl.password);
    }

    for (key, value) in &descriptor.properties {
        config.set(key, value);
    }

    debug!(
        brokers = %descriptor.bootstrap_servers(),
        protocol = descriptor.security.protocol(),
        "Built client configuration"
    );
    config
}

/// Run a blocking librdkafka call off the async workers
pub(crate) async fn blocking<T, F>(call: F) -> BrokerResult<T>
where
    F: FnOnce() -> BrokerResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|e| BrokerError::Admin(format!("blocking task failed: {}", e)))?
}

#[async_trait]
impl BrokerClient for RdKafkaClient {
    async fn connect_admin(&self) -> BrokerResult<Arc<dyn AdminConnection>> {
        let admin = KafkaAdmin::connect(self.client_config()).await?;
        Ok(Arc::new(admin))
    }

    async fn connect_producer(&self) -> BrokerResult<Arc<dyn ProducerConnection>> {
        let producer = KafkaProducer::connect(self.client_config()).await?;
        Ok(Arc::new(producer))
    }

    fn consumer(&self, options: ConsumerOptions) -> BrokerResult<Box<dyn ConsumerConnection>> {
        Ok(Box::new(KafkaConsumer::new(self.client_config(), options)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SaslConfig, SecurityConfig, TlsConfig};

    #[test]
    fn test_plaintext_config() {
        let descriptor = ConnectionDescriptor::new(
            vec!["a:9092".to_string(), "b:9092".to_string()],
            "relay",
        );
        let config = client_config(&descriptor);
        assert_eq!(config.get("bootstrap.servers"), Some("a:9092,b:9092"));
        assert_eq!(config.get("client.id"), Some("relay"));
        assert_eq!(config.get("security.protocol"), Some("plaintext"));
        assert_eq!(config.get("sasl.mechanism"), None);
    }

    #[test]
    fn test_secure_config() {
        let descriptor = ConnectionDescriptor::default().with_security(SecurityConfig {
            tls: Some(TlsConfig {
                ca_location: "/certs/ca.pem".to_string(),
                certificate_location: "/certs/client.pem".to_string(),
                key_location: "/certs/client.key".to_string(),
                verify_certificates: false,
            }),
            sasl: Some(SaslConfig {
                mechanism: "scram-sha-512".to_string(),
                username: "user".to_string(),
                password: "secret".to_string(),
            }),
        });
        let config = client_config(&descriptor);
        assert_eq!(config.get("security.protocol"), Some("sasl_ssl"));
        assert_eq!(config.get("ssl.ca.location"), Some("/certs/ca.pem"));
        assert_eq!(config.get("enable.ssl.certificate.verification"), Some("false"));
        assert_eq!(config.get("sasl.mechanism"), Some("SCRAM-SHA-512"));
    }

    #[test]
    fn test_client_rejects_invalid_descriptor() {
        let descriptor = ConnectionDescriptor::new(Vec::new(), "relay");
        assert!(RdKafkaClient::new(descriptor).is_err());
    }
}
