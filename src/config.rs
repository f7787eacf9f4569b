//! Connection descriptor and settings file structures

use crate::error::{BrokerError, BrokerResult};
use crate::retry::RetryPolicy;
use crate::topics::TopicTemplate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Supported SASL mechanisms
pub const VALID_SASL_MECHANISMS: &[&str] = &["PLAIN", "SCRAM-SHA-256", "SCRAM-SHA-512"];

/// Client properties callers may pass through to the underlying client
pub const ALLOWED_CLIENT_PROPS: &[&str] = &[
    // Request settings
    "request.timeout.ms",
    "metadata.max.age.ms",
    "socket.timeout.ms",
    "socket.keepalive.enable",
    // Connection settings
    "reconnect.backoff.ms",
    "reconnect.backoff.max.ms",
    "connections.max.idle.ms",
    "broker.address.family",
    // Fetch settings
    "fetch.min.bytes",
    "fetch.wait.max.ms",
    "fetch.message.max.bytes",
    "max.partition.fetch.bytes",
    // Producer settings
    "compression.type",
    "message.max.bytes",
    "message.timeout.ms",
    "enable.idempotence",
    // Monitoring
    "statistics.interval.ms",
];

/// Mutual TLS material. All three files are required together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    /// CA certificate location
    pub ca_location: String,
    /// Client certificate location
    pub certificate_location: String,
    /// Client private key location
    pub key_location: String,
    /// Verify the broker certificate chain
    #[serde(default = "default_true")]
    pub verify_certificates: bool,
}

/// SASL credentials. All three fields are required together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaslConfig {
    /// Mechanism, one of [`VALID_SASL_MECHANISMS`]
    pub mechanism: String,
    /// Username
    pub username: String,
    /// Password
    pub password: String,
}

/// Transport security for every client built from a descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// TLS material
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    /// SASL credentials
    #[serde(default)]
    pub sasl: Option<SaslConfig>,
}

impl SecurityConfig {
    /// The `security.protocol` value implied by the configured parts
    pub fn protocol(&self) -> &'static str {
        match (&self.tls, &self.sasl) {
            (None, None) => "plaintext",
            (Some(_), None) => "ssl",
            (None, Some(_)) => "sasl_plaintext",
            (Some(_), Some(_)) => "sasl_ssl",
        }
    }

    /// Validate the security configuration
    pub fn validate(&self) -> BrokerResult<()> {
        if let Some(sasl) = &self.sasl {
            if !VALID_SASL_MECHANISMS.contains(&sasl.mechanism.to_uppercase().as_str()) {
                return Err(BrokerError::Config(format!(
                    "Invalid SASL mechanism '{}'; expected one of: {}",
                    sasl.mechanism,
                    VALID_SASL_MECHANISMS.join(", ")
                )));
            }
            if sasl.username.is_empty() || sasl.password.is_empty() {
                return Err(BrokerError::Config(
                    "SASL username and password must both be set".to_string(),
                ));
            }
        }

        if let Some(tls) = &self.tls {
            if tls.ca_location.is_empty()
                || tls.certificate_location.is_empty()
                || tls.key_location.is_empty()
            {
                return Err(BrokerError::Config(
                    "TLS ca, certificate and key locations must all be set".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Immutable connection descriptor shared by every gateway and session
/// created from one context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    /// Broker endpoints as `host:port`, in order
    pub brokers: Vec<String>,
    /// Client identity reported to the broker
    pub client_id: String,
    /// Transport security
    #[serde(default)]
    pub security: SecurityConfig,
    /// Additional client properties, restricted to [`ALLOWED_CLIENT_PROPS`]
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl Default for ConnectionDescriptor {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            client_id: "broker-relay".to_string(),
            security: SecurityConfig::default(),
            properties: BTreeMap::new(),
        }
    }
}

impl ConnectionDescriptor {
    /// Create a plaintext descriptor
    pub fn new(brokers: Vec<String>, client_id: impl Into<String>) -> Self {
        Self {
            brokers,
            client_id: client_id.into(),
            ..Default::default()
        }
    }

    /// Set transport security
    pub fn with_security(mut self, security: SecurityConfig) -> Self {
        self.security = security;
        self
    }

    /// Add a pass-through client property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Broker list in the comma-separated `bootstrap.servers` form
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }

    /// Validate the descriptor
    pub fn validate(&self) -> BrokerResult<()> {
        if self.brokers.is_empty() || self.brokers.iter().any(|b| b.trim().is_empty()) {
            return Err(BrokerError::Config("Brokers cannot be empty".to_string()));
        }

        if self.client_id.is_empty() {
            return Err(BrokerError::Config("Client ID cannot be empty".to_string()));
        }

        for key in self.properties.keys() {
            if !ALLOWED_CLIENT_PROPS.contains(&key.as_str()) {
                return Err(BrokerError::Config(format!(
                    "Disallowed client property '{}'",
                    key
                )));
            }
        }

        self.security.validate()
    }
}

/// Producer section of the settings file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerSettings {
    /// Send retry policy
    #[serde(default = "RetryPolicy::producer")]
    pub retry: RetryPolicy,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::producer(),
        }
    }
}

/// Consumer section of the settings file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerSettings {
    /// Group id prefix for business-topic sessions
    #[serde(default = "default_group_prefix")]
    pub group_prefix: String,
    /// Reconnect policy
    #[serde(default = "RetryPolicy::consumer")]
    pub retry: RetryPolicy,
    /// Emit unmatched topics as raw events named after the topic
    #[serde(default = "default_true")]
    pub fallback: bool,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            group_prefix: default_group_prefix(),
            retry: RetryPolicy::consumer(),
            fallback: true,
        }
    }
}

/// Complete settings file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Broker connection
    #[serde(default)]
    pub connection: ConnectionDescriptor,
    /// Producer behaviour
    #[serde(default)]
    pub producer: ProducerSettings,
    /// Consumer behaviour
    #[serde(default)]
    pub consumer: ConsumerSettings,
    /// Configuration applied to per-entity topics
    #[serde(default)]
    pub entity_topics: TopicTemplate,
    /// Business topics consumed by name
    #[serde(default)]
    pub business_topics: Vec<String>,
}

impl Settings {
    /// Parse settings from YAML text
    pub fn from_yaml(text: &str) -> BrokerResult<Self> {
        let settings: Settings = serde_yaml::from_str(text)?;
        settings.connection.validate()?;
        Ok(settings)
    }

    /// Load settings from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> BrokerResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    /// Apply `BROKER_*` environment overrides
    pub fn with_env_overrides(mut self) -> BrokerResult<Self> {
        if let Ok(hosts) = std::env::var("BROKER_HOSTS") {
            self.connection.brokers = hosts
                .split(',')
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
                .collect();
        }
        if let Ok(client_id) = std::env::var("BROKER_CLIENT_ID") {
            self.connection.client_id = client_id;
        }
        if let (Ok(username), Ok(password)) = (
            std::env::var("BROKER_SASL_USERNAME"),
            std::env::var("BROKER_SASL_PASSWORD"),
        ) {
            let mechanism = std::env::var("BROKER_SASL_MECHANISM")
                .unwrap_or_else(|_| "PLAIN".to_string());
            self.connection.security.sasl = Some(SaslConfig {
                mechanism,
                username,
                password,
            });
        }
        self.connection.validate()?;
        Ok(self)
    }
}

fn default_true() -> bool {
    true
}

fn default_group_prefix() -> String {
    "BROKER_RELAY_CONSUMER".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_descriptor_validation() {
        assert!(ConnectionDescriptor::default().validate().is_ok());

        let empty = ConnectionDescriptor::new(vec![], "client");
        assert!(matches!(empty.validate(), Err(BrokerError::Config(_))));

        let no_id = ConnectionDescriptor::new(vec!["localhost:9092".into()], "");
        assert!(no_id.validate().is_err());

        let bad_prop = ConnectionDescriptor::default().with_property("group.id", "x");
        assert!(bad_prop.validate().is_err());

        let good_prop = ConnectionDescriptor::default().with_property("socket.timeout.ms", "5000");
        assert!(good_prop.validate().is_ok());
    }

    #[test]
    fn test_security_protocol() {
        let mut security = SecurityConfig::default();
        assert_eq!(security.protocol(), "plaintext");

        security.sasl = Some(SaslConfig {
            mechanism: "plain".to_string(),
            username: "kafka".to_string(),
            password: "secret".to_string(),
        });
        assert_eq!(security.protocol(), "sasl_plaintext");
        assert!(security.validate().is_ok());

        security.tls = Some(TlsConfig {
            ca_location: "ca.crt".to_string(),
            certificate_location: "client.pem".to_string(),
            key_location: "client.key".to_string(),
            verify_certificates: false,
        });
        assert_eq!(security.protocol(), "sasl_ssl");
    }

    #[test]
    fn test_invalid_sasl_mechanism() {
        let security = SecurityConfig {
            tls: None,
            sasl: Some(SaslConfig {
                mechanism: "GSSAPI".to_string(),
                username: "u".to_string(),
                password: "p".to_string(),
            }),
        };
        assert!(security.validate().is_err());
    }

    #[test]
    fn test_settings_from_yaml() {
        let yaml = r#"
connection:
  brokers: ["kafka-1:9093", "kafka-2:9093"]
  client_id: engage
business_topics:
  - alerts
  - alert_person_search_response
"#;
        let settings = Settings::from_yaml(yaml).unwrap();
        assert_eq!(settings.connection.bootstrap_servers(), "kafka-1:9093,kafka-2:9093");
        assert_eq!(settings.business_topics.len(), 2);
        assert_eq!(settings.producer.retry, RetryPolicy::producer());
        assert!(settings.consumer.fallback);
        assert_eq!(settings.entity_topics, TopicTemplate::default());
    }

    #[test]
    fn test_settings_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "connection:\n  brokers: [\"a:1\"]\n  client_id: c").unwrap();
        let settings = Settings::from_file(file.path()).unwrap();
        assert_eq!(settings.connection.brokers, vec!["a:1".to_string()]);
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("BROKER_HOSTS", "h1:9092, h2:9092");
        std::env::set_var("BROKER_SASL_USERNAME", "kafka");
        std::env::set_var("BROKER_SASL_PASSWORD", "pw");

        let settings = Settings::default().with_env_overrides().unwrap();

        std::env::remove_var("BROKER_HOSTS");
        std::env::remove_var("BROKER_SASL_USERNAME");
        std::env::remove_var("BROKER_SASL_PASSWORD");

        assert_eq!(settings.connection.brokers, vec!["h1:9092", "h2:9092"]);
        let sasl = settings.connection.security.sasl.unwrap();
        assert_eq!(sasl.mechanism, "PLAIN");
        assert_eq!(sasl.username, "kafka");
    }
}
