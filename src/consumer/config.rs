//! Consumer session configuration

use crate::config::ConsumerSettings;
use crate::error::{BrokerError, BrokerResult};
use crate::retry::RetryPolicy;
use crate::router::Demux;

/// Group prefix of per-entity camera sessions
pub const CAMERA_GROUP_PREFIX: &str = "KAFKA_CAMERA_CONSUMER";

/// Everything a [`super::ConsumerSession`] needs besides its client
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Group id prefix; a random suffix is appended per session
    pub group_prefix: String,

    /// Reconnect policy; must be unbounded
    pub retry: RetryPolicy,

    /// Start from the earliest retained offset
    pub from_beginning: bool,

    /// Topic-to-event rules
    pub demux: Demux,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            group_prefix: CAMERA_GROUP_PREFIX.to_string(),
            retry: RetryPolicy::consumer(),
            from_beginning: false,
            demux: Demux::camera(),
        }
    }
}

impl SessionConfig {
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::new()
    }

    /// Business-topic session built from settings
    pub fn business(settings: &ConsumerSettings, topics: &[String]) -> Self {
        Self {
            group_prefix: settings.group_prefix.clone(),
            retry: settings.retry.clone(),
            from_beginning: false,
            demux: Demux::business(topics).with_fallback(settings.fallback),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> BrokerResult<()> {
        if self.group_prefix.is_empty() {
            return Err(BrokerError::Config("Group prefix cannot be empty".to_string()));
        }

        if self.group_prefix.chars().any(char::is_whitespace) {
            return Err(BrokerError::Config(format!(
                "Group prefix '{}' cannot contain whitespace",
                self.group_prefix
            )));
        }

        if self.retry.is_bounded() {
            return Err(BrokerError::Config(
                "Consumer sessions need an unbounded retry policy".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for SessionConfig
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
        }
    }

    pub fn group_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.group_prefix = prefix.into();
        self
    }

    /// Set the reconnect policy
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn from_beginning(mut self, from_beginning: bool) -> Self {
        self.config.from_beginning = from_beginning;
        self
    }

    pub fn demux(mut self, demux: Demux) -> Self {
        self.config.demux = demux;
        self
    }

    /// Emit unmatched topics as events named after the topic
    pub fn fallback(mut self, enabled: bool) -> Self {
        self.config.demux = self.config.demux.with_fallback(enabled);
        self
    }

    /// Build, validating the result
    pub fn build(self) -> BrokerResult<SessionConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for SessionConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.group_prefix, CAMERA_GROUP_PREFIX);
        assert!(!config.retry.is_bounded());
        assert!(!config.demux.fallback());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_rejects_bounded_policy() {
        let result = SessionConfig::builder()
            .retry_policy(RetryPolicy::fixed(3, Duration::from_millis(1)))
            .build();
        assert!(matches!(result, Err(BrokerError::Config(_))));
    }

    #[test]
    fn test_builder_rejects_bad_prefix() {
        assert!(SessionConfig::builder().group_prefix("").build().is_err());
        assert!(SessionConfig::builder().group_prefix("two words").build().is_err());
    }

    #[test]
    fn test_business_config() {
        let settings = ConsumerSettings::default();
        let config = SessionConfig::business(&settings, &["alerts".to_string()]);
        assert_eq!(config.group_prefix, settings.group_prefix);
        assert!(config.demux.fallback());
        assert_eq!(config.demux.rules().len(), 3);
    }
}
