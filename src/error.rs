//! Error types for gateway, session and provisioning operations

use std::io;
use thiserror::Error;

/// Result type for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Broker client error types
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Transport or authentication failure establishing a connection
    #[error("Connection error: {0}")]
    Connect(String),

    /// Failure registering topic interest
    #[error("Subscribe error: {0}")]
    Subscribe(String),

    /// Produce call rejected by the broker
    #[error("Send error: {0}")]
    Send(String),

    /// Required topics could not be created
    #[error("Topic provisioning error: {0}")]
    TopicProvision(String),

    /// Cluster metadata or configuration call failed
    #[error("Admin error: {0}")]
    Admin(String),

    /// Record stream broke while running
    #[error("Stream error: {0}")]
    Stream(String),

    /// Payload could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Invalid configuration (programming error, never retried)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Kafka client errors
    #[cfg(feature = "kafka")]
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Settings file errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON encoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BrokerError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            BrokerError::Connect(_) => true,
            BrokerError::Subscribe(_) => true,
            BrokerError::Send(_) => true,
            BrokerError::Stream(_) => true,
            BrokerError::Admin(_) => true,
            BrokerError::Io(_) => true,
            #[cfg(feature = "kafka")]
            BrokerError::Kafka(e) => !matches!(
                e,
                rdkafka::error::KafkaError::ClientConfig(..)
                    | rdkafka::error::KafkaError::ClientCreation(_)
            ),
            BrokerError::TopicProvision(_) => false,
            BrokerError::Decode(_) => false,
            BrokerError::Config(_) => false,
            BrokerError::Yaml(_) => false,
            BrokerError::Json(_) => false,
        }
    }

    /// Get error severity
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            BrokerError::Config(_) => ErrorSeverity::Fatal,
            BrokerError::Yaml(_) => ErrorSeverity::Fatal,
            BrokerError::Decode(_) => ErrorSeverity::Warning,
            BrokerError::Json(_) => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Warnings that don't stop processing
    Warning,
    /// Errors that may be retried
    Error,
    /// Configuration errors that abort the operation
    Fatal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BrokerError::Connect("broker unreachable".to_string());
        assert!(err.to_string().contains("Connection error"));

        let err = BrokerError::TopicProvision("cam-1_detections".to_string());
        assert!(err.to_string().contains("Topic provisioning error"));
    }

    #[test]
    fn test_retryability() {
        assert!(BrokerError::Connect(String::new()).is_retryable());
        assert!(BrokerError::Subscribe(String::new()).is_retryable());
        assert!(BrokerError::Send(String::new()).is_retryable());
        assert!(!BrokerError::Config(String::new()).is_retryable());
        assert!(!BrokerError::Decode(String::new()).is_retryable());
    }

    #[test]
    fn test_severity() {
        assert_eq!(
            BrokerError::Config(String::new()).severity(),
            ErrorSeverity::Fatal
        );
        assert_eq!(
            BrokerError::Decode(String::new()).severity(),
            ErrorSeverity::Warning
        );
        assert_eq!(
            BrokerError::Stream(String::new()).severity(),
            ErrorSeverity::Error
        );
    }

    #[test]
    fn test_from_io() {
        let err = BrokerError::from(io::Error::new(io::ErrorKind::NotFound, "missing"));
        assert!(matches!(err, BrokerError::Io(_)));
    }
}
