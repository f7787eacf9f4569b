//! Resilient Kafka client layer
//!
//! Wraps a Kafka-compatible cluster behind a handful of long-lived pieces:
//! an admin gateway that provisions topics idempotently, a producer that
//! retries a bounded number of times, and consumer-group sessions that
//! reconnect forever and route each record to a typed event kind by topic
//! name.
//!
//! # Example
//!
//! ```no_run
//! use broker_relay::{BrokerContext, EventKind, EventRouter, MemoryBroker, Settings};
//! use std::sync::Arc;
//!
//! # async fn example() -> broker_relay::BrokerResult<()> {
//! let context = BrokerContext::new(Settings::default(), Arc::new(MemoryBroker::new()));
//!
//! let router = EventRouter::new();
//! router.on(EventKind::Detection, |event| {
//!     tracing::info!(topic = %event.topic, "detection");
//!     Ok(())
//! });
//!
//! let factory = context.consumer_factory();
//! let session = factory.acquire_with("cam-1", router).await?;
//!
//! context
//!     .producer()
//!     .send(r#"{"label":"person"}"#, "cam-1_detections", None)
//!     .await?;
//!
//! factory.release(session).await;
//! # Ok(())
//! # }
//! ```
//!
//! # Kafka
//!
//! With the `kafka` feature, `BrokerContext::kafka` builds the same
//! context over rdkafka:
//!
//! ```no_run
//! # #[cfg(feature = "kafka")]
//! # async fn example() -> broker_relay::BrokerResult<()> {
//! let settings = broker_relay::Settings::from_file("relay.yaml")?.with_env_overrides()?;
//! let context = broker_relay::BrokerContext::kafka(settings)?;
//! let template = broker_relay::TopicTemplate::default();
//! let report = context
//!     .admin()
//!     .ensure_topics(&[template.spec("cam-1_detections")])
//!     .await?;
//! println!("created {:?}", report.requested);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::module_inception)]

/// Error types
pub mod error;

/// Retry policies and executor
pub mod retry;

/// Connection descriptor and settings file
pub mod config;

/// Topic naming, templates and org/user/node keys
pub mod topics;

/// Operator notifications
pub mod notify;

/// Counters and gauges
pub mod metrics;

/// Broker client seams
pub mod client;

/// Lazily established shared connections
pub mod lazy;

pub mod admin;
pub mod producer;

/// Topic-to-event routing
pub mod router;

/// Consumer-group sessions
pub mod consumer;

pub mod factory;

/// In-process broker
pub mod memory;

pub mod context;

/// Workflow output monitoring
pub mod flow;

/// Tracing setup
pub mod telemetry;

/// rdkafka-backed client
#[cfg(feature = "kafka")]
pub mod kafka;

/// HTTP service for the flow monitor
#[cfg(feature = "service")]
pub mod service;

pub use admin::{AdminGateway, ProvisionReport};
pub use client::{BrokerClient, Delivery, RawRecord};
pub use config::{ConnectionDescriptor, SecurityConfig, Settings};
pub use consumer::{ConsumerSession, SessionConfig, SessionState};
pub use context::BrokerContext;
pub use error::{BrokerError, BrokerResult};
pub use factory::{LiveCounter, PerEntityConsumerFactory};
pub use flow::{ControlMessage, FlowMonitor, FlowNotification};
pub use memory::MemoryBroker;
pub use metrics::BrokerMetrics;
pub use notify::{MemoryNotifier, Notifier, NotifyLevel, TracingNotifier};
pub use producer::ProducerGateway;
pub use retry::RetryPolicy;
pub use router::{Demux, EventKind, EventRouter, FlowEvent, TopicMatcher};
pub use telemetry::{init_tracing, LogFormat, TracingConfig};
pub use topics::{OrgUsrNode, TopicTemplate};
