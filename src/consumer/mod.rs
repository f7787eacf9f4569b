//! Consumer-group sessions
//!
//! A [`ConsumerSession`] owns one consumer-group connection and runs a
//! connect → subscribe → run loop that never gives up:
//! - every failure releases the connection, waits the policy interval and
//!   starts over
//! - records are routed by topic name through a [`crate::router::Demux`]
//! - `stop` is the only way out, and it is terminal
//!
//! # Example
//!
//! ```no_run
//! use broker_relay::consumer::{ConsumerSession, SessionConfig};
//! use broker_relay::memory::MemoryBroker;
//! use broker_relay::router::{EventKind, EventRouter};
//! use broker_relay::{BrokerMetrics, TracingNotifier};
//! use std::sync::Arc;
//!
//! # async fn example() -> broker_relay::BrokerResult<()> {
//! let router = EventRouter::new();
//! router.on(EventKind::Detection, |event| {
//!     println!("{} @ {}", event.topic, event.offset);
//!     Ok(())
//! });
//!
//! let session = ConsumerSession::new(
//!     Arc::new(MemoryBroker::new()),
//!     SessionConfig::builder().group_prefix("DEMO").build()?,
//!     router,
//!     Arc::new(TracingNotifier),
//!     BrokerMetrics::new(),
//! )?;
//! session.start(["cam-1_detections", "cam-1_associations"]);
//! // ...
//! session.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod session;
pub mod shutdown;

pub use config::{SessionConfig, SessionConfigBuilder, CAMERA_GROUP_PREFIX};
pub use session::{ConsumerSession, SessionState};
pub use shutdown::ShutdownState;
