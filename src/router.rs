//! Topic demultiplexing and event fan-out
//!
//! A [`Demux`] maps a topic name to an [`EventKind`] (first matching rule
//! wins, optional fallback to a kind named after the topic). An
//! [`EventRouter`] holds the listeners registered for each kind and invokes
//! them in registration order, isolating failures per listener.

use crate::error::{BrokerError, BrokerResult};
use crate::topics::{ASSOCIATIONS_SUFFIX, DETECTIONS_SUFFIX, FLOW_TOPIC_SUFFIX};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// Closed set of event kinds delivered to listeners
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    /// `{entity}_detections`
    Detection,
    /// `{entity}_associations`
    Association,
    /// `{org}-{user}-{workflow}-topic`
    FlowOutput,
    /// Business topic or fallback, named after the topic itself
    Topic(String),
}

impl EventKind {
    pub fn name(&self) -> &str {
        match self {
            EventKind::Detection => "detection",
            EventKind::Association => "association",
            EventKind::FlowOutput => "flow-output",
            EventKind::Topic(name) => name,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for EventKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// How a rule compares against a topic name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicMatcher {
    Exact(String),
    Suffix(String),
    Prefix(String),
    /// Substring match; looser than `Suffix`, kept for legacy topic layouts
    Contains(String),
}

impl TopicMatcher {
    pub fn matches(&self, topic: &str) -> bool {
        match self {
            TopicMatcher::Exact(name) => topic == name,
            TopicMatcher::Suffix(suffix) => topic.ends_with(suffix.as_str()),
            TopicMatcher::Prefix(prefix) => topic.starts_with(prefix.as_str()),
            TopicMatcher::Contains(needle) => topic.contains(needle.as_str()),
        }
    }
}

/// Turns raw record bytes into an application payload
pub trait Decoder: Send + Sync {
    fn decode(&self, topic: &str, value: &[u8]) -> BrokerResult<serde_json::Value>;
}

/// Decodes the record value as JSON
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDecoder;

impl Decoder for JsonDecoder {
    fn decode(&self, topic: &str, value: &[u8]) -> BrokerResult<serde_json::Value> {
        serde_json::from_slice(value)
            .map_err(|e| BrokerError::Decode(format!("{}: {}", topic, e)))
    }
}

impl<F> Decoder for F
where
    F: Fn(&str, &[u8]) -> BrokerResult<serde_json::Value> + Send + Sync,
{
    fn decode(&self, topic: &str, value: &[u8]) -> BrokerResult<serde_json::Value> {
        self(topic, value)
    }
}

/// One `(matcher, kind)` rule. Without a decoder the raw value is passed on.
#[derive(Clone)]
pub struct DemuxRule {
    pub matcher: TopicMatcher,
    pub kind: EventKind,
    pub decoder: Option<Arc<dyn Decoder>>,
}

impl DemuxRule {
    pub fn new(matcher: TopicMatcher, kind: EventKind) -> Self {
        Self {
            matcher,
            kind,
            decoder: Some(Arc::new(JsonDecoder)),
        }
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn Decoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn raw(mut self) -> Self {
        self.decoder = None;
        self
    }
}

impl fmt::Debug for DemuxRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DemuxRule")
            .field("matcher", &self.matcher)
            .field("kind", &self.kind)
            .field("decoded", &self.decoder.is_some())
            .finish()
    }
}

/// Result of matching a topic against a [`Demux`]
pub struct Route<'a> {
    pub kind: EventKind,
    pub decoder: Option<&'a dyn Decoder>,
}

/// Ordered rule list plus the fallback switch
#[derive(Debug, Clone, Default)]
pub struct Demux {
    rules: Vec<DemuxRule>,
    fallback: bool,
}

impl Demux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Detection and association suffix rules, no fallback
    pub fn camera() -> Self {
        Self::new()
            .rule(DemuxRule::new(
                TopicMatcher::Suffix(DETECTIONS_SUFFIX.to_string()),
                EventKind::Detection,
            ))
            .rule(DemuxRule::new(
                TopicMatcher::Suffix(ASSOCIATIONS_SUFFIX.to_string()),
                EventKind::Association,
            ))
    }

    /// Camera rules, then one exact rule per business topic, with fallback
    pub fn business<S: AsRef<str>>(topics: &[S]) -> Self {
        topics
            .iter()
            .fold(Self::camera(), |demux, topic| {
                let name = topic.as_ref().to_string();
                demux.rule(DemuxRule::new(
                    TopicMatcher::Exact(name.clone()),
                    EventKind::Topic(name),
                ))
            })
            .with_fallback(true)
    }

    /// Workflow output topics
    pub fn flow() -> Self {
        Self::new().rule(DemuxRule::new(
            TopicMatcher::Suffix(FLOW_TOPIC_SUFFIX.to_string()),
            EventKind::FlowOutput,
        ))
    }

    pub fn rule(mut self, rule: DemuxRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_fallback(mut self, fallback: bool) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn fallback(&self) -> bool {
        self.fallback
    }

    pub fn rules(&self) -> &[DemuxRule] {
        &self.rules
    }

    /// First matching rule, else the fallback kind if enabled
    pub fn route(&self, topic: &str) -> Option<Route<'_>> {
        if let Some(rule) = self.rules.iter().find(|r| r.matcher.matches(topic)) {
            return Some(Route {
                kind: rule.kind.clone(),
                decoder: rule.decoder.as_deref(),
            });
        }
        self.fallback.then(|| Route {
            kind: EventKind::Topic(topic.to_string()),
            decoder: None,
        })
    }
}

/// A record as delivered to listeners
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowEvent {
    pub kind: EventKind,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    #[serde(skip)]
    pub key: Option<Bytes>,
    #[serde(skip)]
    pub value: Bytes,
    /// Decoder output; `None` when the route passes the raw value on
    pub decoded: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl FlowEvent {
    /// The decoded payload, or the raw value read as UTF-8 text
    pub fn payload(&self) -> serde_json::Value {
        match &self.decoded {
            Some(value) => value.clone(),
            None => serde_json::Value::String(String::from_utf8_lossy(&self.value).into_owned()),
        }
    }
}

/// Listener for one event kind
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &FlowEvent) -> anyhow::Result<()>;
}

impl<F> EventHandler for F
where
    F: Fn(&FlowEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn handle(&self, event: &FlowEvent) -> anyhow::Result<()> {
        self(event)
    }
}

/// Outcome of one [`EventRouter::emit`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitReport {
    pub invoked: usize,
    pub failed: usize,
}

/// Kind-to-listeners mapping. Cloning shares the registrations.
#[derive(Clone, Default)]
pub struct EventRouter {
    handlers: Arc<RwLock<HashMap<EventKind, Vec<Arc<dyn EventHandler>>>>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        self.handlers.write().entry(kind).or_default().push(handler);
    }

    /// Register a closure listener
    pub fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&FlowEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(kind, Arc::new(handler));
    }

    pub fn handler_count(&self, kind: &EventKind) -> usize {
        self.handlers.read().get(kind).map_or(0, Vec::len)
    }

    /// Invoke every listener for `event.kind` in registration order.
    ///
    /// A listener that errors or panics is logged and skipped; the rest still
    /// run. Listeners registered during the call see the next event.
    pub fn emit(&self, event: &FlowEvent) -> EmitReport {
        let handlers = match self.handlers.read().get(&event.kind) {
            Some(handlers) => handlers.clone(),
            None => {
                debug!(kind = %event.kind, topic = %event.topic, "No listeners for event");
                return EmitReport::default();
            }
        };

        let mut report = EmitReport::default();
        for (index, handler) in handlers.iter().enumerate() {
            report.invoked += 1;
            match catch_unwind(AssertUnwindSafe(|| handler.handle(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!(kind = %event.kind, topic = %event.topic, handler = index, error = %e, "Event handler failed");
                }
                Err(_) => {
                    report.failed += 1;
                    warn!(kind = %event.kind, topic = %event.topic, handler = index, "Event handler panicked");
                }
            }
        }
        report
    }
}

impl fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.read();
        let mut kinds: Vec<_> = handlers.iter().map(|(k, v)| (k.name().to_string(), v.len())).collect();
        kinds.sort();
        f.debug_struct("EventRouter").field("handlers", &kinds).finish()
    }
}
