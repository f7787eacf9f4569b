//! Workflow output monitor behind the companion real-time channel
//!
//! Collects events from `*-topic` workflow output topics, keeps the most
//! recent ones, and answers the channel's control messages.

use crate::router::{EventKind, EventRouter, FlowEvent};
use crate::topics::OrgUsrNode;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Outputs retained for `get-latest-outputs`
pub const MAX_RETAINED_OUTPUTS: usize = 100;
/// Batch size when a request names no limit
pub const DEFAULT_OUTPUT_LIMIT: usize = 10;

const UPDATE_CAPACITY: usize = 256;

/// Inbound control message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlMessage {
    GetLatestOutputs {
        #[serde(default)]
        limit: Option<usize>,
    },
    GetStatus,
    MonitorSpecificOrg {
        #[serde(rename = "orgUsrNode")]
        org_usr_node: String,
    },
}

/// One workflow output as sent to the channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowOutput {
    pub topic: String,
    pub org_usr_node: Option<String>,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl From<&FlowEvent> for FlowOutput {
    fn from(event: &FlowEvent) -> Self {
        Self {
            topic: event.topic.clone(),
            org_usr_node: OrgUsrNode::from_topic(&event.topic).map(String::from),
            partition: event.partition,
            offset: event.offset,
            key: event
                .key
                .as_ref()
                .map(|k| String::from_utf8_lossy(k).into_owned()),
            payload: event.payload(),
            timestamp: event.timestamp,
        }
    }
}

/// `flow-output` body: one output as it arrives, or a requested batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputBatch {
    Single(FlowOutput),
    Batch(Vec<FlowOutput>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowStatus {
    pub topic_count: usize,
    pub total_outputs: u64,
}

/// Outbound notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum FlowNotification {
    FlowOutput(OutputBatch),
    FlowStatus(FlowStatus),
    Error { error: String },
}

#[derive(Debug, Default)]
struct MonitorState {
    /// Newest first
    outputs: VecDeque<FlowOutput>,
    topics: BTreeSet<String>,
    total_outputs: u64,
    focus: Option<OrgUsrNode>,
}

/// Shared output store. Cloning shares the state.
#[derive(Debug, Clone)]
pub struct FlowMonitor {
    state: Arc<RwLock<MonitorState>>,
    updates: broadcast::Sender<FlowNotification>,
}

impl Default for FlowMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowMonitor {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);
        Self {
            state: Arc::new(RwLock::new(MonitorState::default())),
            updates,
        }
    }

    /// Feed every `flow-output` event of `router` into this monitor
    pub fn attach(&self, router: &EventRouter) {
        let monitor = self.clone();
        router.on(EventKind::FlowOutput, move |event| {
            monitor.record(event);
            Ok(())
        });
    }

    /// Store an output and broadcast it unless a different key is focused
    pub fn record(&self, event: &FlowEvent) -> FlowOutput {
        let output = FlowOutput::from(event);
        let announce = {
            let mut state = self.state.write();
            state.outputs.push_front(output.clone());
            state.outputs.truncate(MAX_RETAINED_OUTPUTS);
            state.topics.insert(output.topic.clone());
            state.total_outputs += 1;
            state
                .focus
                .as_ref()
                .map_or(true, |focus| focus.owns_topic(&output.topic))
        };

        if announce {
            // Lagging or absent subscribers are not our concern.
            let _ = self
                .updates
                .send(FlowNotification::FlowOutput(OutputBatch::Single(output.clone())));
        }
        debug!(topic = %output.topic, offset = output.offset, "Flow output recorded");
        output
    }

    /// Live `flow-output` notifications
    pub fn subscribe(&self) -> broadcast::Receiver<FlowNotification> {
        self.updates.subscribe()
    }

    /// Up to `limit` retained outputs, newest first, within the focus
    pub fn latest(&self, limit: usize) -> Vec<FlowOutput> {
        let state = self.state.read();
        state
            .outputs
            .iter()
            .filter(|o| {
                state
                    .focus
                    .as_ref()
                    .map_or(true, |focus| focus.owns_topic(&o.topic))
            })
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn status(&self) -> FlowStatus {
        let state = self.state.read();
        FlowStatus {
            topic_count: state.topics.len(),
            total_outputs: state.total_outputs,
        }
    }

    pub fn focus(&self) -> Option<OrgUsrNode> {
        self.state.read().focus.clone()
    }

    /// Answer one control message
    pub fn handle(&self, message: ControlMessage) -> FlowNotification {
        match message {
            ControlMessage::GetLatestOutputs { limit } => FlowNotification::FlowOutput(
                OutputBatch::Batch(self.latest(limit.unwrap_or(DEFAULT_OUTPUT_LIMIT))),
            ),
            ControlMessage::GetStatus => FlowNotification::FlowStatus(self.status()),
            ControlMessage::MonitorSpecificOrg { org_usr_node } => {
                match OrgUsrNode::parse(&org_usr_node) {
                    Ok(node) => {
                        info!(org_usr_node = %node, "Monitoring workflow outputs");
                        self.state.write().focus = Some(node);
                        FlowNotification::FlowOutput(OutputBatch::Batch(
                            self.latest(MAX_RETAINED_OUTPUTS),
                        ))
                    }
                    Err(e) => FlowNotification::Error {
                        error: e.to_string(),
                    },
                }
            }
        }
    }

    /// Parse and answer a JSON control message
    pub fn handle_json(&self, text: &str) -> FlowNotification {
        match serde_json::from_str::<ControlMessage>(text) {
            Ok(message) => self.handle(message),
            Err(e) => FlowNotification::Error {
                error: format!("Invalid control message: {}", e),
            },
        }
    }
}
