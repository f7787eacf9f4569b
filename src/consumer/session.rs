//! Long-lived consumer-group session with unbounded reconnect

use super::config::SessionConfig;
use super::shutdown::ShutdownState;
use crate::client::{BrokerClient, ConsumerConnection, ConsumerOptions, RawRecord};
use crate::error::{BrokerError, BrokerResult};
use crate::metrics::BrokerMetrics;
use crate::notify::{Notifier, NotifyLevel};
use crate::router::{Demux, EventRouter, FlowEvent};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const COMPONENT: &str = "CONSUMER_SESSION";

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    /// Connecting, or waiting to retry after a failure
    Connecting,
    Subscribed,
    Running,
    /// Terminal; reached only through `stop`
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Subscribed => "subscribed",
            SessionState::Running => "running",
            SessionState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// How one connect-subscribe-run pass ended without an error
enum PassEnd {
    Stopped,
    StreamEnded,
}

/// Everything the run loop owns
struct Runner {
    client: Arc<dyn BrokerClient>,
    config: SessionConfig,
    group_id: String,
    topics: Vec<String>,
    router: EventRouter,
    notifier: Arc<dyn Notifier>,
    metrics: BrokerMetrics,
    shutdown: Arc<ShutdownState>,
    state: Arc<watch::Sender<SessionState>>,
    connect_attempts: Arc<AtomicU64>,
}

/// One consumer-group connection and its run loop.
///
/// The session owns its connection exclusively. After `start` it reconnects
/// forever until `stop` is called; records are delivered one at a time, so no
/// two records of one session are ever inside listeners at once.
pub struct ConsumerSession {
    client: Arc<dyn BrokerClient>,
    config: SessionConfig,
    group_id: String,
    topics: Mutex<BTreeSet<String>>,
    router: EventRouter,
    notifier: Arc<dyn Notifier>,
    metrics: BrokerMetrics,
    shutdown: Arc<ShutdownState>,
    state: Arc<watch::Sender<SessionState>>,
    connect_attempts: Arc<AtomicU64>,
    task: Mutex<TaskSlot>,
}

/// Run loop handle; `started` stays set after a stopper takes the handle
#[derive(Default)]
struct TaskSlot {
    handle: Option<JoinHandle<()>>,
    started: bool,
}

impl ConsumerSession {
    /// Create an idle session with a fresh group id
    pub fn new(
        client: Arc<dyn BrokerClient>,
        config: SessionConfig,
        router: EventRouter,
        notifier: Arc<dyn Notifier>,
        metrics: BrokerMetrics,
    ) -> BrokerResult<Self> {
        config.validate()?;
        let group_id = format!("{}_{}", config.group_prefix, uuid::Uuid::new_v4().simple());
        let (state, _) = watch::channel(SessionState::Disconnected);

        Ok(Self {
            client,
            config,
            group_id,
            topics: Mutex::new(BTreeSet::new()),
            router,
            notifier,
            metrics,
            shutdown: Arc::new(ShutdownState::new()),
            state: Arc::new(state),
            connect_attempts: Arc::new(AtomicU64::new(0)),
            task: Mutex::new(TaskSlot::default()),
        })
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn topics(&self) -> BTreeSet<String> {
        self.topics.lock().clone()
    }

    /// Listener registry; register before or after `start`
    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    pub fn demux(&self) -> &Demux {
        &self.config.demux
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Observe state transitions
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Connect attempts made so far, including the first
    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::Relaxed)
    }

    /// Wait until the session reaches `target`; false on timeout
    pub async fn wait_for_state(&self, target: SessionState, timeout: Duration) -> bool {
        let mut rx = self.state.subscribe();
        let reached = tokio::time::timeout(timeout, rx.wait_for(|s| *s == target))
            .await
            .is_ok_and(|waited| waited.is_ok());
        reached
    }

    /// Begin consuming `topics` in the background.
    ///
    /// Never fails to the caller: connection problems are retried forever.
    /// An empty topic set, a second `start`, or a start after `stop` is
    /// logged and ignored.
    pub fn start<I, S>(&self, topics: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let topics: BTreeSet<String> = topics.into_iter().map(Into::into).collect();
        if topics.is_empty() {
            error!(group_id = %self.group_id, "No topics to subscribe to");
            self.notifier.notify(
                NotifyLevel::Error,
                COMPONENT,
                &format!("Session {} started without topics", self.group_id),
                true,
            );
            return;
        }

        let mut task = self.task.lock();
        if self.shutdown.is_shutting_down() {
            warn!(group_id = %self.group_id, "Session already stopped; ignoring start");
            return;
        }
        if task.started {
            warn!(group_id = %self.group_id, "Session already started");
            return;
        }

        *self.topics.lock() = topics.clone();
        info!(group_id = %self.group_id, topics = ?topics, "Starting consumer session");

        let runner = Runner {
            client: self.client.clone(),
            config: self.config.clone(),
            group_id: self.group_id.clone(),
            topics: topics.into_iter().collect(),
            router: self.router.clone(),
            notifier: self.notifier.clone(),
            metrics: self.metrics.clone(),
            shutdown: self.shutdown.clone(),
            state: self.state.clone(),
            connect_attempts: self.connect_attempts.clone(),
        };
        task.handle = Some(tokio::spawn(runner.run()));
        task.started = true;
    }

    /// Stop for good. A record already inside listeners finishes first; the
    /// connection is released before this returns.
    pub async fn stop(&self) {
        if !self.shutdown.begin_shutdown() {
            debug!(group_id = %self.group_id, "Session stop already requested");
        }

        let (handle, started) = {
            let mut task = self.task.lock();
            (task.handle.take(), task.started)
        };
        match handle {
            Some(handle) => {
                if let Err(e) = handle.await {
                    error!(group_id = %self.group_id, error = %e, "Session task failed");
                    self.state.send_replace(SessionState::Stopped);
                    self.shutdown.complete_shutdown();
                }
            }
            // Another caller is joining the run loop
            None if started => self.shutdown.wait_complete().await,
            None => {
                self.state.send_replace(SessionState::Stopped);
            }
        }
        info!(group_id = %self.group_id, "Consumer session stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == SessionState::Stopped
    }
}

impl Drop for ConsumerSession {
    fn drop(&mut self) {
        // Let a detached run loop wind down instead of reconnecting forever.
        self.shutdown.begin_shutdown();
    }
}

impl fmt::Debug for ConsumerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerSession")
            .field("group_id", &self.group_id)
            .field("topics", &self.topics())
            .field("state", &self.state())
            .finish()
    }
}

impl Runner {
    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(group_id = %self.group_id, from = %previous, to = %state, "Session state changed");
        }
    }

    async fn run(self) {
        let mut retries: u32 = 0;

        while !self.shutdown.is_shutting_down() {
            self.set_state(SessionState::Connecting);
            self.connect_attempts.fetch_add(1, Ordering::Relaxed);
            self.metrics.record_connect_attempt();
            if retries > 0 {
                self.metrics.record_reconnect();
            }

            match self.run_pass().await {
                Ok(PassEnd::Stopped) => break,
                Ok(PassEnd::StreamEnded) => {
                    warn!(group_id = %self.group_id, "Record stream ended; reconnecting");
                }
                Err(e) => {
                    self.notifier.notify(
                        NotifyLevel::Error,
                        COMPONENT,
                        &format!("Session {} failed: {}", self.group_id, e),
                        true,
                    );
                }
            }

            if self.shutdown.is_shutting_down() {
                break;
            }

            self.set_state(SessionState::Connecting);
            retries = retries.saturating_add(1);
            let backoff = self.config.retry.next_backoff(retries);
            info!(group_id = %self.group_id, attempt = retries, "Retrying consumer connection in {:?}", backoff);

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = self.shutdown.wait() => break,
            }
        }

        self.set_state(SessionState::Stopped);
        self.shutdown.complete_shutdown();
    }

    /// Create, connect, subscribe and drain one connection. The connection is
    /// released whatever the outcome.
    async fn run_pass(&self) -> BrokerResult<PassEnd> {
        let mut consumer = self.client.consumer(ConsumerOptions {
            group_id: self.group_id.clone(),
            from_beginning: self.config.from_beginning,
        })?;

        let result = self.drive(consumer.as_mut()).await;

        if let Err(e) = consumer.disconnect().await {
            debug!(group_id = %self.group_id, error = %e, "Consumer disconnect failed");
        }
        result
    }

    async fn drive(&self, consumer: &mut dyn ConsumerConnection) -> BrokerResult<PassEnd> {
        let connected = tokio::select! {
            biased;
            _ = self.shutdown.wait() => return Ok(PassEnd::Stopped),
            connected = consumer.connect() => connected,
        };
        connected.map_err(|e| match e {
            BrokerError::Connect(_) => e,
            other => BrokerError::Connect(other.to_string()),
        })?;

        let subscribed = tokio::select! {
            biased;
            _ = self.shutdown.wait() => return Ok(PassEnd::Stopped),
            subscribed = consumer.subscribe(&self.topics) => subscribed,
        };
        subscribed.map_err(|e| match e {
            BrokerError::Subscribe(_) => e,
            other => BrokerError::Subscribe(other.to_string()),
        })?;
        self.set_state(SessionState::Subscribed);
        info!(group_id = %self.group_id, topics = ?self.topics, "Subscribed");

        self.set_state(SessionState::Running);
        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.wait() => return Ok(PassEnd::Stopped),
                next = consumer.next_record() => next,
            };

            match next {
                None => return Ok(PassEnd::StreamEnded),
                Some(Err(e)) => {
                    return Err(match e {
                        BrokerError::Stream(_) => e,
                        other => BrokerError::Stream(other.to_string()),
                    })
                }
                Some(Ok(record)) => {
                    self.shutdown.add_inflight_record();
                    on_record(record, &self.config.demux, &self.router, &self.metrics);
                    self.shutdown.remove_inflight_record();
                }
            }
        }
    }
}

/// Route one record and hand it to listeners.
///
/// Empty values, unmatched topics (without fallback) and undecodable
/// payloads produce no event.
pub(crate) fn on_record(
    record: RawRecord,
    demux: &Demux,
    router: &EventRouter,
    metrics: &BrokerMetrics,
) {
    metrics.record_received();

    let value = match record.value {
        Some(value) if !value.is_empty() => value,
        _ => {
            metrics.record_skipped();
            debug!(topic = %record.topic, offset = record.offset, "Skipping empty record");
            return;
        }
    };

    let Some(route) = demux.route(&record.topic) else {
        metrics.record_unrouted();
        debug!(topic = %record.topic, "No route for topic");
        return;
    };

    let decoded = match route.decoder {
        Some(decoder) => match decoder.decode(&record.topic, &value) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                metrics.record_decode_failure();
                debug!(topic = %record.topic, offset = record.offset, error = %e, "Dropping undecodable record");
                return;
            }
        },
        None => None,
    };

    let event = FlowEvent {
        kind: route.kind,
        topic: record.topic,
        partition: record.partition,
        offset: record.offset,
        key: record.key,
        value,
        decoded,
        timestamp: record.timestamp.unwrap_or_else(Utc::now),
    };

    let report = router.emit(&event);
    metrics.record_dispatched();
    for _ in 0..report.failed {
        metrics.record_handler_failure();
    }
}
