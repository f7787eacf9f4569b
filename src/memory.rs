//! In-process broker for tests and demos
//!
//! Keeps topics and their records in memory, fans published records out to
//! subscribed consumers over a broadcast channel, and lets callers inject
//! failures at every step a real cluster can fail: connects, subscribes,
//! sends, topic creation and live streams.

use crate::client::{
    AdminConnection, BrokerClient, ConsumerConnection, ConsumerOptions, Delivery,
    ProducerConnection, RawRecord, TopicMetadata, TopicOutcome, TopicStatus,
};
use crate::error::{BrokerError, BrokerResult};
use crate::topics::{ConfigEntry, TopicSpec};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct TopicLog {
    partitions: usize,
    config: BTreeMap<String, String>,
    records: Vec<RawRecord>,
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: BTreeMap<String, TopicLog>,
    create_batches: Vec<Vec<String>>,
    consumer_groups: Vec<String>,
}

#[derive(Debug, Default)]
struct Faults {
    admin_connects: AtomicU32,
    producer_connects: AtomicU32,
    consumer_connects: AtomicU32,
    subscribes: AtomicU32,
    sends: AtomicU32,
    creates: AtomicU32,
    create_race: AtomicBool,
}

/// Counters of calls made against a [`MemoryBroker`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub admin_connects: u64,
    pub producer_connects: u64,
    pub consumer_connect_attempts: u64,
    pub consumer_disconnects: u64,
    pub subscribes: u64,
    pub send_attempts: u64,
    pub records_published: u64,
}

#[derive(Debug, Default)]
struct Counters {
    admin_connects: AtomicU64,
    producer_connects: AtomicU64,
    consumer_connect_attempts: AtomicU64,
    consumer_disconnects: AtomicU64,
    subscribes: AtomicU64,
    send_attempts: AtomicU64,
    records_published: AtomicU64,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<BrokerState>,
    records: broadcast::Sender<RawRecord>,
    drops: broadcast::Sender<()>,
    faults: Faults,
    counters: Counters,
}

/// In-memory broker. Cloning shares the cluster.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

fn take_fault(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::SeqCst);
}

impl MemoryBroker {
    pub fn new() -> Self {
        let (records, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (drops, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(BrokerState::default()),
                records,
                drops,
                faults: Faults::default(),
                counters: Counters::default(),
            }),
        }
    }

    /// Create topics out of band, as another process would
    pub fn with_topics<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        {
            let mut state = self.inner.state.lock();
            for name in names {
                state.topics.entry(name.into()).or_insert_with(|| TopicLog {
                    partitions: 1,
                    ..TopicLog::default()
                });
            }
        }
        self
    }

    /// Append a record to `topic` (creating it if needed) and deliver it to
    /// subscribed consumers
    pub fn publish(&self, topic: &str, key: Option<&[u8]>, value: &[u8]) -> Delivery {
        let mut state = self.inner.state.lock();
        let log = state
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicLog {
                partitions: 1,
                ..TopicLog::default()
            });

        let record = RawRecord {
            topic: topic.to_string(),
            partition: 0,
            offset: log.records.len() as i64,
            key: key.map(Bytes::copy_from_slice),
            value: Some(Bytes::copy_from_slice(value)),
            timestamp: Some(Utc::now()),
        };
        log.records.push(record.clone());
        let delivery = Delivery {
            partition: record.partition,
            offset: record.offset,
        };
        // Sent under the state lock so a subscriber sees each record once,
        // either in its backlog or live. No receivers is fine.
        let _ = self.inner.records.send(record);
        drop(state);

        bump(&self.inner.counters.records_published);
        delivery
    }

    /// Deliver a record with no value (tombstone)
    pub fn publish_empty(&self, topic: &str) {
        let record = RawRecord {
            topic: topic.to_string(),
            partition: 0,
            offset: -1,
            key: None,
            value: None,
            timestamp: Some(Utc::now()),
        };
        let _ = self.inner.records.send(record);
    }

    /// Break every live consumer stream
    pub fn drop_consumers(&self) {
        let _ = self.inner.drops.send(());
    }

    pub fn fail_next_admin_connects(&self, n: u32) {
        self.inner.faults.admin_connects.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_producer_connects(&self, n: u32) {
        self.inner.faults.producer_connects.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_consumer_connects(&self, n: u32) {
        self.inner.faults.consumer_connects.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_subscribes(&self, n: u32) {
        self.inner.faults.subscribes.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_sends(&self, n: u32) {
        self.inner.faults.sends.store(n, Ordering::SeqCst);
    }

    /// Reject every topic of the next `n` create batches
    pub fn fail_next_creates(&self, n: u32) {
        self.inner.faults.creates.store(n, Ordering::SeqCst);
    }

    /// Answer creates as if another client created the topics first
    pub fn simulate_create_race(&self, enabled: bool) {
        self.inner.faults.create_race.store(enabled, Ordering::SeqCst);
    }

    /// Every non-empty create batch received, in order
    pub fn create_batches(&self) -> Vec<Vec<String>> {
        self.inner.state.lock().create_batches.clone()
    }

    pub fn topics(&self) -> BTreeSet<String> {
        self.inner.state.lock().topics.keys().cloned().collect()
    }

    pub fn topic_config(&self, topic: &str) -> Option<BTreeMap<String, String>> {
        self.inner
            .state
            .lock()
            .topics
            .get(topic)
            .map(|log| log.config.clone())
    }

    /// Records stored on `topic`
    pub fn records(&self, topic: &str) -> Vec<RawRecord> {
        self.inner
            .state
            .lock()
            .topics
            .get(topic)
            .map(|log| log.records.clone())
            .unwrap_or_default()
    }

    /// Group ids of every consumer created, in order
    pub fn consumer_groups(&self) -> Vec<String> {
        self.inner.state.lock().consumer_groups.clone()
    }

    pub fn stats(&self) -> MemoryStats {
        let c = &self.inner.counters;
        MemoryStats {
            admin_connects: c.admin_connects.load(Ordering::SeqCst),
            producer_connects: c.producer_connects.load(Ordering::SeqCst),
            consumer_connect_attempts: c.consumer_connect_attempts.load(Ordering::SeqCst),
            consumer_disconnects: c.consumer_disconnects.load(Ordering::SeqCst),
            subscribes: c.subscribes.load(Ordering::SeqCst),
            send_attempts: c.send_attempts.load(Ordering::SeqCst),
            records_published: c.records_published.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl BrokerClient for MemoryBroker {
    async fn connect_admin(&self) -> BrokerResult<Arc<dyn AdminConnection>> {
        if take_fault(&self.inner.faults.admin_connects) {
            return Err(BrokerError::Connect("injected admin connect failure".to_string()));
        }
        bump(&self.inner.counters.admin_connects);
        Ok(Arc::new(MemoryAdmin {
            broker: self.clone(),
        }))
    }

    async fn connect_producer(&self) -> BrokerResult<Arc<dyn ProducerConnection>> {
        if take_fault(&self.inner.faults.producer_connects) {
            return Err(BrokerError::Connect("injected producer connect failure".to_string()));
        }
        bump(&self.inner.counters.producer_connects);
        Ok(Arc::new(MemoryProducer {
            broker: self.clone(),
        }))
    }

    fn consumer(&self, options: ConsumerOptions) -> BrokerResult<Box<dyn ConsumerConnection>> {
        self.inner
            .state
            .lock()
            .consumer_groups
            .push(options.group_id.clone());
        Ok(Box::new(MemoryConsumer {
            broker: self.clone(),
            options,
            connected: false,
            topics: BTreeSet::new(),
            backlog: VecDeque::new(),
            records: None,
            drops: None,
        }))
    }
}

struct MemoryAdmin {
    broker: MemoryBroker,
}

#[async_trait]
impl AdminConnection for MemoryAdmin {
    async fn list_topics(&self) -> BrokerResult<Vec<String>> {
        Ok(self.broker.topics().into_iter().collect())
    }

    async fn create_topics(&self, specs: &[TopicSpec]) -> BrokerResult<Vec<TopicOutcome>> {
        let inner = &self.broker.inner;
        let mut state = inner.state.lock();
        if !specs.is_empty() {
            state
                .create_batches
                .push(specs.iter().map(|s| s.name.clone()).collect());
        }

        if take_fault(&inner.faults.creates) {
            return Ok(specs
                .iter()
                .map(|s| TopicOutcome::new(&s.name, TopicStatus::Failed("injected create failure".to_string())))
                .collect());
        }
        let raced = inner.faults.create_race.load(Ordering::SeqCst);

        let mut outcomes = Vec::with_capacity(specs.len());
        for spec in specs {
            if let Err(e) = spec.validate() {
                outcomes.push(TopicOutcome::new(&spec.name, TopicStatus::Failed(e.to_string())));
                continue;
            }
            if state.topics.contains_key(&spec.name) {
                outcomes.push(TopicOutcome::new(&spec.name, TopicStatus::AlreadyExists));
                continue;
            }

            let config = spec
                .config_entries()
                .into_iter()
                .map(|e| (e.name, e.value))
                .collect();
            state.topics.insert(
                spec.name.clone(),
                TopicLog {
                    partitions: spec.partitions as usize,
                    config,
                    records: Vec::new(),
                },
            );
            let status = if raced {
                TopicStatus::AlreadyExists
            } else {
                TopicStatus::Done
            };
            debug!(topic = %spec.name, "Memory topic created");
            outcomes.push(TopicOutcome::new(&spec.name, status));
        }
        Ok(outcomes)
    }

    async fn delete_topics(&self, names: &[String]) -> BrokerResult<Vec<TopicOutcome>> {
        let mut state = self.broker.inner.state.lock();
        Ok(names
            .iter()
            .map(|name| match state.topics.remove(name) {
                Some(_) => TopicOutcome::new(name, TopicStatus::Done),
                None => TopicOutcome::new(name, TopicStatus::UnknownTopic),
            })
            .collect())
    }

    async fn alter_topic_configs(
        &self,
        names: &[String],
        entries: &[ConfigEntry],
    ) -> BrokerResult<Vec<TopicOutcome>> {
        let mut state = self.broker.inner.state.lock();
        Ok(names
            .iter()
            .map(|name| match state.topics.get_mut(name) {
                Some(log) => {
                    for entry in entries {
                        log.config.insert(entry.name.clone(), entry.value.clone());
                    }
                    TopicOutcome::new(name, TopicStatus::Done)
                }
                None => TopicOutcome::new(name, TopicStatus::UnknownTopic),
            })
            .collect())
    }

    async fn topic_metadata(&self, names: &[String]) -> BrokerResult<Vec<TopicMetadata>> {
        let state = self.broker.inner.state.lock();
        Ok(names
            .iter()
            .filter_map(|name| {
                state.topics.get(name).map(|log| TopicMetadata {
                    name: name.clone(),
                    partitions: log.partitions,
                })
            })
            .collect())
    }

    async fn disconnect(&self) -> BrokerResult<()> {
        Ok(())
    }
}

struct MemoryProducer {
    broker: MemoryBroker,
}

#[async_trait]
impl ProducerConnection for MemoryProducer {
    async fn send(&self, topic: &str, key: Option<&[u8]>, payload: &[u8]) -> BrokerResult<Delivery> {
        bump(&self.broker.inner.counters.send_attempts);
        if take_fault(&self.broker.inner.faults.sends) {
            return Err(BrokerError::Send(format!("injected send failure on {}", topic)));
        }
        Ok(self.broker.publish(topic, key, payload))
    }

    async fn disconnect(&self) -> BrokerResult<()> {
        Ok(())
    }
}

struct MemoryConsumer {
    broker: MemoryBroker,
    options: ConsumerOptions,
    connected: bool,
    topics: BTreeSet<String>,
    backlog: VecDeque<RawRecord>,
    records: Option<broadcast::Receiver<RawRecord>>,
    drops: Option<broadcast::Receiver<()>>,
}

#[async_trait]
impl ConsumerConnection for MemoryConsumer {
    async fn connect(&mut self) -> BrokerResult<()> {
        let inner = &self.broker.inner;
        bump(&inner.counters.consumer_connect_attempts);
        if take_fault(&inner.faults.consumer_connects) {
            return Err(BrokerError::Connect(format!(
                "injected connect failure for {}",
                self.options.group_id
            )));
        }
        self.connected = true;
        Ok(())
    }

    async fn subscribe(&mut self, topics: &[String]) -> BrokerResult<()> {
        let inner = &self.broker.inner;
        if !self.connected {
            return Err(BrokerError::Subscribe("not connected".to_string()));
        }
        if take_fault(&inner.faults.subscribes) {
            return Err(BrokerError::Subscribe(format!(
                "injected subscribe failure for {:?}",
                topics
            )));
        }
        bump(&inner.counters.subscribes);

        self.topics = topics.iter().cloned().collect();
        let state = inner.state.lock();
        self.records = Some(inner.records.subscribe());
        self.drops = Some(inner.drops.subscribe());

        if self.options.from_beginning {
            for topic in &self.topics {
                if let Some(log) = state.topics.get(topic) {
                    self.backlog.extend(log.records.iter().cloned());
                }
            }
        }
        Ok(())
    }

    async fn next_record(&mut self) -> Option<BrokerResult<RawRecord>> {
        if let Some(record) = self.backlog.pop_front() {
            return Some(Ok(record));
        }

        let (Some(records), Some(drops)) = (self.records.as_mut(), self.drops.as_mut()) else {
            return Some(Err(BrokerError::Stream("not subscribed".to_string())));
        };

        loop {
            tokio::select! {
                dropped = drops.recv() => {
                    if !matches!(dropped, Err(broadcast::error::RecvError::Closed)) {
                        return Some(Err(BrokerError::Stream("connection dropped".to_string())));
                    }
                }
                received = records.recv() => match received {
                    Ok(record) if self.topics.contains(&record.topic) => return Some(Ok(record)),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        trace!(skipped, "Memory consumer lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
            }
        }
    }

    async fn disconnect(&mut self) -> BrokerResult<()> {
        if self.connected {
            bump(&self.broker.inner.counters.consumer_disconnects);
        }
        self.connected = false;
        self.records = None;
        self.drops = None;
        self.backlog.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topics::TopicTemplate;

    #[tokio::test]
    async fn test_create_records_batches_and_reports_existing() {
        let broker = MemoryBroker::new().with_topics(["a"]);
        let admin = broker.connect_admin().await.unwrap();
        let template = TopicTemplate::default();

        let outcomes = admin
            .create_topics(&[template.spec("a"), template.spec("b")])
            .await
            .unwrap();
        assert_eq!(outcomes[0].status, TopicStatus::AlreadyExists);
        assert_eq!(outcomes[1].status, TopicStatus::Done);
        assert_eq!(broker.create_batches(), vec![vec!["a".to_string(), "b".to_string()]]);
        assert_eq!(
            broker.topic_config("b").unwrap().get("retention.ms").map(String::as_str),
            Some("1080000")
        );
    }

    #[tokio::test]
    async fn test_consumer_receives_subscribed_topics_only() {
        let broker = MemoryBroker::new();
        let mut consumer = broker
            .consumer(ConsumerOptions {
                group_id: "g".to_string(),
                from_beginning: false,
            })
            .unwrap();
        consumer.connect().await.unwrap();
        consumer.subscribe(&["wanted".to_string()]).await.unwrap();

        broker.publish("other", None, b"x");
        broker.publish("wanted", Some(b"k"), b"y");

        let record = consumer.next_record().await.unwrap().unwrap();
        assert_eq!(record.topic, "wanted");
        assert_eq!(record.value.as_deref(), Some(&b"y"[..]));
        assert_eq!(broker.consumer_groups(), vec!["g".to_string()]);
    }

    #[tokio::test]
    async fn test_from_beginning_replays_backlog() {
        let broker = MemoryBroker::new();
        broker.publish("t", None, b"1");
        broker.publish("t", None, b"2");

        let mut consumer = broker
            .consumer(ConsumerOptions {
                group_id: "g".to_string(),
                from_beginning: true,
            })
            .unwrap();
        consumer.connect().await.unwrap();
        consumer.subscribe(&["t".to_string()]).await.unwrap();

        let first = consumer.next_record().await.unwrap().unwrap();
        let second = consumer.next_record().await.unwrap().unwrap();
        assert_eq!((first.offset, second.offset), (0, 1));
    }

    #[tokio::test]
    async fn test_injected_faults_are_consumed() {
        let broker = MemoryBroker::new();
        broker.fail_next_admin_connects(1);
        assert!(broker.connect_admin().await.is_err());
        assert!(broker.connect_admin().await.is_ok());

        broker.fail_next_sends(1);
        let producer = broker.connect_producer().await.unwrap();
        assert!(matches!(producer.send("t", None, b"x").await, Err(BrokerError::Send(_))));
        assert_eq!(producer.send("t", None, b"x").await.unwrap().offset, 0);
        assert_eq!(broker.stats().send_attempts, 2);
    }

    #[tokio::test]
    async fn test_drop_breaks_stream() {
        let broker = MemoryBroker::new();
        let mut consumer = broker
            .consumer(ConsumerOptions {
                group_id: "g".to_string(),
                from_beginning: false,
            })
            .unwrap();
        consumer.connect().await.unwrap();
        consumer.subscribe(&["t".to_string()]).await.unwrap();

        broker.drop_consumers();
        assert!(matches!(
            consumer.next_record().await,
            Some(Err(BrokerError::Stream(_)))
        ));
    }
}
