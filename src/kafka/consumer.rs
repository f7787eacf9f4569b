use super::{blocking, METADATA_TIMEOUT};
use crate::client::{ConsumerConnection, ConsumerOptions, RawRecord};
use crate::error::{BrokerError, BrokerResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::BorrowedMessage;
use rdkafka::{ClientConfig, Message};
use std::sync::Arc;
use tracing::debug;

/// One consumer-group connection over a `StreamConsumer`
pub struct KafkaConsumer {
    config: ClientConfig,
    options: ConsumerOptions,
    consumer: Option<Arc<StreamConsumer>>,
}

impl KafkaConsumer {
    pub fn new(mut config: ClientConfig, options: ConsumerOptions) -> Self {
        let offset_reset = if options.from_beginning {
            "earliest"
        } else {
            "latest"
        };
        config
            .set("group.id", &options.group_id)
            .set("auto.offset.reset", offset_reset)
            .set("enable.auto.commit", "true")
            .set("enable.partition.eof", "false");
        Self {
            config,
            options,
            consumer: None,
        }
    }

    fn consumer(&self) -> BrokerResult<&StreamConsumer> {
        self.consumer
            .as_deref()
            .ok_or_else(|| BrokerError::Stream("consumer not connected".to_string()))
    }
}

fn to_record(message: &BorrowedMessage<'_>) -> RawRecord {
    RawRecord {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(Bytes::copy_from_slice),
        value: message.payload().map(Bytes::copy_from_slice),
        timestamp: message
            .timestamp()
            .to_millis()
            .and_then(DateTime::<Utc>::from_timestamp_millis),
    }
}

#[async_trait]
impl ConsumerConnection for KafkaConsumer {
    async fn connect(&mut self) -> BrokerResult<()> {
        let consumer: StreamConsumer = self
            .config
            .create()
            .map_err(|e| BrokerError::Connect(format!("Failed to create consumer: {}", e)))?;
        let consumer = Arc::new(consumer);

        let probe = consumer.clone();
        blocking(move || {
            probe
                .fetch_metadata(None, METADATA_TIMEOUT)
                .map(|_| ())
                .map_err(|e| BrokerError::Connect(format!("Broker unreachable: {}", e)))
        })
        .await?;

        debug!(group_id = %self.options.group_id, "Consumer connected");
        self.consumer = Some(consumer);
        Ok(())
    }

    async fn subscribe(&mut self, topics: &[String]) -> BrokerResult<()> {
        let topics: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer()
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?
            .subscribe(&topics)
            .map_err(|e| BrokerError::Subscribe(e.to_string()))
    }

    async fn next_record(&mut self) -> Option<BrokerResult<RawRecord>> {
        let consumer = match self.consumer() {
            Ok(consumer) => consumer,
            Err(e) => return Some(Err(e)),
        };
        Some(
            consumer
                .recv()
                .await
                .map(|message| to_record(&message))
                .map_err(|e| BrokerError::Stream(e.to_string())),
        )
    }

    async fn disconnect(&mut self) -> BrokerResult<()> {
        if let Some(consumer) = self.consumer.take() {
            consumer.unsubscribe();
            debug!(group_id = %self.options.group_id, "Consumer disconnected");
        }
        Ok(())
    }
}
