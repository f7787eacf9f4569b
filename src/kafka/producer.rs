use super::{blocking, METADATA_TIMEOUT, SEND_TIMEOUT};
use crate::client::{Delivery, ProducerConnection};
use crate::error::{BrokerError, BrokerResult};
use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;

/// Send path over a `FutureProducer`
pub struct KafkaProducer {
    producer: FutureProducer,
}

impl KafkaProducer {
    /// Create the producer and prove the cluster is reachable
    pub async fn connect(mut config: ClientConfig) -> BrokerResult<Self> {
        let producer: FutureProducer = config
            .set("message.timeout.ms", SEND_TIMEOUT.as_millis().to_string())
            .create()
            .map_err(|e| BrokerError::Connect(format!("Failed to create producer: {}", e)))?;

        let probe = producer.clone();
        blocking(move || {
            probe
                .client()
                .fetch_metadata(None, METADATA_TIMEOUT)
                .map(|_| ())
                .map_err(|e| BrokerError::Connect(format!("Broker unreachable: {}", e)))
        })
        .await?;

        Ok(Self { producer })
    }
}

#[async_trait]
impl ProducerConnection for KafkaProducer {
    async fn send(&self, topic: &str, key: Option<&[u8]>, payload: &[u8]) -> BrokerResult<Delivery> {
        let mut record = FutureRecord::<[u8], [u8]>::to(topic).payload(payload);
        if let Some(key) = key {
            record = record.key(key);
        }

        match self.producer.send(record, Timeout::After(SEND_TIMEOUT)).await {
            Ok((partition, offset)) => Ok(Delivery { partition, offset }),
            Err((e, _)) => Err(BrokerError::Send(format!("{}: {}", topic, e))),
        }
    }

    async fn disconnect(&self) -> BrokerResult<()> {
        let producer = self.producer.clone();
        blocking(move || {
            producer
                .flush(Timeout::After(SEND_TIMEOUT))
                .map_err(|e| BrokerError::Send(format!("Flush failed: {}", e)))
        })
        .await
    }
}
