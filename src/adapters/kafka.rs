//! Kafka Stream Adapter
//!
//! At-least-once consumption with manual offset commits. Auto-commit is off,
//! so nothing is committed until the pipeline calls `ack`.

use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::domain::ports::{InboundRecord, OrderStream};
use crate::error::Result;

/// Kafka consumer configuration
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Comma-separated bootstrap servers
    pub brokers: String,
    pub topic: String,
    pub group_id: String,
    /// Timeout for the seek issued on redelivery
    pub seek_timeout: Duration,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            topic: "orders".to_string(),
            group_id: "order-consumer-group".to_string(),
            seek_timeout: Duration::from_secs(5),
        }
    }
}

impl KafkaConfig {
    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "45000")
            .set("max.poll.interval.ms", "300000");
        config
    }
}

/// Order stream backed by a Kafka consumer group
pub struct KafkaOrderStream {
    consumer: StreamConsumer,
    topic: String,
    seek_timeout: Duration,
}

impl KafkaOrderStream {
    /// Create the consumer and subscribe to the configured topic.
    pub fn connect(config: &KafkaConfig) -> Result<Self> {
        let consumer: StreamConsumer = config.client_config().create()?;
        consumer.subscribe(&[config.topic.as_str()])?;

        info!(
            brokers = %config.brokers,
            topic = %config.topic,
            group_id = %config.group_id,
            "Kafka consumer subscribed"
        );

        Ok(Self {
            consumer,
            topic: config.topic.clone(),
            seek_timeout: config.seek_timeout,
        })
    }
}

#[async_trait]
impl OrderStream for KafkaOrderStream {
    async fn next(&self) -> Result<Option<InboundRecord>> {
        let message = self.consumer.recv().await?;

        // A tombstone carries no payload; it flows on as an empty record and
        // is discarded as malformed.
        let payload = message.payload().map(Bytes::copy_from_slice).unwrap_or_default();
        let mut record = InboundRecord::new(message.partition(), message.offset(), payload);
        record.key = message.key().map(Bytes::copy_from_slice);

        debug!(
            partition = record.partition,
            offset = record.offset,
            bytes = record.payload.len(),
            "Received record"
        );
        Ok(Some(record))
    }

    async fn ack(&self, record: &InboundRecord) -> Result<()> {
        let mut offsets = TopicPartitionList::new();
        offsets.add_partition_offset(
            &self.topic,
            record.partition,
            Offset::Offset(record.offset + 1),
        )?;
        self.consumer.commit(&offsets, CommitMode::Async)?;
        Ok(())
    }

    async fn redeliver(&self, record: &InboundRecord) -> Result<()> {
        warn!(
            partition = record.partition,
            offset = record.offset,
            "Rewinding partition for redelivery"
        );
        self.consumer.seek(
            &self.topic,
            record.partition,
            Offset::Offset(record.offset),
            self.seek_timeout,
        )?;
        Ok(())
    }
}
