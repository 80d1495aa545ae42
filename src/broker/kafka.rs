//! Kafka transport
//!
//! Wraps librdkafka through `rdkafka`. Rebalance callbacks run inside the
//! client's poll loop; they are forwarded as [`BrokerEvent`]s over a channel
//! so the consumer handles them in the same routine as records.
//!
//! Frames are large compared to typical Kafka records. The client is
//! configured for messages up to [`MAX_MESSAGE_BYTES`]; the topic's
//! `max.message.bytes` must allow the same on the broker side.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use rdkafka::{ClientContext, Offset, TopicPartitionList};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{
    BrokerError, BrokerEvent, ConsumerTransport, FramePublisher, PartitionOffset, Record,
    TopicPartition, Watermarks,
};

/// Largest record the client will produce or fetch
pub const MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

/// Wait between enqueue attempts while the local producer queue is full
const QUEUE_FULL_BACKOFF: Duration = Duration::from_millis(5);

/// Connection settings shared by producer and consumer
#[derive(Debug, Clone)]
pub struct KafkaSettings {
    /// Bootstrap servers, e.g. `kafka:9092`
    pub brokers: String,
    /// Topic carrying frame messages
    pub topic: String,
    /// Compression codec (`none`, `gzip`, `snappy`, `lz4`, `zstd`)
    pub compression: String,
    /// Timeout for watermark queries
    pub watermark_timeout: Duration,
}

impl KafkaSettings {
    pub fn new(brokers: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            topic: topic.into(),
            compression: "none".into(),
            watermark_timeout: Duration::from_millis(100),
        }
    }

    /// Set the compression codec
    pub fn compression(mut self, codec: impl Into<String>) -> Self {
        self.compression = codec.into();
        self
    }
}

/// Publishes frames to a Kafka topic
pub struct KafkaPublisher {
    producer: FutureProducer,
    topic: String,
    cancel: CancellationToken,
}

impl KafkaPublisher {
    /// Create the producer client
    pub fn new(settings: &KafkaSettings) -> Result<Self, BrokerError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &settings.brokers)
            .set("compression.type", &settings.compression)
            .set("message.max.bytes", MAX_MESSAGE_BYTES.to_string())
            .create()?;

        tracing::info!(
            brokers = %settings.brokers,
            topic = %settings.topic,
            compression = %settings.compression,
            "Kafka producer created"
        );

        Ok(Self {
            producer,
            topic: settings.topic.clone(),
            cancel: CancellationToken::new(),
        })
    }

    /// Stop retrying a full local queue once `cancel` fires
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl FramePublisher for KafkaPublisher {
    async fn publish(&self, payload: Bytes, timestamp_ms: i64) -> Result<(), BrokerError> {
        let mut record: FutureRecord<'_, (), [u8]> = FutureRecord::to(&self.topic)
            .payload(payload.as_ref())
            .timestamp(timestamp_ms);

        loop {
            match self.producer.send_result(record) {
                Ok(delivery) => {
                    // Delivery reports are informational
                    tokio::spawn(async move {
                        match delivery.await {
                            Ok(Ok(_)) => {}
                            Ok(Err((err, _))) => {
                                tracing::warn!(error = %err, "Frame delivery failed");
                            }
                            Err(_) => {
                                tracing::warn!("Frame delivery report dropped");
                            }
                        }
                    });
                    return Ok(());
                }
                Err((KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull), returned)) => {
                    record = returned;
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(BrokerError::Closed),
                        _ = tokio::time::sleep(QUEUE_FULL_BACKOFF) => {}
                    }
                }
                Err((err, _)) => return Err(err.into()),
            }
        }
    }

    async fn flush(&self, timeout: Duration) -> Result<(), BrokerError> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))??;
        Ok(())
    }
}

/// Partitions and starting offsets of an assignment
///
/// Only concrete offsets are kept; logical ones (beginning, end, stored)
/// become `None` and are resolved by the resync.
pub fn assigned_partitions(tpl: &TopicPartitionList) -> Vec<PartitionOffset> {
    tpl.elements()
        .iter()
        .map(|e| {
            let offset = match e.offset() {
                Offset::Offset(n) => Some(n),
                _ => None,
            };
            PartitionOffset::new(TopicPartition::new(e.topic(), e.partition()), offset)
        })
        .collect()
}

/// Partitions named in a revocation
pub fn revoked_partitions(tpl: &TopicPartitionList) -> Vec<TopicPartition> {
    tpl.elements()
        .iter()
        .map(|e| TopicPartition::new(e.topic(), e.partition()))
        .collect()
}

/// Forwards rebalance callbacks as broker events
pub struct RebalanceContext {
    events: mpsc::UnboundedSender<BrokerEvent>,
}

impl ClientContext for RebalanceContext {}

impl ConsumerContext for RebalanceContext {
    fn pre_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        if let Rebalance::Revoke(tpl) = rebalance {
            let _ = self
                .events
                .send(BrokerEvent::PartitionsRevoked(revoked_partitions(tpl)));
        }
    }

    fn post_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Assign(tpl) => {
                let _ = self
                    .events
                    .send(BrokerEvent::PartitionsAssigned(assigned_partitions(tpl)));
            }
            Rebalance::Error(err) => {
                let _ = self
                    .events
                    .send(BrokerEvent::Error(BrokerError::Transport(err.to_string())));
            }
            Rebalance::Revoke(_) => {}
        }
    }
}

/// A consumer group member on a Kafka topic
pub struct KafkaConsumer {
    consumer: Arc<StreamConsumer<RebalanceContext>>,
    events: mpsc::UnboundedReceiver<BrokerEvent>,
    topic: String,
    watermark_timeout: Duration,
}

impl KafkaConsumer {
    /// Create the consumer client and subscribe to the topic
    pub fn new(settings: &KafkaSettings, group: &str) -> Result<Self, BrokerError> {
        let (tx, rx) = mpsc::unbounded_channel();

        let consumer: StreamConsumer<RebalanceContext> = ClientConfig::new()
            .set("bootstrap.servers", &settings.brokers)
            .set("group.id", group)
            .set("enable.partition.eof", "true")
            .set("auto.offset.reset", "latest")
            .set("fetch.message.max.bytes", MAX_MESSAGE_BYTES.to_string())
            .create_with_context(RebalanceContext { events: tx })?;

        consumer.subscribe(&[settings.topic.as_str()])?;

        tracing::info!(
            brokers = %settings.brokers,
            topic = %settings.topic,
            group = group,
            "Kafka consumer subscribed"
        );

        Ok(Self {
            consumer: Arc::new(consumer),
            events: rx,
            topic: settings.topic.clone(),
            watermark_timeout: settings.watermark_timeout,
        })
    }
}

fn to_record(msg: &BorrowedMessage<'_>) -> Record {
    Record {
        tp: TopicPartition::new(msg.topic(), msg.partition()),
        offset: msg.offset(),
        payload: Bytes::copy_from_slice(msg.payload().unwrap_or_default()),
        timestamp_ms: msg.timestamp().to_millis(),
    }
}

impl ConsumerTransport for KafkaConsumer {
    async fn next_event(&mut self) -> Option<BrokerEvent> {
        if let Ok(event) = self.events.try_recv() {
            return Some(event);
        }

        let consumer = Arc::clone(&self.consumer);
        let received = tokio::select! {
            biased;
            event = self.events.recv() => return event,
            result = consumer.recv() => result.map(|msg| to_record(&msg)),
        };

        Some(match received {
            Ok(record) => BrokerEvent::Message(record),
            Err(KafkaError::PartitionEOF(partition)) => {
                BrokerEvent::PartitionEof(TopicPartition::new(self.topic.clone(), partition))
            }
            Err(err) => BrokerEvent::Error(err.into()),
        })
    }

    fn assign(&mut self, partitions: &[PartitionOffset]) -> Result<(), BrokerError> {
        let mut tpl = TopicPartitionList::with_capacity(partitions.len());
        for assignment in partitions {
            let offset = assignment.offset.map(Offset::Offset).unwrap_or(Offset::Stored);
            tpl.add_partition_offset(&assignment.tp.topic, assignment.tp.partition, offset)?;
        }
        self.consumer.assign(&tpl)?;
        Ok(())
    }

    fn unassign(&mut self) -> Result<(), BrokerError> {
        self.consumer.unassign()?;
        Ok(())
    }

    async fn watermarks(&self, tp: &TopicPartition) -> Result<Watermarks, BrokerError> {
        let consumer = Arc::clone(&self.consumer);
        let tp = tp.clone();
        let timeout = self.watermark_timeout;

        let (low, high) = tokio::task::spawn_blocking(move || {
            consumer.fetch_watermarks(&tp.topic, tp.partition, timeout)
        })
        .await
        .map_err(|e| BrokerError::Transport(e.to_string()))??;

        Ok(Watermarks { low, high })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_builder() {
        let settings = KafkaSettings::new("kafka:9092", "frames").compression("lz4");
        assert_eq!(settings.brokers, "kafka:9092");
        assert_eq!(settings.topic, "frames");
        assert_eq!(settings.compression, "lz4");
    }

    #[test]
    fn test_assigned_partitions_keep_concrete_offsets() {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset("frames", 0, Offset::Offset(42)).unwrap();
        tpl.add_partition_offset("frames", 1, Offset::Invalid).unwrap();
        tpl.add_partition_offset("frames", 2, Offset::End).unwrap();
        tpl.add_partition_offset("frames", 3, Offset::Stored).unwrap();

        let assigned = assigned_partitions(&tpl);
        let offsets: Vec<(i32, Option<i64>)> = assigned
            .iter()
            .map(|p| (p.tp.partition, p.offset))
            .collect();
        assert_eq!(
            offsets,
            vec![(0, Some(42)), (1, None), (2, None), (3, None)]
        );
        assert!(assigned.iter().all(|p| p.tp.topic == "frames"));
    }

    #[test]
    fn test_revoked_partitions() {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition("frames", 0);
        tpl.add_partition("frames", 3);

        assert_eq!(
            revoked_partitions(&tpl),
            vec![
                TopicPartition::new("frames", 0),
                TopicPartition::new("frames", 3)
            ]
        );
    }

    #[test]
    fn test_empty_rebalance_list() {
        let tpl = TopicPartitionList::new();
        assert!(assigned_partitions(&tpl).is_empty());
        assert!(revoked_partitions(&tpl).is_empty());
    }
}
