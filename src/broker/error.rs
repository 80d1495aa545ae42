//! Broker error types

use super::TopicPartition;

/// Error type for broker transport operations
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Topic does not exist
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    /// Partition does not exist
    #[error("unknown partition: {0}")]
    UnknownPartition(TopicPartition),

    /// Transport has been shut down
    #[error("broker transport closed")]
    Closed,

    /// Error reported by the broker client
    #[error("broker transport error: {0}")]
    Transport(String),

    /// Error from librdkafka
    #[cfg(feature = "kafka")]
    #[error("kafka: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
}
