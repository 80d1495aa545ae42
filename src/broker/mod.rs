//! Broker transport seam
//!
//! Frames travel through a partitioned publish/subscribe broker. The broker
//! itself is external; this module defines the two narrow interfaces the
//! pipeline needs from it:
//!
//! - [`FramePublisher`]: hand a serialized frame to the broker client
//! - [`ConsumerTransport`]: receive [`BrokerEvent`]s for a consumer group
//!   member, (re)assign read positions and query partition watermarks
//!
//! # Architecture
//!
//! ```text
//!   FrameProducer ──► FramePublisher ──►  ┌────────────┐
//!                                         │   broker   │  topic/partition logs
//!   FrameConsumer ◄── ConsumerTransport ◄─└────────────┘
//!        │  ▲
//!        │  └── assign() / watermarks()   (freshness resync)
//!        ▼
//!   BrokerEvent::{PartitionsAssigned, PartitionsRevoked,
//!                 PartitionEof, Error, Message}
//! ```
//!
//! Adapters:
//! - [`loopback`]: in-process transport with consumer groups, used by the
//!   single-process relay and by tests
//! - `kafka` (feature `kafka`): librdkafka client

pub mod error;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod loopback;

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;

pub use error::BrokerError;
pub use loopback::{LoopbackBroker, LoopbackConsumer, LoopbackProducer};

/// A topic partition
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    /// Topic name
    pub topic: String,
    /// Partition index
    pub partition: i32,
}

impl TopicPartition {
    /// Create a new topic partition
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl std::fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.topic, self.partition)
    }
}

/// A partition with the offset to read from next
///
/// `offset: None` lets the broker pick (committed offset or its reset policy).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionOffset {
    pub tp: TopicPartition,
    pub offset: Option<i64>,
}

impl PartitionOffset {
    pub fn new(tp: TopicPartition, offset: Option<i64>) -> Self {
        Self { tp, offset }
    }
}

/// Low and high watermark of a partition
///
/// `high` is the offset the next produced message will get.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermarks {
    pub low: i64,
    pub high: i64,
}

/// A record delivered to a consumer
#[derive(Debug, Clone)]
pub struct Record {
    /// Source partition
    pub tp: TopicPartition,
    /// Offset within the partition
    pub offset: i64,
    /// Serialized frame message (zero-copy via reference counting)
    pub payload: Bytes,
    /// Producer timestamp in milliseconds since the epoch
    pub timestamp_ms: Option<i64>,
}

/// Events delivered to a consumer group member
#[derive(Debug)]
pub enum BrokerEvent {
    /// Partitions assigned to this member by a rebalance
    PartitionsAssigned(Vec<PartitionOffset>),
    /// Partitions taken away from this member by a rebalance
    PartitionsRevoked(Vec<TopicPartition>),
    /// Reached the current end of a partition
    PartitionEof(TopicPartition),
    /// Broker-reported error; the client recovers on its own
    Error(BrokerError),
    /// A record
    Message(Record),
}

/// Wall clock in milliseconds since the epoch, as carried in record timestamps
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Producer side of the broker
pub trait FramePublisher: Send + Sync + 'static {
    /// Hand a payload to the broker client for delivery
    fn publish(
        &self,
        payload: Bytes,
        timestamp_ms: i64,
    ) -> impl Future<Output = Result<(), BrokerError>> + Send;

    /// Wait for outstanding deliveries, up to `timeout`
    fn flush(&self, timeout: Duration) -> impl Future<Output = Result<(), BrokerError>> + Send;
}

/// Consumer group member side of the broker
pub trait ConsumerTransport: Send + 'static {
    /// Wait for the next event. Returns `None` once the transport is closed.
    fn next_event(&mut self) -> impl Future<Output = Option<BrokerEvent>> + Send;

    /// Replace the set of partitions being read and their positions
    fn assign(&mut self, partitions: &[PartitionOffset]) -> Result<(), BrokerError>;

    /// Stop reading all partitions
    fn unassign(&mut self) -> Result<(), BrokerError>;

    /// Query the watermarks of a partition
    fn watermarks(
        &self,
        tp: &TopicPartition,
    ) -> impl Future<Output = Result<Watermarks, BrokerError>> + Send;
}
