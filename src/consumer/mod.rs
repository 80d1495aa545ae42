//! Freshness-seeking frame consumer
//!
//! Joins a consumer group, turns every delivered record back into a frame,
//! re-encodes it as JPEG and pushes it into the [`LiveStream`].
//!
//! Live video is only useful while it is fresh. After every broker event the
//! consumer checks each owned partition's watermarks and, if its read
//! position fell more than `lookback` records behind the high-water mark,
//! jumps forward. Backlog that piles up while decoding is slow is skipped
//! instead of replayed, so `high - position <= lookback` holds after each
//! resync.
//!
//! Records that fail to parse, violate the frame shape invariant or cannot
//! be encoded are dropped. Broker errors are logged and never stop the loop.

pub mod assignment;
pub mod config;

use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::broker::{BrokerEvent, ConsumerTransport, Record, TopicPartition};
use crate::media::{Frame, FrameError, FrameMessage, JpegEncoderConfig};
use crate::stats::ConsumerStats;
use crate::stream::LiveStream;

pub use assignment::{resync_target, Assignment, Reposition};
pub use config::{ConsumerConfig, DEFAULT_LOOKBACK};

/// Why a record did not reach the viewers
#[derive(Debug)]
enum Skip {
    /// Not a frame message
    Malformed(FrameError),
    /// Frame message with an inconsistent shape
    Invalid(FrameError),
    /// JPEG encoding failed
    Encode(FrameError),
}

/// A decoded and re-encoded frame
struct Rendered {
    rows: u32,
    cols: u32,
    jpeg: Bytes,
}

fn render(payload: &[u8], encoder: JpegEncoderConfig) -> Result<Rendered, Skip> {
    let message = FrameMessage::from_slice(payload).map_err(Skip::Malformed)?;
    let frame = Frame::from_message(message).map_err(Skip::Invalid)?;
    let jpeg = encoder.encode(&frame).map_err(Skip::Encode)?;
    Ok(Rendered {
        rows: frame.rows(),
        cols: frame.cols(),
        jpeg,
    })
}

/// Consumes frame messages and feeds the live stream
pub struct FrameConsumer<T: ConsumerTransport> {
    transport: T,
    stream: LiveStream,
    config: ConsumerConfig,
    assignment: Assignment,
    stats: Arc<ConsumerStats>,
}

impl<T: ConsumerTransport> FrameConsumer<T> {
    pub fn new(transport: T, stream: LiveStream, config: ConsumerConfig) -> Self {
        Self {
            transport,
            stream,
            config,
            assignment: Assignment::new(),
            stats: Arc::new(ConsumerStats::new()),
        }
    }

    /// Shared handle to the consumer counters
    pub fn stats(&self) -> Arc<ConsumerStats> {
        Arc::clone(&self.stats)
    }

    /// Partitions owned and their read positions
    pub fn assignment(&self) -> &Assignment {
        &self.assignment
    }

    /// The underlying broker transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Consume until `cancel` fires or the transport closes
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(lookback = self.config.lookback, "Frame consumer started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                open = self.poll_once() => {
                    if !open {
                        tracing::info!("Broker transport closed");
                        break;
                    }
                }
            }
        }

        let snapshot = self.stats.snapshot();
        tracing::info!(
            delivered = snapshot.delivered,
            decoded = snapshot.decoded,
            skipped = snapshot.skipped(),
            skipped_by_resync = snapshot.skipped_by_resync,
            "Frame consumer stopped"
        );
    }

    /// Handle one broker event, then resync
    ///
    /// Returns `false` once the transport is closed.
    pub async fn poll_once(&mut self) -> bool {
        match self.transport.next_event().await {
            Some(event) => {
                self.handle_event(event).await;
                self.resync().await;
                true
            }
            None => false,
        }
    }

    /// Dispatch a broker event
    pub async fn handle_event(&mut self, event: BrokerEvent) {
        match event {
            BrokerEvent::PartitionsAssigned(partitions) => {
                for p in &partitions {
                    tracing::info!(partition = %p.tp, offset = ?p.offset, "Partition assigned");
                }
                if let Err(e) = self.transport.assign(&partitions) {
                    tracing::warn!(error = %e, "Failed to apply partition assignment");
                }
                self.assignment.assign(&partitions);
            }
            BrokerEvent::PartitionsRevoked(partitions) => {
                for tp in &partitions {
                    tracing::info!(partition = %tp, "Partition revoked");
                }
                if let Err(e) = self.transport.unassign() {
                    tracing::warn!(error = %e, "Failed to release partitions");
                }
                self.assignment.revoke();
            }
            BrokerEvent::PartitionEof(tp) => {
                tracing::trace!(partition = %tp, "Reached end of partition");
            }
            BrokerEvent::Error(e) => {
                self.stats.record_broker_error();
                tracing::warn!(error = %e, "Broker error");
            }
            BrokerEvent::Message(record) => self.handle_record(record).await,
        }
    }

    async fn handle_record(&mut self, record: Record) {
        let Record {
            tp,
            offset,
            payload,
            ..
        } = record;

        if !self.assignment.owns(&tp) {
            tracing::trace!(partition = %tp, offset, "Record from a partition not owned");
            return;
        }
        self.assignment.delivered(&tp, offset);
        self.stats.record_delivered();

        let encoder = self.config.jpeg;
        let rendered = match tokio::task::spawn_blocking(move || render(&payload, encoder)).await
        {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(partition = %tp, offset, error = %e, "Frame decode task failed");
                return;
            }
        };

        match rendered {
            Ok(frame) => {
                let sequence = self.stream.update(frame.jpeg);
                self.stats.record_decoded();
                tracing::debug!(
                    partition = %tp,
                    offset,
                    rows = frame.rows,
                    cols = frame.cols,
                    sequence,
                    "Frame delivered"
                );
            }
            Err(Skip::Malformed(e)) => {
                self.stats.record_malformed();
                tracing::debug!(partition = %tp, offset, error = %e, "Skipping malformed message");
            }
            Err(Skip::Invalid(e)) => {
                self.stats.record_invalid();
                tracing::debug!(partition = %tp, offset, error = %e, "Skipping invalid frame");
            }
            Err(Skip::Encode(e)) => {
                self.stats.record_encode_failure();
                tracing::warn!(partition = %tp, offset, error = %e, "Failed to encode frame");
            }
        }
    }

    /// Move every owned partition to within `lookback` of its high-water mark
    ///
    /// Positions only move forward. The transport is reassigned only when at
    /// least one partition moved.
    pub async fn resync(&mut self) {
        if self.assignment.is_empty() {
            return;
        }

        let partitions: Vec<TopicPartition> = self.assignment.partitions().cloned().collect();
        let mut moves = Vec::new();

        for tp in &partitions {
            match self.transport.watermarks(tp).await {
                Ok(watermarks) => {
                    if let Some(reposition) =
                        self.assignment.plan(tp, watermarks, self.config.lookback)
                    {
                        moves.push(reposition);
                    }
                }
                Err(e) => {
                    tracing::warn!(partition = %tp, error = %e, "Watermark query failed");
                }
            }
        }

        if moves.is_empty() {
            return;
        }

        for reposition in &moves {
            self.assignment.apply(reposition);
            self.stats.record_resync(reposition.skipped());
            tracing::debug!(
                partition = %reposition.tp,
                from = ?reposition.from,
                to = reposition.to,
                skipped = reposition.skipped(),
                "Partition resynced"
            );
        }

        if let Err(e) = self
            .transport
            .assign(&self.assignment.to_partition_offsets())
        {
            tracing::warn!(error = %e, "Failed to reassign partitions after resync");
        }
    }
}
