//! Statistics for the producer and consumer loops
//!
//! Counters are updated from the hot path with relaxed atomics and read as a
//! plain snapshot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Live counters for a frame producer
#[derive(Debug)]
pub struct ProducerStats {
    started_at: Instant,
    captured: AtomicU64,
    capture_failures: AtomicU64,
    dropped: AtomicU64,
    published: AtomicU64,
    publish_failures: AtomicU64,
    bytes_published: AtomicU64,
}

impl Default for ProducerStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ProducerStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            captured: AtomicU64::new(0),
            capture_failures: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            bytes_published: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_captured(&self) {
        self.captured.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_capture_failure(&self) {
        self.capture_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_published(&self, bytes: usize) {
        self.published.fetch_add(1, Ordering::Relaxed);
        self.bytes_published.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a consistent-enough copy of the counters
    pub fn snapshot(&self) -> ProducerSnapshot {
        ProducerSnapshot {
            uptime: self.started_at.elapsed(),
            captured: self.captured.load(Ordering::Relaxed),
            capture_failures: self.capture_failures.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            bytes_published: self.bytes_published.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time producer counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProducerSnapshot {
    /// Time since the producer started
    pub uptime: Duration,
    /// Frames read from the capture device
    pub captured: u64,
    /// Failed or empty capture reads
    pub capture_failures: u64,
    /// Frames dropped because the publish queue was full
    pub dropped: u64,
    /// Frames handed to the broker
    pub published: u64,
    /// Frames the broker refused
    pub publish_failures: u64,
    /// Serialized bytes handed to the broker
    pub bytes_published: u64,
}

impl ProducerSnapshot {
    /// Published frames per second since start
    pub fn publish_rate(&self) -> f64 {
        let secs = self.uptime.as_secs_f64();
        if secs > 0.0 {
            self.published as f64 / secs
        } else {
            0.0
        }
    }
}

/// Live counters for a frame consumer
#[derive(Debug, Default)]
pub struct ConsumerStats {
    delivered: AtomicU64,
    decoded: AtomicU64,
    malformed: AtomicU64,
    invalid: AtomicU64,
    encode_failures: AtomicU64,
    resyncs: AtomicU64,
    skipped_by_resync: AtomicU64,
    broker_errors: AtomicU64,
}

impl ConsumerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decoded(&self) {
        self.decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_invalid(&self) {
        self.invalid.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_encode_failure(&self) {
        self.encode_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one partition repositioning that jumped over `skipped` records
    pub(crate) fn record_resync(&self, skipped: u64) {
        self.resyncs.fetch_add(1, Ordering::Relaxed);
        self.skipped_by_resync.fetch_add(skipped, Ordering::Relaxed);
    }

    pub(crate) fn record_broker_error(&self) {
        self.broker_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ConsumerSnapshot {
        ConsumerSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            decoded: self.decoded.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
            encode_failures: self.encode_failures.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
            skipped_by_resync: self.skipped_by_resync.load(Ordering::Relaxed),
            broker_errors: self.broker_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time consumer counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerSnapshot {
    /// Records delivered by the broker
    pub delivered: u64,
    /// Records decoded and pushed to viewers
    pub decoded: u64,
    /// Records that were not a frame message
    pub malformed: u64,
    /// Frame messages violating the shape invariant
    pub invalid: u64,
    /// Frames that could not be re-encoded
    pub encode_failures: u64,
    /// Partition repositionings toward the high-water mark
    pub resyncs: u64,
    /// Records jumped over by resync
    pub skipped_by_resync: u64,
    /// Broker errors observed
    pub broker_errors: u64,
}

impl ConsumerSnapshot {
    /// Records that never reached a viewer
    pub fn skipped(&self) -> u64 {
        self.malformed + self.invalid + self.encode_failures
    }
}
