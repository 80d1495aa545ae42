//! Producer configuration

use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// What the capture loop does when the publish queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Wait for room, slowing capture down to the broker's pace
    #[default]
    Block,
    /// Discard the new frame and keep capturing
    Drop,
}

impl FromStr for OverflowPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "block" => Ok(OverflowPolicy::Block),
            "drop" => Ok(OverflowPolicy::Drop),
            other => Err(Error::config(format!(
                "unknown overflow policy {other:?} (expected \"block\" or \"drop\")"
            ))),
        }
    }
}

impl std::fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverflowPolicy::Block => f.write_str("block"),
            OverflowPolicy::Drop => f.write_str("drop"),
        }
    }
}

/// Frame producer configuration
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Pause after each captured frame
    pub interval: Duration,

    /// Behavior when the publish queue is full
    pub overflow: OverflowPolicy,

    /// Frames buffered between capture and publish
    pub queue_capacity: usize,

    /// First delay after a failed capture read
    pub retry_min_delay: Duration,

    /// Upper bound for the capture retry delay
    pub retry_max_delay: Duration,

    /// How long to wait for outstanding deliveries on shutdown
    pub flush_timeout: Duration,

    /// How long shutdown waits for the capture thread and the publish queue
    /// before giving up on them
    pub shutdown_grace: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            overflow: OverflowPolicy::default(),
            queue_capacity: 8,
            retry_min_delay: Duration::from_millis(50),
            retry_max_delay: Duration::from_secs(2),
            flush_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

impl ProducerConfig {
    /// Create a config with a custom frame interval
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    /// Set the frame interval
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the overflow policy
    pub fn overflow(mut self, policy: OverflowPolicy) -> Self {
        self.overflow = policy;
        self
    }

    /// Set the publish queue capacity
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the capture retry delay bounds
    pub fn retry_delays(mut self, min: Duration, max: Duration) -> Self {
        self.retry_min_delay = min;
        self.retry_max_delay = max;
        self
    }

    /// Set the shutdown flush timeout
    pub fn flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }

    /// Set how long shutdown waits for capture and publish to wind down
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Check the settings before starting
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(Error::config("publish queue capacity must be at least 1"));
        }
        if self.retry_min_delay > self.retry_max_delay {
            return Err(Error::config(format!(
                "retry delay minimum {:?} exceeds maximum {:?}",
                self.retry_min_delay, self.retry_max_delay
            )));
        }
        Ok(())
    }
}
