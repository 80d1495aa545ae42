//! Runtime statistics

pub mod metrics;

pub use metrics::{ConsumerSnapshot, ConsumerStats, ProducerSnapshot, ProducerStats};
