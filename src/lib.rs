//! Live video frame relay
//!
//! Moves frames from a camera to any number of browser viewers through a
//! partitioned message broker:
//!
//! ```text
//!   capture ──► FrameProducer ──► broker ──► FrameConsumer ──► LiveStream ──► viewers
//!   (ffmpeg,     pace + JSON                  resync to the      single slot     MJPEG over
//!    OpenCV,     frame message                high-water mark,   broadcast       HTTP
//!    pattern)                                 decode + JPEG
//! ```
//!
//! The broker decouples capture cadence from display cadence. Consumers
//! prefer the newest frame: whenever a partition falls more than a few
//! records behind, the consumer jumps ahead instead of replaying the
//! backlog.
//!
//! # Example
//!
//! ```no_run
//! use frame_relay::broker::LoopbackBroker;
//! use frame_relay::capture::TestPattern;
//! use frame_relay::consumer::{ConsumerConfig, FrameConsumer};
//! use frame_relay::producer::{FrameProducer, ProducerConfig};
//! use frame_relay::server::{ServerConfig, StreamServer};
//! use frame_relay::stream::LiveStream;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> frame_relay::error::Result<()> {
//! let broker = LoopbackBroker::new();
//! broker.create_topic("frames", 1);
//! let cancel = CancellationToken::new();
//!
//! let producer = FrameProducer::new(broker.producer("frames")?, ProducerConfig::default());
//! tokio::spawn(producer_run(producer, cancel.clone()));
//!
//! let stream = LiveStream::new();
//! let consumer = FrameConsumer::new(
//!     broker.consumer("viewers", &["frames"])?,
//!     stream.clone(),
//!     ConsumerConfig::default(),
//! );
//! tokio::spawn(consumer.run(cancel.clone()));
//!
//! let server = StreamServer::new(ServerConfig::default(), stream);
//! server.run_until(async move { cancel.cancelled().await }).await?;
//! # Ok(())
//! # }
//! # async fn producer_run(
//! #     producer: FrameProducer<frame_relay::broker::LoopbackProducer>,
//! #     cancel: CancellationToken,
//! # ) {
//! #     let _ = producer.run(TestPattern::new(640, 480), cancel).await;
//! # }
//! ```

pub mod app;
pub mod broker;
pub mod capture;
pub mod cli;
pub mod consumer;
pub mod error;
pub mod media;
pub mod producer;
pub mod server;
pub mod stats;
pub mod stream;

pub use broker::{BrokerEvent, ConsumerTransport, FramePublisher, LoopbackBroker};
pub use consumer::{ConsumerConfig, FrameConsumer};
pub use error::{Error, Result};
pub use media::{Frame, FrameMessage, PixelType};
pub use producer::{FrameProducer, OverflowPolicy, ProducerConfig};
pub use server::{ServerConfig, StreamServer};
pub use stream::{LiveStream, ViewerSession};
