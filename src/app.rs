//! Command runners
//!
//! Wires capture, broker, consumer and server together for each CLI
//! command. Setup failures are returned; once running, each command stops
//! when `cancel` fires.

use tokio_util::sync::CancellationToken;

use crate::broker::{ConsumerTransport, LoopbackBroker};
use crate::capture::{self, CaptureDevice, CaptureOptions, SourceLocation};
use crate::cli::{Cli, Command, ConsumeArgs, ProduceArgs, RelayArgs};
use crate::consumer::FrameConsumer;
use crate::error::{Error, Result};
use crate::producer::FrameProducer;
use crate::server::StreamServer;
use crate::stream::LiveStream;

/// Topic used by the in-process relay
pub const RELAY_TOPIC: &str = "frames";

/// Consumer group used by the in-process relay
pub const RELAY_GROUP: &str = "relay";

/// Run the selected command
pub async fn run(cli: Cli, cancel: CancellationToken) -> Result<()> {
    match cli.command {
        Command::Produce(args) => produce(args, cancel).await,
        Command::Consume(args) => consume(args, cancel).await,
        Command::Relay(args) => relay(args, cancel).await,
    }
}

/// Open a capture device off the async runtime
async fn open_device(
    location: SourceLocation,
    options: CaptureOptions,
) -> Result<Box<dyn CaptureDevice>> {
    let device = tokio::task::spawn_blocking(move || capture::open(&location, &options)).await??;
    Ok(device)
}

#[cfg(feature = "kafka")]
async fn produce(args: ProduceArgs, cancel: CancellationToken) -> Result<()> {
    use crate::broker::kafka::{KafkaPublisher, KafkaSettings};

    let settings = KafkaSettings::new(&args.broker.broker, &args.broker.topic)
        .compression(&args.broker.compression);
    let publisher = KafkaPublisher::new(&settings)?.with_cancel(cancel.clone());
    let device = open_device(args.capture.source.clone(), args.capture.capture_options()).await?;

    FrameProducer::new(publisher, args.capture.producer_config())
        .run(device, cancel)
        .await
}

#[cfg(not(feature = "kafka"))]
async fn produce(_args: ProduceArgs, _cancel: CancellationToken) -> Result<()> {
    Err(Error::config(
        "the produce command needs the `kafka` feature; use `relay` to run in one process",
    ))
}

#[cfg(feature = "kafka")]
async fn consume(args: ConsumeArgs, cancel: CancellationToken) -> Result<()> {
    use crate::broker::kafka::{KafkaConsumer, KafkaSettings};

    let settings = KafkaSettings::new(&args.broker.broker, &args.broker.topic);
    let transport = KafkaConsumer::new(&settings, &args.group)?;

    let stream = LiveStream::new();
    let consumer = FrameConsumer::new(transport, stream.clone(), args.viewer.consumer_config());
    let server = StreamServer::new(args.viewer.server_config(args.frame_interval), stream);

    serve(consumer, server, args.viewer.public_url.as_deref(), cancel).await
}

#[cfg(not(feature = "kafka"))]
async fn consume(_args: ConsumeArgs, _cancel: CancellationToken) -> Result<()> {
    Err(Error::config(
        "the consume command needs the `kafka` feature; use `relay` to run in one process",
    ))
}

async fn relay(args: RelayArgs, cancel: CancellationToken) -> Result<()> {
    if args.partitions < 1 {
        return Err(Error::config("relay needs at least one partition"));
    }

    let broker = LoopbackBroker::new();
    broker.create_topic(RELAY_TOPIC, args.partitions);
    let publisher = broker.producer(RELAY_TOPIC)?;
    let transport = broker.consumer(RELAY_GROUP, &[RELAY_TOPIC])?;

    let device = open_device(args.capture.source.clone(), args.capture.capture_options()).await?;
    let producer = FrameProducer::new(publisher, args.capture.producer_config());

    let producer_cancel = cancel.clone();
    let producer_task = tokio::spawn(async move {
        let result = producer.run(device, producer_cancel.clone()).await;
        if result.is_err() {
            producer_cancel.cancel();
        }
        result
    });

    let stream = LiveStream::new();
    let consumer = FrameConsumer::new(transport, stream.clone(), args.viewer.consumer_config());
    let server = StreamServer::new(args.viewer.server_config(None), stream);

    let served = serve(consumer, server, args.viewer.public_url.as_deref(), cancel.clone()).await;
    cancel.cancel();

    producer_task.await??;
    served
}

/// Run the consumer and the HTTP server until cancelled
async fn serve<T: ConsumerTransport>(
    consumer: FrameConsumer<T>,
    server: StreamServer,
    public_url: Option<&str>,
    cancel: CancellationToken,
) -> Result<()> {
    if let Some(url) = public_url {
        tracing::info!(url = url, "Stream available");
    }

    let consumer_task = tokio::spawn(consumer.run(cancel.clone()));

    let shutdown = cancel.clone();
    let result = server
        .run_until(async move { shutdown.cancelled().await })
        .await;

    // Stop the consumer if the server failed on its own
    cancel.cancel();
    consumer_task.await?;

    result
}
