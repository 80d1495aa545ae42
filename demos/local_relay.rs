//! Local relay demo
//!
//! Run with: cargo run --example local_relay
//!
//! Streams a synthetic test pattern through the in-process broker and serves
//! it on http://127.0.0.1:8080/. Open the URL in a browser; stop with Ctrl-C.

use std::net::SocketAddr;
use std::time::Duration;

use frame_relay::broker::LoopbackBroker;
use frame_relay::capture::TestPattern;
use frame_relay::consumer::{ConsumerConfig, FrameConsumer};
use frame_relay::producer::{FrameProducer, OverflowPolicy, ProducerConfig};
use frame_relay::server::{ServerConfig, StreamServer};
use frame_relay::stream::LiveStream;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> frame_relay::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("frame_relay=debug,local_relay=info")
        .init();

    let broker = LoopbackBroker::new();
    broker.create_topic("frames", 2);
    let cancel = CancellationToken::new();

    let producer = FrameProducer::new(
        broker.producer("frames")?,
        ProducerConfig::with_interval(Duration::from_millis(40)).overflow(OverflowPolicy::Drop),
    );
    let producer_stats = producer.stats();
    let producer_cancel = cancel.clone();
    let producer_task = tokio::spawn(async move {
        producer
            .run(TestPattern::new(320, 240), producer_cancel)
            .await
    });

    let stream = LiveStream::new();
    let consumer = FrameConsumer::new(
        broker.consumer("viewers", &["frames"])?,
        stream.clone(),
        ConsumerConfig::default().jpeg_quality(70),
    );
    let consumer_stats = consumer.stats();
    let consumer_task = tokio::spawn(consumer.run(cancel.clone()));

    // Print progress every few seconds
    let report_cancel = cancel.clone();
    let viewers = stream.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(5));
        loop {
            tokio::select! {
                _ = report_cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let produced = producer_stats.snapshot();
                    let consumed = consumer_stats.snapshot();
                    tracing::info!(
                        published = produced.published,
                        fps = produced.publish_rate(),
                        decoded = consumed.decoded,
                        skipped_by_resync = consumed.skipped_by_resync,
                        viewers = viewers.viewer_count(),
                        "Relay progress"
                    );
                }
            }
        }
    });

    let signal = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        signal.cancel();
    });

    let addr = SocketAddr::from(([127, 0, 0, 1], 8080));
    let server = StreamServer::new(ServerConfig::with_addr(addr), stream);
    tracing::info!("Open http://{addr}/ in a browser");

    let shutdown = cancel.clone();
    server
        .run_until(async move { shutdown.cancelled().await })
        .await?;

    producer_task.await??;
    consumer_task.await?;
    Ok(())
}
