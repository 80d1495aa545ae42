//! Frame producer loop
//!
//! Reads frames from a capture device at a fixed pace, serializes each one
//! into a [`FrameMessage`] and publishes it.
//!
//! ```text
//!   blocking thread                     async task
//!   ┌──────────────┐  bounded queue   ┌─────────────┐
//!   │ CaptureLoop  │ ───────────────► │  publisher  │ ──► broker
//!   │ read → serialize → sleep        │  (in order) │
//!   └──────────────┘                  └─────────────┘
//! ```
//!
//! Capture reads block, so they run on a dedicated thread. A single
//! publisher task drains the queue, which keeps publish order equal to
//! capture order. Failed reads never stop the loop; they back off
//! exponentially until the device delivers again.

pub mod config;

use std::sync::Arc;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::broker::{now_ms, FramePublisher};
use crate::capture::CaptureDevice;
use crate::error::Result;
use crate::media::FrameMessage;
use crate::stats::ProducerStats;

pub use config::{OverflowPolicy, ProducerConfig};

/// A serialized frame waiting to be published
#[derive(Debug)]
struct Outgoing {
    payload: Bytes,
    timestamp_ms: i64,
}

/// Captures frames and publishes them to the broker
///
/// # Example
/// ```no_run
/// use frame_relay::broker::LoopbackBroker;
/// use frame_relay::capture::TestPattern;
/// use frame_relay::producer::{FrameProducer, ProducerConfig};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> frame_relay::error::Result<()> {
/// let broker = LoopbackBroker::new();
/// broker.create_topic("frames", 1);
///
/// let producer = FrameProducer::new(broker.producer("frames")?, ProducerConfig::default());
/// producer.run(TestPattern::new(640, 480), CancellationToken::new()).await?;
/// # Ok(())
/// # }
/// ```
pub struct FrameProducer<P: FramePublisher> {
    publisher: P,
    config: ProducerConfig,
    stats: Arc<ProducerStats>,
}

impl<P: FramePublisher> FrameProducer<P> {
    /// Create a producer publishing through `publisher`
    pub fn new(publisher: P, config: ProducerConfig) -> Self {
        Self {
            publisher,
            config,
            stats: Arc::new(ProducerStats::new()),
        }
    }

    /// Shared handle to the producer counters
    pub fn stats(&self) -> Arc<ProducerStats> {
        Arc::clone(&self.stats)
    }

    /// Run until `cancel` fires
    ///
    /// Takes ownership of the device; it is dropped (and the camera
    /// released) when the capture loop exits. On cancel the device's
    /// interrupt handle fires and queued frames get
    /// [`ProducerConfig::shutdown_grace`] to drain. Outstanding deliveries
    /// are flushed before returning. A capture thread still stuck in a read
    /// after the grace period is detached rather than awaited.
    pub async fn run<D: CaptureDevice>(&self, device: D, cancel: CancellationToken) -> Result<()> {
        self.config.validate()?;

        let grace = self.config.shutdown_grace;
        let (tx, rx) = mpsc::channel(self.config.queue_capacity);
        let interrupt = device.interrupter();
        let capture = CaptureLoop {
            device,
            queue: tx,
            config: self.config.clone(),
            stats: Arc::clone(&self.stats),
            cancel: cancel.clone(),
            runtime: Handle::current(),
        };

        tracing::info!(
            interval = ?self.config.interval,
            overflow = %self.config.overflow,
            queue = self.config.queue_capacity,
            "Frame producer started"
        );

        let mut capture_task = tokio::task::spawn_blocking(move || capture.run());

        // Ends once the capture loop drops its sender and the queue is drained
        let mut publish = Box::pin(self.publish_loop(rx));
        let drained = tokio::select! {
            _ = &mut publish => true,
            _ = cancel.cancelled() => {
                if let Some(interrupt) = &interrupt {
                    interrupt();
                }
                tokio::time::timeout(grace, &mut publish).await.is_ok()
            }
        };
        if !drained {
            tracing::warn!(?grace, "Publish queue did not drain, abandoning queued frames");
        }
        // Closes the queue, which releases a capture thread blocked on a full queue
        drop(publish);

        if let Err(e) = self.publisher.flush(self.config.flush_timeout).await {
            tracing::warn!(error = %e, "Flush on shutdown failed");
        }

        let capture_result = match tokio::time::timeout(grace, &mut capture_task).await {
            Ok(result) => Some(result),
            Err(_) => {
                tracing::warn!(?grace, "Capture read still blocked, detaching capture thread");
                None
            }
        };

        let snapshot = self.stats.snapshot();
        tracing::info!(
            captured = snapshot.captured,
            published = snapshot.published,
            dropped = snapshot.dropped,
            capture_failures = snapshot.capture_failures,
            "Frame producer stopped"
        );

        if let Some(result) = capture_result {
            result?;
        }
        Ok(())
    }

    async fn publish_loop(&self, mut rx: mpsc::Receiver<Outgoing>) {
        while let Some(outgoing) = rx.recv().await {
            let len = outgoing.payload.len();
            match self
                .publisher
                .publish(outgoing.payload, outgoing.timestamp_ms)
                .await
            {
                Ok(()) => {
                    self.stats.record_published(len);
                    tracing::trace!(bytes = len, "Frame published");
                }
                Err(e) => {
                    self.stats.record_publish_failure();
                    tracing::warn!(error = %e, "Failed to publish frame");
                }
            }
        }
    }
}

/// The blocking half of the producer
struct CaptureLoop<D> {
    device: D,
    queue: mpsc::Sender<Outgoing>,
    config: ProducerConfig,
    stats: Arc<ProducerStats>,
    cancel: CancellationToken,
    runtime: Handle,
}

impl<D: CaptureDevice> CaptureLoop<D> {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBuilder::default()
            .with_min_delay(self.config.retry_min_delay)
            .with_max_delay(self.config.retry_max_delay)
            .without_max_times()
            .build()
    }

    fn run(mut self) {
        let mut backoff = self.backoff();
        let mut failures: u64 = 0;

        while !self.cancel.is_cancelled() {
            let frame = match self.device.read_frame() {
                Ok(Some(frame)) => frame,
                result => {
                    self.stats.record_capture_failure();
                    failures += 1;
                    match result {
                        Err(e) if failures == 1 => {
                            tracing::warn!(error = %e, "Capture read failed, retrying");
                        }
                        Err(e) => tracing::debug!(error = %e, failures, "Capture read failed"),
                        _ => tracing::debug!(failures, "Capture returned no frame"),
                    }

                    let delay = backoff.next().unwrap_or(self.config.retry_max_delay);
                    if self.sleep(delay) {
                        break;
                    }
                    continue;
                }
            };

            if failures > 0 {
                tracing::info!(failures, "Capture recovered");
                failures = 0;
                backoff = self.backoff();
            }

            self.stats.record_captured();
            tracing::debug!(rows = frame.rows(), cols = frame.cols(), "Frame captured");

            match FrameMessage::from_frame(&frame).to_bytes() {
                Ok(payload) => {
                    let outgoing = Outgoing {
                        payload,
                        timestamp_ms: now_ms(),
                    };
                    if !self.enqueue(outgoing) {
                        break;
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Failed to serialize frame"),
            }

            if self.sleep(self.config.interval) {
                break;
            }
        }

        tracing::info!("Capture loop stopped, releasing device");
    }

    /// Hand a frame to the publisher. Returns `false` once the publisher is gone.
    fn enqueue(&self, outgoing: Outgoing) -> bool {
        match self.config.overflow {
            OverflowPolicy::Block => self.queue.blocking_send(outgoing).is_ok(),
            OverflowPolicy::Drop => match self.queue.try_send(outgoing) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.stats.record_dropped();
                    tracing::warn!("Publish queue full, frame dropped");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            },
        }
    }

    /// Sleep for `delay`. Returns `true` if cancelled meanwhile.
    fn sleep(&self, delay: Duration) -> bool {
        if delay.is_zero() {
            return self.cancel.is_cancelled();
        }
        let cancel = &self.cancel;
        self.runtime.block_on(async {
            tokio::select! {
                _ = cancel.cancelled() => true,
                _ = tokio::time::sleep(delay) => false,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};

    use parking_lot::Mutex;

    use crate::broker::BrokerError;
    use crate::capture::{CaptureError, Interrupt};
    use crate::media::{Frame, PixelType};

    enum Step {
        Frame(u8),
        Empty,
        Fail,
    }

    /// Plays back a script of reads, then cancels the run
    struct ScriptedDevice {
        steps: VecDeque<Step>,
        cancel: CancellationToken,
        released: Arc<AtomicBool>,
    }

    impl CaptureDevice for ScriptedDevice {
        fn read_frame(&mut self) -> std::result::Result<Option<Frame>, CaptureError> {
            match self.steps.pop_front() {
                Some(Step::Frame(value)) => Ok(Some(
                    Frame::new(1, 2, PixelType::GRAY8, vec![value, value]).unwrap(),
                )),
                Some(Step::Empty) => Ok(None),
                Some(Step::Fail) => Err(CaptureError::Backend("device glitch".into())),
                None => {
                    self.cancel.cancel();
                    Ok(None)
                }
            }
        }
    }

    impl Drop for ScriptedDevice {
        fn drop(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    /// Blocks in every read until interrupted or `stall` elapses
    struct StalledDevice {
        stall: Duration,
        wake: std::sync::mpsc::Receiver<()>,
        waker: Option<std::sync::mpsc::Sender<()>>,
        released: Arc<AtomicBool>,
    }

    impl StalledDevice {
        fn new(stall: Duration, interruptible: bool) -> (Self, Arc<AtomicBool>) {
            let (tx, rx) = std::sync::mpsc::channel();
            let released = Arc::new(AtomicBool::new(false));
            let device = StalledDevice {
                stall,
                wake: rx,
                waker: interruptible.then_some(tx),
                released: Arc::clone(&released),
            };
            (device, released)
        }
    }

    impl CaptureDevice for StalledDevice {
        fn read_frame(&mut self) -> std::result::Result<Option<Frame>, CaptureError> {
            match self.wake.recv_timeout(self.stall) {
                Ok(()) => Err(CaptureError::Backend("read interrupted".into())),
                Err(_) => Ok(None),
            }
        }

        fn interrupter(&self) -> Option<Interrupt> {
            let waker = Mutex::new(self.waker.clone()?);
            Some(Box::new(move || {
                let _ = waker.lock().send(());
            }))
        }
    }

    impl Drop for StalledDevice {
        fn drop(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<Bytes>>,
        flushed: AtomicBool,
        delay: Duration,
    }

    impl FramePublisher for Arc<RecordingPublisher> {
        async fn publish(
            &self,
            payload: Bytes,
            _timestamp_ms: i64,
        ) -> std::result::Result<(), BrokerError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.published.lock().push(payload);
            Ok(())
        }

        async fn flush(&self, _timeout: Duration) -> std::result::Result<(), BrokerError> {
            self.flushed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn scripted(steps: Vec<Step>, cancel: &CancellationToken) -> (ScriptedDevice, Arc<AtomicBool>) {
        let released = Arc::new(AtomicBool::new(false));
        let device = ScriptedDevice {
            steps: steps.into(),
            cancel: cancel.clone(),
            released: Arc::clone(&released),
        };
        (device, released)
    }

    fn fast_config() -> ProducerConfig {
        ProducerConfig::with_interval(Duration::ZERO)
            .retry_delays(Duration::from_millis(1), Duration::from_millis(2))
    }

    fn first_pixel(payload: &Bytes) -> u8 {
        Frame::decode(payload).unwrap().data()[0]
    }

    #[tokio::test]
    async fn test_publish_order_matches_capture_order() {
        let cancel = CancellationToken::new();
        let steps = (1..=6).map(Step::Frame).collect();
        let (device, released) = scripted(steps, &cancel);

        let publisher = Arc::new(RecordingPublisher::default());
        let producer = FrameProducer::new(Arc::clone(&publisher), fast_config());
        producer.run(device, cancel).await.unwrap();

        let order: Vec<u8> = publisher.published.lock().iter().map(first_pixel).collect();
        assert_eq!(order, vec![1, 2, 3, 4, 5, 6]);
        assert!(released.load(Ordering::SeqCst));
        assert!(publisher.flushed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failed_reads_are_skipped() {
        let cancel = CancellationToken::new();
        let steps = vec![
            Step::Fail,
            Step::Frame(7),
            Step::Empty,
            Step::Fail,
            Step::Fail,
            Step::Frame(8),
        ];
        let (device, _) = scripted(steps, &cancel);

        let publisher = Arc::new(RecordingPublisher::default());
        let producer = FrameProducer::new(Arc::clone(&publisher), fast_config());
        let stats = producer.stats();
        producer.run(device, cancel).await.unwrap();

        let order: Vec<u8> = publisher.published.lock().iter().map(first_pixel).collect();
        assert_eq!(order, vec![7, 8]);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.captured, 2);
        assert_eq!(snapshot.published, 2);
        // 4 scripted failures plus the final empty read that ends the script
        assert_eq!(snapshot.capture_failures, 5);
    }

    #[tokio::test]
    async fn test_drop_policy_discards_when_queue_full() {
        let cancel = CancellationToken::new();
        let steps = (0..20).map(Step::Frame).collect();
        let (device, _) = scripted(steps, &cancel);

        let publisher = Arc::new(RecordingPublisher {
            delay: Duration::from_millis(20),
            ..Default::default()
        });
        let config = fast_config()
            .overflow(OverflowPolicy::Drop)
            .queue_capacity(1);
        let producer = FrameProducer::new(Arc::clone(&publisher), config);
        let stats = producer.stats();
        producer.run(device, cancel).await.unwrap();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.captured, 20);
        assert!(snapshot.dropped > 0);
        assert_eq!(snapshot.published + snapshot.dropped, 20);

        // Whatever got through is still in capture order
        let order: Vec<u8> = publisher.published.lock().iter().map(first_pixel).collect();
        assert!(order.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_cancel_stops_idle_producer() {
        let cancel = CancellationToken::new();
        // A device that never delivers keeps the loop in backoff
        let (device, released) = scripted(
            std::iter::repeat_with(|| Step::Empty).take(10_000).collect(),
            &cancel,
        );

        let publisher = Arc::new(RecordingPublisher::default());
        let producer = FrameProducer::new(
            Arc::clone(&publisher),
            ProducerConfig::default()
                .retry_delays(Duration::from_millis(50), Duration::from_millis(50)),
        );

        let stop = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            stop.cancel();
        });

        tokio::time::timeout(Duration::from_secs(2), producer.run(device, cancel))
            .await
            .expect("producer did not stop")
            .unwrap();

        assert!(publisher.published.lock().is_empty());
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_blocked_read() {
        let cancel = CancellationToken::new();
        let (device, released) = StalledDevice::new(Duration::from_secs(30), true);

        let publisher = Arc::new(RecordingPublisher::default());
        let producer = FrameProducer::new(Arc::clone(&publisher), fast_config());

        let stop = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stop.cancel();
        });

        tokio::time::timeout(Duration::from_secs(2), producer.run(device, cancel))
            .await
            .expect("producer did not stop")
            .unwrap();

        assert!(released.load(Ordering::SeqCst));
        assert!(publisher.flushed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancel_abandons_unresponsive_read() {
        let cancel = CancellationToken::new();
        // No interrupt handle: the read only returns after a full second
        let (device, released) = StalledDevice::new(Duration::from_secs(1), false);

        let publisher = Arc::new(RecordingPublisher::default());
        let producer = FrameProducer::new(
            Arc::clone(&publisher),
            fast_config().shutdown_grace(Duration::from_millis(100)),
        );

        let stop = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stop.cancel();
        });

        tokio::time::timeout(Duration::from_millis(800), producer.run(device, cancel))
            .await
            .expect("producer waited for the stalled read")
            .unwrap();

        // The detached thread still owns the device
        assert!(!released.load(Ordering::SeqCst));
        assert!(publisher.flushed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let cancel = CancellationToken::new();
        let (device, _) = scripted(vec![], &cancel);
        let producer = FrameProducer::new(
            Arc::new(RecordingPublisher::default()),
            ProducerConfig::default().queue_capacity(0),
        );

        assert!(producer.run(device, cancel).await.is_err());
    }
}
