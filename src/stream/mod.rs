//! Live stream multiplexer
//!
//! A [`LiveStream`] holds a single slot with the most recent JPEG. Every
//! update replaces the slot and wakes all attached viewers; there is no
//! history. A viewer that is slower than the update rate skips the frames
//! it missed and always gets the newest one.
//!
//! ```text
//!   FrameConsumer ── update(jpeg) ──► [ slot ] ──┬──► ViewerSession ──► HTTP
//!                                                ├──► ViewerSession ──► HTTP
//!                                                └──► ViewerSession ──► HTTP
//! ```

pub mod mjpeg;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// One encoded frame in the slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveFrame {
    /// Update counter, starting at 1
    pub sequence: u64,
    /// JPEG image
    pub jpeg: Bytes,
}

struct Inner {
    slot: watch::Sender<Option<LiveFrame>>,
    viewers: AtomicUsize,
    next_viewer_id: AtomicU64,
    shutdown: CancellationToken,
}

/// Single-slot broadcast of the freshest frame
#[derive(Clone)]
pub struct LiveStream {
    inner: Arc<Inner>,
}

impl Default for LiveStream {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveStream {
    /// Create an empty stream
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                slot,
                viewers: AtomicUsize::new(0),
                next_viewer_id: AtomicU64::new(1),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Replace the slot and wake every viewer
    ///
    /// Never blocks on viewers. Returns the sequence number of the new frame.
    pub fn update(&self, jpeg: Bytes) -> u64 {
        let mut sequence = 0;
        self.inner.slot.send_modify(|slot| {
            sequence = slot.as_ref().map_or(1, |frame| frame.sequence + 1);
            *slot = Some(LiveFrame { sequence, jpeg });
        });
        tracing::trace!(sequence, viewers = self.viewer_count(), "Live frame updated");
        sequence
    }

    /// Current slot value
    pub fn latest(&self) -> Option<LiveFrame> {
        self.inner.slot.borrow().clone()
    }

    /// Register a viewer
    ///
    /// The session yields frames published after this call.
    pub fn attach(&self) -> ViewerSession {
        let id = self.inner.next_viewer_id.fetch_add(1, Ordering::Relaxed);
        let viewers = self.inner.viewers.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(viewer_id = id, viewers, "Viewer attached");

        ViewerSession {
            id,
            rx: self.inner.slot.subscribe(),
            stream: self.clone(),
            interval: None,
            last_sent: None,
        }
    }

    /// Unregister a viewer
    ///
    /// Same as dropping the session.
    pub fn detach(&self, session: ViewerSession) {
        drop(session);
    }

    /// Number of attached viewers
    pub fn viewer_count(&self) -> usize {
        self.inner.viewers.load(Ordering::Relaxed)
    }

    /// End every viewer session
    pub fn close(&self) {
        self.inner.shutdown.cancel();
    }

    /// Whether [`close`](Self::close) was called
    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}

/// One attached viewer
pub struct ViewerSession {
    id: u64,
    rx: watch::Receiver<Option<LiveFrame>>,
    stream: LiveStream,
    interval: Option<Duration>,
    last_sent: Option<Instant>,
}

impl ViewerSession {
    /// Viewer id, unique per stream
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Send at most one frame per `interval`
    pub fn with_interval(mut self, interval: Option<Duration>) -> Self {
        self.interval = interval.filter(|d| !d.is_zero());
        self
    }

    /// Wait for the next frame
    ///
    /// Returns `None` once the stream is closed.
    pub async fn next_frame(&mut self) -> Option<LiveFrame> {
        let shutdown = self.stream.inner.shutdown.clone();

        if let (Some(interval), Some(last)) = (self.interval, self.last_sent) {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return None,
                _ = tokio::time::sleep_until(last + interval) => {}
            }
        }

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return None,
                changed = self.rx.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }

            let frame = self.rx.borrow_and_update().clone();
            if let Some(frame) = frame {
                self.last_sent = Some(Instant::now());
                return Some(frame);
            }
        }
    }
}

impl Drop for ViewerSession {
    fn drop(&mut self) {
        let remaining = self.stream.inner.viewers.fetch_sub(1, Ordering::Relaxed) - 1;
        tracing::debug!(viewer_id = self.id, viewers = remaining, "Viewer detached");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    fn jpeg(tag: &'static [u8]) -> Bytes {
        Bytes::from_static(tag)
    }

    #[test]
    fn test_update_increments_sequence() {
        let stream = LiveStream::new();
        assert!(stream.latest().is_none());

        assert_eq!(stream.update(jpeg(b"a")), 1);
        assert_eq!(stream.update(jpeg(b"b")), 2);

        let latest = stream.latest().unwrap();
        assert_eq!(latest.sequence, 2);
        assert_eq!(latest.jpeg, jpeg(b"b"));
    }

    #[test]
    fn test_viewer_waits_for_next_update() {
        let stream = LiveStream::new();
        stream.update(jpeg(b"before"));

        let mut viewer = stream.attach();
        let mut next = task::spawn(viewer.next_frame());
        assert_pending!(next.poll());

        stream.update(jpeg(b"after"));
        assert!(next.is_woken());
        assert_ready_eq!(
            next.poll(),
            Some(LiveFrame {
                sequence: 2,
                jpeg: jpeg(b"after")
            })
        );
    }

    #[tokio::test]
    async fn test_every_viewer_sees_each_update() {
        let stream = LiveStream::new();
        let mut viewers: Vec<_> = (0..3).map(|_| stream.attach()).collect();
        assert_eq!(stream.viewer_count(), 3);

        let tags: [&'static [u8]; 3] = [b"one", b"two", b"three"];
        for (i, tag) in tags.into_iter().enumerate() {
            stream.update(Bytes::from_static(tag));
            for viewer in &mut viewers {
                let frame = viewer.next_frame().await.unwrap();
                assert_eq!(frame.sequence, i as u64 + 1);
                assert_eq!(frame.jpeg.as_ref(), tag);
            }
        }
    }

    #[tokio::test]
    async fn test_slow_viewer_gets_latest_only() {
        let stream = LiveStream::new();
        let mut fast = stream.attach();
        let mut slow = stream.attach();

        let mut fast_seen = Vec::new();
        for i in 1..=5u8 {
            stream.update(Bytes::from(vec![i]));
            fast_seen.push(fast.next_frame().await.unwrap().sequence);
        }

        let frame = slow.next_frame().await.unwrap();
        assert_eq!(fast_seen, vec![1, 2, 3, 4, 5]);
        assert_eq!(frame.sequence, 5);
        assert_eq!(frame.jpeg.as_ref(), &[5]);
    }

    #[tokio::test]
    async fn test_detach_does_not_affect_others() {
        let stream = LiveStream::new();
        let first = stream.attach();
        let mut second = stream.attach();
        assert_ne!(first.id(), second.id());

        stream.detach(first);
        assert_eq!(stream.viewer_count(), 1);

        stream.update(jpeg(b"x"));
        assert_eq!(second.next_frame().await.unwrap().jpeg, jpeg(b"x"));

        drop(second);
        assert_eq!(stream.viewer_count(), 0);

        // Updating with nobody watching is fine
        assert_eq!(stream.update(jpeg(b"y")), 2);
    }

    #[tokio::test]
    async fn test_close_ends_sessions() {
        let stream = LiveStream::new();
        let mut viewer = stream.attach();

        let waiter = tokio::spawn(async move { viewer.next_frame().await });
        stream.close();

        assert!(stream.is_closed());
        assert_eq!(waiter.await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_paces_viewer() {
        let stream = LiveStream::new();
        let mut viewer = stream.attach().with_interval(Some(Duration::from_millis(100)));

        stream.update(jpeg(b"a"));
        let start = Instant::now();
        assert_eq!(viewer.next_frame().await.unwrap().sequence, 1);

        stream.update(jpeg(b"b"));
        stream.update(jpeg(b"c"));
        let frame = viewer.next_frame().await.unwrap();

        assert_eq!(frame.sequence, 3);
        assert!(start.elapsed() >= Duration::from_millis(100));
    }
}
