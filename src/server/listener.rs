//! MJPEG stream server
//!
//! Each accepted viewer gets its own session on the live stream; the
//! response body yields one multipart part per frame until the stream is
//! closed or the client goes away.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;

use crate::error::Result;
use crate::server::config::ServerConfig;
use crate::stream::{mjpeg, LiveStream};

#[derive(Clone)]
struct AppState {
    stream: LiveStream,
    viewer_permits: Option<Arc<Semaphore>>,
    interval: Option<Duration>,
}

/// MJPEG server
pub struct StreamServer {
    config: ServerConfig,
    stream: LiveStream,
}

impl StreamServer {
    /// Create a server streaming from `stream`
    pub fn new(config: ServerConfig, stream: LiveStream) -> Self {
        Self { config, stream }
    }

    /// The live stream served to viewers
    pub fn stream(&self) -> &LiveStream {
        &self.stream
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    /// Build the router
    pub fn router(&self) -> Router {
        let viewer_permits = if self.config.max_viewers > 0 {
            Some(Arc::new(Semaphore::new(self.config.max_viewers)))
        } else {
            None
        };

        let state = AppState {
            stream: self.stream.clone(),
            viewer_permits,
            interval: self.config.stream_interval,
        };

        Router::new()
            .route(&self.config.path, get(mjpeg_handler))
            .with_state(state)
    }

    /// Bind and serve until `shutdown` completes
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` completes
    ///
    /// On shutdown the live stream is closed so open viewer responses end
    /// and the server can drain.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::info!(
            addr = %listener.local_addr()?,
            path = %self.config.path,
            max_viewers = self.config.max_viewers,
            "MJPEG server listening"
        );

        let stream = self.stream.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown.await;
                tracing::info!("Shutdown signal received, closing viewer streams");
                stream.close();
            })
            .await?;

        tracing::info!("MJPEG server stopped");
        Ok(())
    }
}

async fn mjpeg_handler(State(state): State<AppState>) -> Response {
    if state.stream.is_closed() {
        return (StatusCode::SERVICE_UNAVAILABLE, "stream closed").into_response();
    }

    let permit = match &state.viewer_permits {
        Some(sem) => match Arc::clone(sem).try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) => {
                tracing::warn!(
                    viewers = state.stream.viewer_count(),
                    "Viewer rejected: limit reached"
                );
                return (StatusCode::SERVICE_UNAVAILABLE, "viewer limit reached").into_response();
            }
        },
        None => None,
    };

    let session = state.stream.attach().with_interval(state.interval);
    let parts = mjpeg::into_body_stream(session).map(move |part| {
        // The permit lives as long as the response body
        let _permit = &permit;
        part
    });

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mjpeg::content_type())
        .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
        .header(header::PRAGMA, "no-cache")
        .header(header::EXPIRES, "0")
        .body(Body::from_stream(parts));

    match response {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build stream response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio_util::sync::CancellationToken;

    async fn start(config: ServerConfig) -> (SocketAddr, LiveStream, CancellationToken) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = LiveStream::new();
        let server = StreamServer::new(config, stream.clone());
        let cancel = CancellationToken::new();

        let shutdown = cancel.clone();
        tokio::spawn(async move {
            server
                .serve(listener, async move { shutdown.cancelled().await })
                .await
                .unwrap();
        });

        (addr, stream, cancel)
    }

    async fn request(addr: SocketAddr, path: &str) -> TcpStream {
        let mut conn = TcpStream::connect(addr).await.unwrap();
        let req = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        conn.write_all(req.as_bytes()).await.unwrap();
        conn
    }

    /// Read until `needle` shows up in the accumulated data
    async fn read_until(conn: &mut TcpStream, buf: &mut Vec<u8>, needle: &[u8]) {
        let deadline = Duration::from_secs(5);
        tokio::time::timeout(deadline, async {
            let mut chunk = [0u8; 4096];
            while !buf.windows(needle.len()).any(|w| w == needle) {
                let n = conn.read(&mut chunk).await.unwrap();
                assert!(n > 0, "connection closed");
                buf.extend_from_slice(&chunk[..n]);
            }
        })
        .await
        .expect("timed out reading response");
    }

    #[tokio::test]
    async fn test_viewer_receives_parts() {
        let (addr, stream, cancel) = start(ServerConfig::default()).await;

        let mut conn = request(addr, "/").await;
        let mut buf = Vec::new();
        read_until(&mut conn, &mut buf, b"\r\n\r\n").await;

        let head = String::from_utf8_lossy(&buf).to_lowercase();
        assert!(head.starts_with("http/1.1 200"));
        assert!(head.contains("content-type: multipart/x-mixed-replace; boundary=mjpegboundary"));
        assert!(head.contains("cache-control: no-cache"));
        assert_eq!(stream.viewer_count(), 1);

        stream.update(Bytes::from_static(b"JPEGDATA"));
        read_until(&mut conn, &mut buf, b"JPEGDATA\r\n").await;

        let text = String::from_utf8_lossy(&buf);
        assert!(text.contains("--MJPEGBOUNDARY\r\nContent-Type: image/jpeg\r\nContent-Length: 8\r\n"));
        assert!(text.contains("X-Frame-Sequence: 1\r\n"));

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_viewer_limit() {
        let (addr, stream, cancel) = start(ServerConfig::default().max_viewers(1)).await;

        let mut first = request(addr, "/").await;
        let mut buf = Vec::new();
        read_until(&mut first, &mut buf, b"\r\n\r\n").await;
        assert_eq!(stream.viewer_count(), 1);

        let mut second = request(addr, "/").await;
        let mut rejected = Vec::new();
        read_until(&mut second, &mut rejected, b"\r\n\r\n").await;
        assert!(String::from_utf8_lossy(&rejected).starts_with("HTTP/1.1 503"));

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let (addr, _stream, cancel) = start(ServerConfig::default().path("/video")).await;

        let mut conn = request(addr, "/other").await;
        let mut buf = Vec::new();
        read_until(&mut conn, &mut buf, b"\r\n\r\n").await;
        assert!(String::from_utf8_lossy(&buf).starts_with("HTTP/1.1 404"));

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_shutdown_ends_viewer_streams() {
        let (addr, stream, cancel) = start(ServerConfig::default()).await;

        let mut conn = request(addr, "/").await;
        let mut buf = Vec::new();
        read_until(&mut conn, &mut buf, b"\r\n\r\n").await;

        cancel.cancel();

        // The chunked body terminates and the connection closes
        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            let mut rest = Vec::new();
            conn.read_to_end(&mut rest).await.unwrap();
            rest
        })
        .await
        .expect("viewer stream did not end");

        assert!(drained.ends_with(b"0\r\n\r\n"));
        assert!(stream.is_closed());
    }
}
