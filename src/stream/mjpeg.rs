//! MJPEG multipart framing
//!
//! Each frame is one part of an unterminated `multipart/x-mixed-replace`
//! body:
//!
//! ```text
//! --MJPEGBOUNDARY\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: 5120\r\n
//! X-Frame-Sequence: 42\r\n
//! \r\n
//! <jpeg bytes>\r\n
//! ```

use std::convert::Infallible;

use bytes::{BufMut, Bytes, BytesMut};
use futures::Stream;

use super::{LiveFrame, ViewerSession};

/// Part separator
pub const BOUNDARY: &str = "MJPEGBOUNDARY";

/// Response content type for the stream
pub fn content_type() -> String {
    format!("multipart/x-mixed-replace; boundary={BOUNDARY}")
}

/// Frame one JPEG as a multipart part
pub fn part(frame: &LiveFrame) -> Bytes {
    let header = format!(
        "--{BOUNDARY}\r\n\
         Content-Type: image/jpeg\r\n\
         Content-Length: {len}\r\n\
         X-Frame-Sequence: {seq}\r\n\
         \r\n",
        len = frame.jpeg.len(),
        seq = frame.sequence,
    );

    let mut buf = BytesMut::with_capacity(header.len() + frame.jpeg.len() + 2);
    buf.put_slice(header.as_bytes());
    buf.put_slice(&frame.jpeg);
    buf.put_slice(b"\r\n");
    buf.freeze()
}

/// Turn a viewer session into a body stream of multipart parts
///
/// The stream ends when the live stream is closed. Dropping it detaches the
/// viewer.
pub fn into_body_stream(
    session: ViewerSession,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    futures::stream::unfold(session, |mut session| async move {
        let frame = session.next_frame().await?;
        Some((Ok(part(&frame)), session))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::LiveStream;
    use futures::StreamExt;

    #[test]
    fn test_part_layout() {
        let frame = LiveFrame {
            sequence: 7,
            jpeg: Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xD9]),
        };
        let bytes = part(&frame);

        let expected_header = "--MJPEGBOUNDARY\r\n\
                               Content-Type: image/jpeg\r\n\
                               Content-Length: 4\r\n\
                               X-Frame-Sequence: 7\r\n\r\n";
        assert!(bytes.starts_with(expected_header.as_bytes()));
        assert_eq!(&bytes[expected_header.len()..], &[0xFF, 0xD8, 0xFF, 0xD9, b'\r', b'\n']);
    }

    #[test]
    fn test_content_type() {
        assert_eq!(
            content_type(),
            "multipart/x-mixed-replace; boundary=MJPEGBOUNDARY"
        );
    }

    #[tokio::test]
    async fn test_body_stream_yields_parts_until_closed() {
        let stream = LiveStream::new();
        let mut body = Box::pin(into_body_stream(stream.attach()));

        stream.update(Bytes::from_static(b"jpeg"));
        let chunk = body.next().await.unwrap().unwrap();
        assert!(chunk.ends_with(b"jpeg\r\n"));

        stream.close();
        assert!(body.next().await.is_none());

        drop(body);
        assert_eq!(stream.viewer_count(), 0);
    }
}
