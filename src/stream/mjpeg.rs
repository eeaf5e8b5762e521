//! MJPEG multipart responder

use bytes::{BufMut, Bytes, BytesMut};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::session::{ClientGuard, Session};
use crate::stream::params::StreamParams;
use crate::stream::sink::StreamSink;
use crate::video::format::PixelFormat;

/// Multipart boundary token
pub const BOUNDARY: &str = "frame";

/// Minimal 1x1 white JPEG used as a keepalive while the capture has not
/// produced a frame yet.
pub const TINY_JPEG: &[u8] = &[
    0xFF, 0xD8, 0xFF, 0xDB, 0x00, 0x43, 0x00, 0x03, 0x02, 0x02, 0x03, 0x02, 0x02, 0x03, 0x03,
    0x03, 0x03, 0x04, 0x03, 0x03, 0x04, 0x05, 0x08, 0x05, 0x05, 0x04, 0x04, 0x05, 0x0A, 0x07,
    0x07, 0x06, 0x08, 0x0C, 0x0A, 0x0C, 0x0C, 0x0B, 0x0A, 0x0B, 0x0B, 0x0D, 0x0E, 0x12, 0x10,
    0x0D, 0x0E, 0x11, 0x0E, 0x0B, 0x0B, 0x10, 0x16, 0x10, 0x11, 0x13, 0x14, 0x15, 0x15, 0x15,
    0x0C, 0x0F, 0x17, 0x18, 0x16, 0x14, 0x18, 0x12, 0x14, 0x15, 0x14, 0xFF, 0xC0, 0x00, 0x11,
    0x08, 0x00, 0x01, 0x00, 0x01, 0x03, 0x01, 0x11, 0x00, 0x02, 0x11, 0x01, 0x03, 0x11, 0x01,
    0xFF, 0xC4, 0x00, 0x14, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0xFF, 0xC4, 0x00, 0x14, 0x10, 0x01, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF, 0xDA, 0x00, 0x0C, 0x03,
    0x01, 0x00, 0x02, 0x11, 0x03, 0x11, 0x00, 0x3F, 0x00, 0xFF, 0xD9,
];

/// Keepalive cadence while waiting for the first real frame
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(1);

/// Build one multipart chunk: boundary, part headers, JPEG bytes, CRLF
pub fn multipart_chunk(jpeg: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(jpeg.len() + 96);
    buf.put_slice(b"--");
    buf.put_slice(BOUNDARY.as_bytes());
    buf.put_slice(b"\r\nContent-Type: image/jpeg\r\nContent-Length: ");
    buf.put_slice(jpeg.len().to_string().as_bytes());
    buf.put_slice(b"\r\n\r\n");
    buf.put_slice(jpeg);
    buf.put_slice(b"\r\n");
    buf.freeze()
}

/// Responder loop: emit the latest captured JPEG at the session's frame
/// cadence until the client disconnects or the capture stops. Runs on a
/// blocking task; the guard decrements the client count on exit.
pub fn run(session: Arc<Session>, params: StreamParams, sink: StreamSink, guard: ClientGuard) {
    let _guard = guard;
    let interval = params.frame_interval();
    let mut seen_frame = false;
    let mut last_emit: Option<Instant> = None;

    loop {
        if !session.capture.running() {
            break;
        }
        if session.capture.pixel_format() != PixelFormat::Mjpeg {
            std::thread::sleep(Duration::from_millis(10));
            continue;
        }

        let Some(frame) = session.capture.latest_frame() else {
            // Keepalive until the device delivers its first frame.
            if !seen_frame
                && last_emit.map_or(true, |at| at.elapsed() >= KEEPALIVE_INTERVAL)
            {
                let chunk = multipart_chunk(TINY_JPEG);
                if !sink.write(chunk.clone()) {
                    break;
                }
                session.record_delivery(chunk.len());
                last_emit = Some(Instant::now());
            }
            std::thread::sleep(Duration::from_millis(10));
            continue;
        };

        seen_frame = true;
        let chunk = multipart_chunk(frame.data());
        if !sink.write(chunk.clone()) {
            break;
        }
        session.record_delivery(chunk.len());
        last_emit = Some(Instant::now());
        std::thread::sleep(interval);
    }

    debug!("MJPEG responder for {} exited", session.device_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multipart_chunk_layout() {
        let chunk = multipart_chunk(&[0xFF, 0xD8, 0xFF, 0xD9]);
        let text = String::from_utf8_lossy(&chunk);
        assert!(text.starts_with("--frame\r\n"));
        assert!(text.contains("Content-Type: image/jpeg\r\n"));
        assert!(text.contains("Content-Length: 4\r\n\r\n"));
        assert!(chunk.ends_with(b"\r\n"));
    }

    #[test]
    fn test_tiny_jpeg_is_valid_jpeg() {
        assert_eq!(&TINY_JPEG[..2], &[0xFF, 0xD8]);
        assert_eq!(&TINY_JPEG[TINY_JPEG.len() - 2..], &[0xFF, 0xD9]);
    }
}
