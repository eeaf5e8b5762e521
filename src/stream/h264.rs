//! Raw Annex-B H.264 responder

#![cfg(feature = "h264")]

use bytes::{BufMut, Bytes, BytesMut};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::session::{ClientGuard, Session};
use crate::stream::params::StreamParams;
use crate::stream::sink::StreamSink;
use crate::video::convert::{frame_to_i420, I420Buffer};
use crate::video::encoder::H264Encoder;

/// Annex-B start code prepended to every emitted access unit
const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// Prefix an encoded access unit with a 4-byte start code
pub fn start_code_chunk(nal: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + nal.len());
    buf.put_slice(&START_CODE);
    buf.put_slice(nal);
    buf.freeze()
}

/// Responder loop: convert the latest raw frame to I420, encode, and
/// write start-code-prefixed access units until the client disconnects
/// or the capture stops. The encoder is responder-local, so this client
/// starts on an IDR; later IDR feedback requests are observed through
/// the session's request sequence.
pub fn run(session: Arc<Session>, params: StreamParams, sink: StreamSink, guard: ClientGuard) {
    let _guard = guard;

    let mut encoder = match H264Encoder::new(&params, params.resolution()) {
        Ok(encoder) => encoder,
        Err(e) => {
            debug!("H.264 responder init failed: {}", e);
            return;
        }
    };
    encoder.force_idr();

    let interval = params.frame_interval();
    let mut yuv = I420Buffer::new(params.resolution());
    let mut seen_idr_requests = session.idr_request_seq();

    loop {
        if !session.capture.running() {
            break;
        }
        if !session.capture.pixel_format().is_encodable() {
            std::thread::sleep(Duration::from_millis(10));
            continue;
        }
        let Some(frame) = session.capture.latest_frame() else {
            std::thread::sleep(Duration::from_millis(10));
            continue;
        };
        if frame_to_i420(&frame, &mut yuv).is_err() {
            std::thread::sleep(Duration::from_millis(10));
            continue;
        }

        let requested = session.idr_request_seq();
        if requested != seen_idr_requests {
            encoder.force_idr();
            seen_idr_requests = requested;
        }

        let nal = match encoder.encode_i420(&yuv) {
            Ok(nal) => nal,
            Err(e) => {
                debug!("Encode failed: {}", e);
                std::thread::sleep(Duration::from_millis(5));
                continue;
            }
        };
        if !nal.is_empty() {
            let chunk = start_code_chunk(&nal);
            if !sink.write(chunk.clone()) {
                break;
            }
            session.record_delivery(chunk.len());
        }
        std::thread::sleep(interval);
    }

    debug!("H.264 responder for {} exited", session.device_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_code_chunk() {
        let chunk = start_code_chunk(&[0x65, 0x88]);
        assert_eq!(chunk.as_ref(), &[0, 0, 0, 1, 0x65, 0x88]);
    }
}
