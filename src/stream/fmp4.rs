//! Fragmented-MP4 H.264 responder
//!
//! Two phases: a bootstrap that secures SPS/PPS before any body bytes
//! are written (failure still maps to an HTTP status), then the
//! streaming loop emitting the init segment once and one `moof`+`mdat`
//! per encoded frame.

#![cfg(feature = "h264")]

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::{AppError, Result};
use crate::mp4::{sample_duration, Mp4Fragmenter};
use crate::session::{ClientGuard, Session};
use crate::stream::params::StreamParams;
use crate::stream::sink::StreamSink;
use crate::video::annexb;
use crate::video::convert::{frame_to_i420, I420Buffer};
use crate::video::encoder::H264Encoder;

/// Maximum bootstrap attempts
const BOOTSTRAP_ATTEMPTS: u32 = 200;
/// Pause between bootstrap attempts
const BOOTSTRAP_RETRY: Duration = Duration::from_millis(10);

/// Secure the session's SPS/PPS before the response body opens. Uses the
/// cached sets when some responder already extracted them; otherwise
/// drives a throwaway encoder against live frames. Blocking.
pub fn bootstrap_parameter_sets(session: &Session, params: &StreamParams) -> Result<()> {
    if !session.capture.running() {
        return Err(AppError::Fmp4Unavailable("capture not running".to_string()));
    }
    if session.parameter_sets().is_some() {
        return Ok(());
    }

    let mut encoder = H264Encoder::new(params, params.resolution())
        .map_err(|e| AppError::Fmp4Unavailable(e.to_string()))?;
    encoder.force_idr();
    let mut yuv = I420Buffer::new(params.resolution());

    for _ in 0..BOOTSTRAP_ATTEMPTS {
        let Some(frame) = session.capture.latest_frame() else {
            std::thread::sleep(BOOTSTRAP_RETRY);
            continue;
        };
        if !frame.format.is_encodable() {
            return Err(AppError::Fmp4Unavailable(format!(
                "unsupported pixel format: {}",
                frame.format
            )));
        }
        if frame_to_i420(&frame, &mut yuv).is_err() {
            std::thread::sleep(BOOTSTRAP_RETRY);
            continue;
        }
        let nal = match encoder.encode_i420(&yuv) {
            Ok(nal) => nal,
            Err(_) => {
                std::thread::sleep(BOOTSTRAP_RETRY);
                continue;
            }
        };
        if let Some(sets) = annexb::extract_parameter_sets(&nal) {
            session.set_parameter_sets(sets);
            return Ok(());
        }
        std::thread::sleep(BOOTSTRAP_RETRY);
    }

    Err(AppError::Fmp4Unavailable(
        "timed out waiting for SPS/PPS".to_string(),
    ))
}

/// Streaming loop. The init segment goes out exactly once, then each
/// encoded frame becomes one fragment with a strictly increasing
/// sequence (from 1) and a decode time advancing by `sample_duration`.
pub fn run(session: Arc<Session>, params: StreamParams, sink: StreamSink, guard: ClientGuard) {
    let _guard = guard;

    let mut encoder = match H264Encoder::new(&params, params.resolution()) {
        Ok(encoder) => encoder,
        Err(e) => {
            debug!("fMP4 responder init failed: {}", e);
            return;
        }
    };
    encoder.force_idr();

    let duration = sample_duration(params.fps);
    let interval = params.frame_interval();
    let mut yuv = I420Buffer::new(params.resolution());
    let mut mux = session
        .parameter_sets()
        .map(|sets| Mp4Fragmenter::new(params.width, params.height, &sets));
    let mut sent_init = false;
    let mut sequence: u32 = 1;
    let mut decode_time: u64 = 0;
    let mut seen_idr_requests = session.idr_request_seq();

    loop {
        if !session.capture.running() {
            break;
        }
        let Some(frame) = session.capture.latest_frame() else {
            std::thread::sleep(Duration::from_millis(5));
            continue;
        };
        if !frame.format.is_encodable() {
            std::thread::sleep(Duration::from_millis(5));
            continue;
        }
        if frame_to_i420(&frame, &mut yuv).is_err() {
            std::thread::sleep(Duration::from_millis(5));
            continue;
        }

        let requested = session.idr_request_seq();
        if requested != seen_idr_requests {
            encoder.force_idr();
            seen_idr_requests = requested;
        }

        let nal = match encoder.encode_i420(&yuv) {
            Ok(nal) if !nal.is_empty() => nal,
            // Encoder swallowed the frame; try the next one.
            Ok(_) => {
                std::thread::sleep(Duration::from_millis(5));
                continue;
            }
            Err(e) => {
                debug!("Encode failed: {}", e);
                std::thread::sleep(Duration::from_millis(5));
                continue;
            }
        };

        if mux.is_none() {
            // Bootstrap normally secures these; recover here if the
            // cache was still empty when this responder started.
            if let Some(sets) = annexb::extract_parameter_sets(&nal) {
                session.set_parameter_sets(sets);
            }
            if let Some(sets) = session.parameter_sets() {
                mux = Some(Mp4Fragmenter::new(params.width, params.height, &sets));
            } else {
                continue;
            }
        }
        let Some(ref mux) = mux else { continue };

        if !sent_init {
            let init = mux.init_segment();
            let len = init.len();
            if !sink.write(init) {
                break;
            }
            session.record_delivery(len);
            sent_init = true;
        }

        let avcc = annexb::annexb_to_avcc(&nal);
        let keyframe = annexb::contains_idr(&nal);
        let fragment = mux.fragment(&avcc, sequence, decode_time, duration, keyframe);
        sequence += 1;
        decode_time += duration as u64;

        let len = fragment.len();
        if !sink.write(fragment) {
            break;
        }
        session.record_delivery(len);
        std::thread::sleep(interval);
    }

    debug!("fMP4 responder for {} exited", session.device_id);
}
