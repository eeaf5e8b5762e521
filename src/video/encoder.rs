//! H.264 encoder adapter over OpenH264
//!
//! One encoder per responder so every joining client gets a fresh IDR.
//! Compiled behind the `h264` cargo feature; without it the H.264
//! endpoints answer `h264_unavailable`.

#![cfg(feature = "h264")]

use bytes::Bytes;
use openh264::encoder::{Encoder, EncoderConfig, RateControlMode};
use openh264::formats::YUVSource;
use openh264::OpenH264API;
use tracing::debug;

use crate::error::{AppError, Result};
use crate::stream::params::StreamParams;
use crate::video::convert::I420Buffer;
use crate::video::format::Resolution;

/// Borrowed I420 planes fed to the encoder
struct I420Source<'a> {
    buf: &'a I420Buffer,
}

impl YUVSource for I420Source<'_> {
    fn dimensions(&self) -> (usize, usize) {
        let res = self.buf.resolution();
        (res.width as usize, res.height as usize)
    }

    fn strides(&self) -> (usize, usize, usize) {
        let res = self.buf.resolution();
        let w = res.width as usize;
        (w, w / 2, w / 2)
    }

    fn y(&self) -> &[u8] {
        self.buf.y_plane()
    }

    fn u(&self) -> &[u8] {
        self.buf.u_plane()
    }

    fn v(&self) -> &[u8] {
        self.buf.v_plane()
    }
}

/// Per-responder H.264 encoder
pub struct H264Encoder {
    inner: Encoder,
    resolution: Resolution,
    gop: u32,
    frame_index: u64,
}

impl H264Encoder {
    /// Configure an encoder for a session's locked parameters. Bitrate
    /// rate control, frame skipping disabled; the GOP is enforced by
    /// forcing an IDR every `gop` frames since the wrapper exposes no
    /// IDR-interval knob.
    pub fn new(params: &StreamParams, resolution: Resolution) -> Result<Self> {
        let config = EncoderConfig::new()
            .rate_control_mode(RateControlMode::Bitrate)
            .set_bitrate_bps(params.bitrate_kbps.saturating_mul(1000))
            .enable_skip_frame(false);

        let inner = Encoder::with_api_config(OpenH264API::from_source(), config)
            .map_err(|e| AppError::H264Unavailable(format!("encoder init failed: {}", e)))?;

        debug!(
            "H.264 encoder ready: {} @ {} kbps, gop {}",
            resolution, params.bitrate_kbps, params.gop
        );

        Ok(Self {
            inner,
            resolution,
            gop: params.gop,
            frame_index: 0,
        })
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Encode one I420 frame to its Annex-B NAL stream. An empty payload
    /// means the encoder swallowed the frame; callers continue.
    pub fn encode_i420(&mut self, buf: &I420Buffer) -> Result<Bytes> {
        if buf.resolution() != self.resolution {
            return Err(AppError::Video(format!(
                "frame is {}, encoder expects {}",
                buf.resolution(),
                self.resolution
            )));
        }

        if self.gop > 0 && self.frame_index > 0 && self.frame_index % self.gop as u64 == 0 {
            self.inner.force_intra_frame();
        }
        self.frame_index += 1;

        let bitstream = self
            .inner
            .encode(&I420Source { buf })
            .map_err(|e| AppError::Video(format!("encode failed: {}", e)))?;

        Ok(Bytes::from(bitstream.to_vec()))
    }

    /// Force the next encoded frame to be an IDR
    pub fn force_idr(&mut self) {
        self.inner.force_intra_frame();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoder_produces_annexb_idr() {
        let params = StreamParams::default();
        let resolution = Resolution::new(64, 64);
        let mut encoder = match H264Encoder::new(&params, resolution) {
            Ok(e) => e,
            // OpenH264 sources unavailable in this environment
            Err(_) => return,
        };
        encoder.force_idr();

        let buf = I420Buffer::new(resolution);
        let nal = encoder.encode_i420(&buf).unwrap();
        if nal.is_empty() {
            return;
        }
        // First IDR carries SPS and PPS, and an IDR slice.
        assert!(crate::video::annexb::extract_parameter_sets(&nal).is_some());
        assert!(crate::video::annexb::contains_idr(&nal));
    }

    #[test]
    fn test_encoder_rejects_mismatched_geometry() {
        let params = StreamParams::default();
        let mut encoder = match H264Encoder::new(&params, Resolution::new(64, 64)) {
            Ok(e) => e,
            Err(_) => return,
        };
        let buf = I420Buffer::new(Resolution::new(32, 32));
        assert!(encoder.encode_i420(&buf).is_err());
    }
}
