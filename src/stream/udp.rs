//! Best-effort UDP sender
//!
//! A GET on `/stream/udp/{device}` answers immediately and leaves a
//! detached producer pushing datagrams at the target for a bounded
//! duration. MJPEG frames travel as raw ≤ MTU chunks (opaque
//! reassembly); H.264 frames are start-code prefixed, then fragmented
//! under a fixed little-endian header so receivers can reassemble.

use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::session::{ClientGuard, Session};
use crate::stream::params::{Codec, StreamParams};
#[cfg(feature = "h264")]
use crate::video::convert::{frame_to_i420, I420Buffer};
#[cfg(feature = "h264")]
use crate::video::encoder::H264Encoder;

/// Datagram payload ceiling
pub const MTU: usize = 1400;

/// Fixed fragment header for H.264 datagrams, serialized little-endian
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    pub frame_id: u32,
    pub frag_id: u16,
    pub num_frags: u16,
    pub data_size: u32,
}

impl FragmentHeader {
    pub const SIZE: usize = 12;

    /// Serialize explicitly as little-endian for portability
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.frame_id.to_le_bytes());
        buf[4..6].copy_from_slice(&self.frag_id.to_le_bytes());
        buf[6..8].copy_from_slice(&self.num_frags.to_le_bytes());
        buf[8..12].copy_from_slice(&self.data_size.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; Self::SIZE]) -> Self {
        Self {
            frame_id: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            frag_id: u16::from_le_bytes(buf[4..6].try_into().unwrap()),
            num_frags: u16::from_le_bytes(buf[6..8].try_into().unwrap()),
            data_size: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
        }
    }
}

/// Payload bytes available per H.264 datagram
pub const H264_FRAGMENT_PAYLOAD: usize = MTU - FragmentHeader::SIZE;

/// Number of datagrams a frame of `len` bytes splits into
pub fn fragment_count(len: usize, payload_per_fragment: usize) -> usize {
    len.div_ceil(payload_per_fragment).max(1)
}

/// Producer loop; runs detached for `duration`, the guard decrements the
/// client count on every exit path, socket failures included.
pub fn run(
    session: Arc<Session>,
    params: StreamParams,
    target: SocketAddr,
    duration: Duration,
    guard: ClientGuard,
) {
    let _guard = guard;

    let socket = match UdpSocket::bind("0.0.0.0:0") {
        Ok(socket) => socket,
        Err(e) => {
            warn!("UDP socket bind failed: {}", e);
            return;
        }
    };
    if let Err(e) = socket.connect(target) {
        warn!("UDP connect to {} failed: {}", target, e);
        return;
    }

    #[cfg(feature = "h264")]
    let mut h264 = if params.codec == Codec::H264 {
        match H264Encoder::new(&params, params.resolution()) {
            Ok(mut encoder) => {
                encoder.force_idr();
                Some((encoder, I420Buffer::new(params.resolution())))
            }
            Err(e) => {
                warn!("UDP H.264 encoder init failed: {}", e);
                return;
            }
        }
    } else {
        None
    };
    #[cfg(not(feature = "h264"))]
    if params.codec == Codec::H264 {
        warn!("UDP H.264 sender requires the h264 feature");
        return;
    }

    let interval = params.frame_interval();
    let started = Instant::now();
    #[cfg(feature = "h264")]
    let mut frame_id: u32 = 0;

    while started.elapsed() < duration {
        if !session.capture.running() {
            std::thread::sleep(Duration::from_millis(10));
            continue;
        }
        let Some(frame) = session.capture.latest_frame() else {
            std::thread::sleep(Duration::from_millis(5));
            continue;
        };

        match params.codec {
            Codec::Mjpeg => {
                // Raw JPEG chunks; reassembly is the receiver's problem.
                let mut sent = 0usize;
                for chunk in frame.data().chunks(MTU) {
                    if socket.send(chunk).is_ok() {
                        sent += chunk.len();
                    }
                }
                session.record_delivery(sent);
            }
            #[cfg(feature = "h264")]
            Codec::H264 => {
                let Some((encoder, yuv)) = h264.as_mut() else {
                    break;
                };
                if !frame.format.is_encodable() || frame_to_i420(&frame, yuv).is_err() {
                    std::thread::sleep(Duration::from_millis(5));
                    continue;
                }
                let nal = match encoder.encode_i420(yuv) {
                    Ok(nal) if !nal.is_empty() => nal,
                    _ => {
                        std::thread::sleep(Duration::from_millis(5));
                        continue;
                    }
                };
                let packet = super::h264::start_code_chunk(&nal);
                frame_id = frame_id.wrapping_add(1);

                let num_frags = fragment_count(packet.len(), H264_FRAGMENT_PAYLOAD) as u16;
                let mut sent = 0usize;
                for (frag_id, payload) in packet.chunks(H264_FRAGMENT_PAYLOAD).enumerate() {
                    let header = FragmentHeader {
                        frame_id,
                        frag_id: frag_id as u16,
                        num_frags,
                        data_size: payload.len() as u32,
                    };
                    let mut datagram = Vec::with_capacity(FragmentHeader::SIZE + payload.len());
                    datagram.extend_from_slice(&header.to_bytes());
                    datagram.extend_from_slice(payload);
                    if socket.send(&datagram).is_ok() {
                        sent += datagram.len();
                    }
                }
                session.record_delivery(sent);
            }
            #[cfg(not(feature = "h264"))]
            Codec::H264 => break,
        }

        std::thread::sleep(interval);
    }

    debug!(
        "UDP sender for {} to {} finished after {:?}",
        session.device_id,
        target,
        started.elapsed()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip_little_endian() {
        let header = FragmentHeader {
            frame_id: 0x01020304,
            frag_id: 0x0506,
            num_frags: 0x0708,
            data_size: 0x090A0B0C,
        };
        let bytes = header.to_bytes();
        assert_eq!(bytes[0..4], [0x04, 0x03, 0x02, 0x01]);
        assert_eq!(bytes[4..6], [0x06, 0x05]);
        assert_eq!(bytes[6..8], [0x08, 0x07]);
        assert_eq!(bytes[8..12], [0x0C, 0x0B, 0x0A, 0x09]);
        assert_eq!(FragmentHeader::from_bytes(&bytes), header);
    }

    #[test]
    fn test_fragment_arithmetic() {
        assert_eq!(fragment_count(0, H264_FRAGMENT_PAYLOAD), 1);
        assert_eq!(fragment_count(1, H264_FRAGMENT_PAYLOAD), 1);
        assert_eq!(fragment_count(H264_FRAGMENT_PAYLOAD, H264_FRAGMENT_PAYLOAD), 1);
        assert_eq!(
            fragment_count(H264_FRAGMENT_PAYLOAD + 1, H264_FRAGMENT_PAYLOAD),
            2
        );
        // Every datagram fits under the MTU.
        assert!(H264_FRAGMENT_PAYLOAD + FragmentHeader::SIZE <= MTU);
    }
}
