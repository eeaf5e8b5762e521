//! Per-device streaming session

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::stream::params::StreamParams;
use crate::video::annexb::ParameterSets;
use crate::video::capture::{Capture, Negotiated};
use crate::video::format::PixelFormat;

/// One active device: the capture pipeline, the parameters locked by the
/// first successful requester, cached H.264 parameter sets, and counters.
pub struct Session {
    pub device_id: String,
    /// Exclusively owned capture adapter; lives as long as the session
    pub capture: Capture,
    params: RwLock<StreamParams>,
    pixel_format: RwLock<PixelFormat>,
    /// Write-once SPS/PPS from this session's first IDR
    parameter_sets: RwLock<Option<ParameterSets>>,
    client_count: AtomicU32,
    last_accessed: RwLock<Instant>,
    started: RwLock<Instant>,
    frames_sent: AtomicU64,
    bytes_sent: AtomicU64,
    /// Responders force an IDR whenever this advances past the value they
    /// last observed
    idr_requests: AtomicU64,
}

impl Session {
    pub fn new(device_id: String, params: StreamParams) -> Arc<Self> {
        let now = Instant::now();
        Arc::new(Self {
            device_id,
            capture: Capture::new(),
            params: RwLock::new(params),
            pixel_format: RwLock::new(PixelFormat::Unknown),
            parameter_sets: RwLock::new(None),
            client_count: AtomicU32::new(0),
            last_accessed: RwLock::new(now),
            started: RwLock::new(now),
            frames_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            idr_requests: AtomicU64::new(0),
        })
    }

    /// Snapshot of the locked parameters
    pub fn params(&self) -> StreamParams {
        self.params.read().clone()
    }

    pub fn pixel_format(&self) -> PixelFormat {
        *self.pixel_format.read()
    }

    pub fn client_count(&self) -> u32 {
        self.client_count.load(Ordering::SeqCst)
    }

    pub(crate) fn attach(&self) {
        self.client_count.fetch_add(1, Ordering::SeqCst);
        self.touch();
    }

    pub(crate) fn detach(&self) {
        let previous = self.client_count.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "client_count underflow");
        self.touch();
    }

    /// Refresh the idle timestamp
    pub fn touch(&self) {
        *self.last_accessed.write() = Instant::now();
    }

    pub fn idle_for(&self) -> std::time::Duration {
        self.last_accessed.read().elapsed()
    }

    /// Record bytes delivered to a client
    pub fn record_delivery(&self, bytes: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        self.touch();
    }

    /// Reset statistics after a successful cold start and sync geometry
    /// the device may have clamped.
    pub fn sync_after_start(&self, negotiated: Negotiated) {
        {
            let mut params = self.params.write();
            if negotiated.resolution.width > 0 {
                params.width = negotiated.resolution.width;
            }
            if negotiated.resolution.height > 0 {
                params.height = negotiated.resolution.height;
            }
            if negotiated.fps > 0 {
                params.fps = negotiated.fps;
            }
        }
        *self.pixel_format.write() = negotiated.pixel_format;
        *self.started.write() = Instant::now();
        self.frames_sent.store(0, Ordering::Relaxed);
        self.bytes_sent.store(0, Ordering::Relaxed);
    }

    /// Cached SPS/PPS, if any responder has populated them yet
    pub fn parameter_sets(&self) -> Option<ParameterSets> {
        self.parameter_sets.read().clone()
    }

    /// Cache SPS/PPS from the first IDR. First writer wins; later calls
    /// are ignored so the values stay stable until teardown.
    pub fn set_parameter_sets(&self, sets: ParameterSets) {
        let mut guard = self.parameter_sets.write();
        if guard.is_none() {
            *guard = Some(sets);
        }
    }

    /// Ask every attached H.264 responder for an IDR
    pub fn request_idr(&self) -> u64 {
        self.idr_requests.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Current IDR request sequence, observed by responders
    pub fn idr_request_seq(&self) -> u64 {
        self.idr_requests.load(Ordering::SeqCst)
    }

    /// Statistics snapshot for `/stream/{id}/stats`
    pub fn stats(&self) -> SessionStats {
        let params = self.params();
        let uptime = self.started.read().elapsed().as_secs_f64().max(0.001);
        let frames_sent = self.frames_sent.load(Ordering::Relaxed);
        let bytes_sent = self.bytes_sent.load(Ordering::Relaxed);

        SessionStats {
            device: self.device_id.clone(),
            codec: params.codec.to_string(),
            container: params.container.to_string(),
            pixel_format: self.pixel_format().label().to_string(),
            width: params.width,
            height: params.height,
            fps: params.fps,
            bitrate_kbps: params.bitrate_kbps,
            quality: params.quality,
            gop: params.gop,
            latency: params.latency.to_string(),
            active_clients: self.client_count(),
            fps_out: frames_sent as f64 / uptime,
            bitrate_out_kbps: bytes_sent as f64 * 8.0 / 1000.0 / uptime,
            frames_sent,
            bytes_sent,
        }
    }
}

/// JSON body of `/stream/{id}/stats`
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub device: String,
    pub codec: String,
    pub container: String,
    pub pixel_format: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate_kbps: u32,
    pub quality: u32,
    pub gop: u32,
    pub latency: String,
    pub active_clients: u32,
    pub fps_out: f64,
    pub bitrate_out_kbps: f64,
    pub frames_sent: u64,
    pub bytes_sent: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_attach_detach_counts() {
        let session = Session::new("video0".into(), StreamParams::default());
        assert_eq!(session.client_count(), 0);
        session.attach();
        session.attach();
        assert_eq!(session.client_count(), 2);
        session.detach();
        assert_eq!(session.client_count(), 1);
        session.detach();
        assert_eq!(session.client_count(), 0);
    }

    #[test]
    fn test_parameter_sets_write_once() {
        let session = Session::new("video0".into(), StreamParams::default());
        assert!(session.parameter_sets().is_none());

        session.set_parameter_sets(ParameterSets {
            sps: Bytes::from_static(&[0x67, 1]),
            pps: Bytes::from_static(&[0x68, 2]),
        });
        session.set_parameter_sets(ParameterSets {
            sps: Bytes::from_static(&[0x67, 9]),
            pps: Bytes::from_static(&[0x68, 9]),
        });

        let sets = session.parameter_sets().unwrap();
        assert_eq!(sets.sps.as_ref(), &[0x67, 1]);
        assert_eq!(sets.pps.as_ref(), &[0x68, 2]);
    }

    #[test]
    fn test_idr_request_sequence() {
        let session = Session::new("video0".into(), StreamParams::default());
        assert_eq!(session.idr_request_seq(), 0);
        assert_eq!(session.request_idr(), 1);
        assert_eq!(session.request_idr(), 2);
        assert_eq!(session.idr_request_seq(), 2);
    }

    #[test]
    fn test_delivery_updates_stats() {
        let session = Session::new("video0".into(), StreamParams::default());
        session.record_delivery(1000);
        session.record_delivery(500);
        let stats = session.stats();
        assert_eq!(stats.frames_sent, 2);
        assert_eq!(stats.bytes_sent, 1500);
        assert!(stats.fps_out > 0.0);
    }

    #[test]
    fn test_sync_after_start_resets_counters() {
        let session = Session::new("video0".into(), StreamParams::default());
        session.record_delivery(1234);
        session.sync_after_start(Negotiated {
            resolution: crate::video::format::Resolution::new(1280, 720),
            fps: 30,
            pixel_format: PixelFormat::Yuyv,
        });
        let stats = session.stats();
        assert_eq!(stats.frames_sent, 0);
        assert_eq!(stats.width, 1280);
        assert_eq!(stats.fps, 30);
        assert_eq!(stats.pixel_format, "yuyv");
    }
}
