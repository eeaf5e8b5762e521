//! V4L2 capture adapter
//!
//! Owns one hardware source per session: format negotiation, a producer
//! thread feeding a single-slot latest-frame buffer (newest wins), and
//! synchronous teardown. Consumers poll `latest_frame`; there is no frame
//! queue, so slow clients miss frames by design.

use arc_swap::ArcSwap;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use v4l::buffer::Type as BufferType;
use v4l::control::{Control, Value as ControlValue};
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::capture::Parameters;
use v4l::video::Capture as CaptureTrait;
use v4l::Format;
use tracing::{debug, error, info, warn};

use crate::error::{AppError, Result};
use crate::stream::params::{Codec, StreamParams};
use crate::video::format::{PixelFormat, Resolution};
use crate::video::frame::VideoFrame;

/// Number of mmap capture buffers
const BUFFER_COUNT: u32 = 2;
/// Frames smaller than this are driver glitches and are dropped
const MIN_FRAME_SIZE: usize = 128;
/// V4L2_CID_JPEG_COMPRESSION_QUALITY
const JPEG_QUALITY_CID: u32 = 0x009d_0903;

/// Format, geometry and rate actually negotiated with the device
#[derive(Debug, Clone, Copy)]
pub struct Negotiated {
    pub resolution: Resolution,
    pub fps: u32,
    pub pixel_format: PixelFormat,
}

/// State shared between the adapter and its producer thread
struct Shared {
    latest: ArcSwap<Option<VideoFrame>>,
    running: AtomicBool,
    stop: AtomicBool,
    sequence: AtomicU64,
}

/// One capture device, exclusively owned by a session
pub struct Capture {
    shared: Arc<Shared>,
    negotiated: RwLock<Option<Negotiated>>,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
    /// Serializes concurrent cold starts; the loser observes the winner's
    /// running producer and returns its negotiation.
    start_lock: Mutex<()>,
}

/// Resolve a device id (`video0` or `/dev/video0`) to its path
pub fn device_path(device_id: &str) -> PathBuf {
    if device_id.starts_with("/dev/") {
        PathBuf::from(device_id)
    } else {
        Path::new("/dev").join(device_id)
    }
}

impl Capture {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                latest: ArcSwap::from_pointee(None),
                running: AtomicBool::new(false),
                stop: AtomicBool::new(false),
                sequence: AtomicU64::new(0),
            }),
            negotiated: RwLock::new(None),
            thread: Mutex::new(None),
            start_lock: Mutex::new(()),
        }
    }

    /// Open the device, negotiate format/geometry/rate and start the
    /// producer thread. Blocking; call from a blocking context.
    pub fn start(&self, device_id: &str, params: &StreamParams) -> Result<Negotiated> {
        let _start = self.start_lock.lock();
        if self.running() {
            if let Some(negotiated) = *self.negotiated.read() {
                return Ok(negotiated);
            }
        }

        let path = device_path(device_id);
        info!(
            "Starting capture on {} at {}x{} fps={} codec={}",
            path.display(),
            params.width,
            params.height,
            params.fps,
            params.codec
        );

        let device = Device::with_path(&path).map_err(|e| {
            AppError::DeviceUnavailable(format!("failed to open {}: {}", path.display(), e))
        })?;

        let negotiated = configure_device(&device, params, &path)?;
        *self.negotiated.write() = Some(negotiated);

        self.shared.stop.store(false, Ordering::SeqCst);
        self.shared.running.store(true, Ordering::SeqCst);
        self.shared.latest.store(Arc::new(None));
        self.shared.sequence.store(0, Ordering::SeqCst);

        let shared = self.shared.clone();
        let thread_name = format!("capture-{}", device_id.replace('/', "-"));
        let handle = match std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || producer_loop(device, shared, negotiated))
        {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                return Err(AppError::DeviceUnavailable(format!(
                    "capture thread spawn: {}",
                    e
                )));
            }
        };
        *self.thread.lock() = Some(handle);

        Ok(negotiated)
    }

    /// Signal the producer to stop and join it. Idempotent.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                warn!("Capture producer thread panicked");
            }
        }
        self.shared.running.store(false, Ordering::SeqCst);
    }

    pub fn running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Most recent full frame, if any has arrived
    pub fn latest_frame(&self) -> Option<VideoFrame> {
        (**self.shared.latest.load()).clone()
    }

    pub fn pixel_format(&self) -> PixelFormat {
        (*self.negotiated.read())
            .map(|n| n.pixel_format)
            .unwrap_or_default()
    }

    pub fn negotiated(&self) -> Option<Negotiated> {
        *self.negotiated.read()
    }

    pub fn width(&self) -> u32 {
        (*self.negotiated.read()).map_or(0, |n| n.resolution.width)
    }

    pub fn height(&self) -> u32 {
        (*self.negotiated.read()).map_or(0, |n| n.resolution.height)
    }

    pub fn fps(&self) -> u32 {
        (*self.negotiated.read()).map_or(0, |n| n.fps)
    }
}

impl Default for Capture {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Capture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Negotiate pixel format, geometry, JPEG quality and frame rate.
/// Devices may clamp; the values actually applied are read back.
fn configure_device(device: &Device, params: &StreamParams, path: &Path) -> Result<Negotiated> {
    let caps = device
        .query_caps()
        .map_err(|e| AppError::DeviceUnavailable(format!("QUERYCAP failed: {}", e)))?;
    debug!("Camera: {} ({})", caps.card, caps.driver);
    if !caps
        .capabilities
        .contains(v4l::capability::Flags::VIDEO_CAPTURE)
    {
        return Err(AppError::DeviceUnavailable(format!(
            "{} does not support video capture",
            path.display()
        )));
    }

    // MJPEG streaming wants compressed frames; H.264 wants raw YUV.
    let wanted = match params.codec {
        Codec::Mjpeg => PixelFormat::Mjpeg,
        Codec::H264 => PixelFormat::Yuyv,
    };

    let requested = Format::new(params.width, params.height, wanted.to_fourcc());
    let actual = device
        .set_format(&requested)
        .map_err(|e| AppError::DeviceUnavailable(format!("S_FMT failed: {}", e)))?;

    let pixel_format = PixelFormat::from_fourcc(actual.fourcc);
    match params.codec {
        Codec::Mjpeg if pixel_format != PixelFormat::Mjpeg => {
            return Err(AppError::DeviceUnavailable(format!(
                "device did not accept MJPEG, got {}",
                actual.fourcc
            )));
        }
        Codec::H264 if !pixel_format.is_encodable() => {
            return Err(AppError::DeviceUnavailable(format!(
                "device did not provide raw frames for H264, got {}",
                actual.fourcc
            )));
        }
        _ => {}
    }

    if params.codec == Codec::Mjpeg {
        // Hardware JPEG quality control, best effort.
        let ctrl = Control {
            id: JPEG_QUALITY_CID,
            value: ControlValue::Integer(params.quality as i64),
        };
        match device.set_control(ctrl) {
            Ok(()) => debug!("MJPEG quality set to {}", params.quality),
            Err(e) => debug!("JPEG quality control not applied: {}", e),
        }
    }

    // Frame rate is best effort; read back whatever the driver granted.
    let mut fps = params.fps;
    if params.fps > 0 {
        let _ = device.set_params(&Parameters::with_fps(params.fps));
    }
    if let Ok(applied) = device.params() {
        let interval = applied.interval;
        if interval.numerator > 0 && interval.denominator > 0 {
            let actual_fps = interval.denominator / interval.numerator;
            if actual_fps > 0 {
                fps = actual_fps;
            }
        }
    }

    let resolution = Resolution::new(actual.width, actual.height);
    info!(
        "Capture format negotiated: {} {} fps={}",
        resolution, pixel_format, fps
    );

    Ok(Negotiated {
        resolution,
        fps,
        pixel_format,
    })
}

/// Producer loop: dequeue frames and overwrite the latest-frame slot
/// until stopped or the device errors out.
fn producer_loop(device: Device, shared: Arc<Shared>, negotiated: Negotiated) {
    let mut stream = match MmapStream::with_buffers(&device, BufferType::VideoCapture, BUFFER_COUNT)
    {
        Ok(stream) => stream,
        Err(e) => {
            error!("Failed to map capture buffers: {}", e);
            shared.running.store(false, Ordering::SeqCst);
            return;
        }
    };

    while !shared.stop.load(Ordering::Relaxed) {
        match stream.next() {
            Ok((data, meta)) => {
                let used = (meta.bytesused as usize).min(data.len());
                if used < MIN_FRAME_SIZE {
                    debug!("Dropping undersized frame: {} bytes", used);
                    continue;
                }
                let sequence = shared.sequence.fetch_add(1, Ordering::Relaxed) + 1;
                let frame = VideoFrame::new(
                    Bytes::copy_from_slice(&data[..used]),
                    negotiated.resolution,
                    negotiated.pixel_format,
                    sequence,
                );
                shared.latest.store(Arc::new(Some(frame)));
            }
            Err(e) => {
                error!("Capture read failed: {}", e);
                break;
            }
        }
    }

    shared.running.store(false, Ordering::SeqCst);
    debug!("Capture producer exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_path_resolution() {
        assert_eq!(device_path("video0"), PathBuf::from("/dev/video0"));
        assert_eq!(device_path("/dev/video3"), PathBuf::from("/dev/video3"));
    }

    #[test]
    fn test_unstarted_capture_is_inert() {
        let capture = Capture::new();
        assert!(!capture.running());
        assert!(capture.latest_frame().is_none());
        assert_eq!(capture.pixel_format(), PixelFormat::Unknown);
        // stop() on a never-started capture is a no-op.
        capture.stop();
        assert!(!capture.running());
    }

    #[test]
    fn test_start_missing_device_fails() {
        let capture = Capture::new();
        let err = capture
            .start("video-does-not-exist", &StreamParams::default())
            .unwrap_err();
        assert_eq!(err.kind(), "device_unavailable");
        assert!(!capture.running());
    }
}
