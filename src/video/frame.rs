//! Captured frame container

use bytes::Bytes;
use std::time::Instant;

use super::format::{PixelFormat, Resolution};

/// A single captured frame with metadata
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Raw frame bytes (MJPEG, YUYV or NV12 depending on negotiation)
    data: Bytes,
    /// Frame resolution
    pub resolution: Resolution,
    /// Pixel format
    pub format: PixelFormat,
    /// Producer sequence number
    pub sequence: u64,
    /// Timestamp when the frame was captured
    pub capture_ts: Instant,
}

impl VideoFrame {
    pub fn new(data: Bytes, resolution: Resolution, format: PixelFormat, sequence: u64) -> Self {
        Self {
            data,
            resolution,
            format,
            sequence,
            capture_ts: Instant::now(),
        }
    }

    /// Frame bytes as a slice
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Frame bytes as `Bytes` (cheap clone)
    pub fn data_bytes(&self) -> Bytes {
        self.data.clone()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_accessors() {
        let frame = VideoFrame::new(
            Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xD9]),
            Resolution::VGA,
            PixelFormat::Mjpeg,
            7,
        );
        assert_eq!(frame.len(), 4);
        assert_eq!(frame.sequence, 7);
        assert!(!frame.is_empty());
    }
}
