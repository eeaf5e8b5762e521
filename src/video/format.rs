//! Pixel format and resolution definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use v4l::format::fourcc::FourCC;

/// Pixel formats the capture layer can negotiate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// MJPEG compressed frames (preferred for MJPEG streaming)
    Mjpeg,
    /// YUYV 4:2:2 packed (preferred H.264 encoder input)
    Yuyv,
    /// NV12 semi-planar (Y plane + interleaved UV)
    Nv12,
    /// Anything the device negotiated that we cannot consume
    #[default]
    Unknown,
}

impl PixelFormat {
    /// Convert to a V4L2 FourCC
    pub fn to_fourcc(self) -> FourCC {
        match self {
            PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
            PixelFormat::Yuyv => FourCC::new(b"YUYV"),
            PixelFormat::Nv12 => FourCC::new(b"NV12"),
            PixelFormat::Unknown => FourCC::new(b"\0\0\0\0"),
        }
    }

    /// Map a negotiated V4L2 FourCC back; anything else is `Unknown`
    pub fn from_fourcc(fourcc: FourCC) -> Self {
        match &fourcc.repr {
            b"MJPG" | b"JPEG" => PixelFormat::Mjpeg,
            b"YUYV" => PixelFormat::Yuyv,
            b"NV12" => PixelFormat::Nv12,
            _ => PixelFormat::Unknown,
        }
    }

    /// Check if format is compressed (JPEG frames pass through unencoded)
    pub fn is_compressed(self) -> bool {
        matches!(self, PixelFormat::Mjpeg)
    }

    /// Formats the H.264 pipeline can convert to I420
    pub fn is_encodable(self) -> bool {
        matches!(self, PixelFormat::Yuyv | PixelFormat::Nv12)
    }

    /// Lowercase label used in JSON bodies
    pub fn label(self) -> &'static str {
        match self {
            PixelFormat::Mjpeg => "mjpeg",
            PixelFormat::Yuyv => "yuyv",
            PixelFormat::Nv12 => "nv12",
            PixelFormat::Unknown => "unknown",
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Resolution (width x height)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Total pixels
    pub fn pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Expected I420 frame size (Y + U/4 + V/4)
    pub fn i420_size(&self) -> usize {
        self.pixels() * 3 / 2
    }

    /// Expected YUYV frame size (2 bytes per pixel)
    pub fn yuyv_size(&self) -> usize {
        self.pixels() * 2
    }

    pub const VGA: Resolution = Resolution {
        width: 640,
        height: 480,
    };
    pub const HD720: Resolution = Resolution {
        width: 1280,
        height: 720,
    };
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_round_trip() {
        for format in [PixelFormat::Mjpeg, PixelFormat::Yuyv, PixelFormat::Nv12] {
            assert_eq!(PixelFormat::from_fourcc(format.to_fourcc()), format);
        }
        assert_eq!(
            PixelFormat::from_fourcc(FourCC::new(b"H264")),
            PixelFormat::Unknown
        );
    }

    #[test]
    fn test_buffer_sizes() {
        let res = Resolution::VGA;
        assert_eq!(res.yuyv_size(), 640 * 480 * 2);
        assert_eq!(res.i420_size(), 640 * 480 * 3 / 2);
    }
}
