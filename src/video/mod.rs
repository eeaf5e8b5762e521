//! Video capture, conversion and encoding

pub mod annexb;
pub mod capture;
pub mod convert;
pub mod device;
#[cfg(feature = "h264")]
pub mod encoder;
pub mod format;
pub mod frame;

pub use annexb::ParameterSets;
pub use capture::{Capture, Negotiated};
pub use convert::I420Buffer;
#[cfg(feature = "h264")]
pub use encoder::H264Encoder;
pub use format::{PixelFormat, Resolution};
pub use frame::VideoFrame;
