//! SilkCast - on-demand camera streaming kernel
//!
//! One HTTP GET names a capture device; the server warms it, encodes
//! frames in the requested codec/container, and streams an open-ended
//! response. Clients sharing a device share one capture pipeline; the
//! idle reaper releases the device once the last client has left.

pub mod error;
pub mod mp4;
pub mod session;
pub mod state;
pub mod stream;
pub mod video;
pub mod web;

pub use error::{AppError, Result};
