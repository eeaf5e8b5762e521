//! Stream responders and their shared plumbing
//!
//! Each responder is a blocking loop that reads the session's capture,
//! optionally encodes, and writes into a chunked-response sink until the
//! client disconnects or the capture stops.

#[cfg(feature = "h264")]
pub mod fmp4;
#[cfg(feature = "h264")]
pub mod h264;
pub mod mjpeg;
pub mod params;
pub mod sink;
pub mod udp;

pub use params::{Codec, Container, LatencyTier, StreamParams, StreamQuery};
pub use sink::{sink_body, StreamSink};
