//! Stream parameter parsing and the first-comer parameter lock payload

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{AppError, Result};

/// Requested codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Mjpeg,
    H264,
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Codec::Mjpeg => write!(f, "mjpeg"),
            Codec::H264 => write!(f, "h264"),
        }
    }
}

impl FromStr for Codec {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mjpeg" => Ok(Codec::Mjpeg),
            "h264" => Ok(Codec::H264),
            other => Err(AppError::BadRequest(format!("unsupported codec: {}", other))),
        }
    }
}

/// Container for H.264 output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    #[default]
    Raw,
    Mp4,
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Container::Raw => write!(f, "raw"),
            Container::Mp4 => write!(f, "mp4"),
        }
    }
}

impl FromStr for Container {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "raw" => Ok(Container::Raw),
            "mp4" => Ok(Container::Mp4),
            other => Err(AppError::BadRequest(format!(
                "unsupported container: {}",
                other
            ))),
        }
    }
}

/// Latency preset tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LatencyTier {
    #[default]
    View,
    Low,
    Ultra,
}

impl fmt::Display for LatencyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LatencyTier::View => write!(f, "view"),
            LatencyTier::Low => write!(f, "low"),
            LatencyTier::Ultra => write!(f, "ultra"),
        }
    }
}

/// Capture parameters established by the first successful requester
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamParams {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate_kbps: u32,
    /// MJPEG quality, 1-100
    pub quality: u32,
    pub gop: u32,
    pub codec: Codec,
    pub latency: LatencyTier,
    pub container: Container,
}

impl Default for StreamParams {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 15,
            bitrate_kbps: 256,
            quality: 80,
            gop: 30,
            codec: Codec::Mjpeg,
            latency: LatencyTier::View,
            container: Container::Raw,
        }
    }
}

impl StreamParams {
    pub fn resolution(&self) -> crate::video::format::Resolution {
        crate::video::format::Resolution::new(self.width, self.height)
    }

    /// Responder cadence between emissions
    pub fn frame_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(1000u64.checked_div(self.fps as u64).unwrap_or(0).max(1))
    }

    /// `Effective-Params` response header value
    pub fn effective_header(&self) -> String {
        format!(
            "codec={};w={};h={};fps={};bitrate={};quality={};gop={};latency={};container={}",
            self.codec,
            self.width,
            self.height,
            self.fps,
            self.bitrate_kbps,
            self.quality,
            self.gop,
            self.latency,
            self.container
        )
    }
}

/// Raw query parameters of `/stream/live/{device}` and `/stream/udp/{device}`.
/// Everything arrives as a string so malformed values surface as JSON
/// `bad_request` bodies instead of the framework's plain-text rejection.
#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    pub w: Option<String>,
    pub h: Option<String>,
    pub fps: Option<String>,
    pub bitrate: Option<String>,
    pub quality: Option<String>,
    pub gop: Option<String>,
    pub codec: Option<String>,
    pub latency: Option<String>,
    pub container: Option<String>,
    // UDP sender only
    pub target: Option<String>,
    pub port: Option<String>,
    pub duration: Option<String>,
}

/// Parse an optional numeric query value
pub(crate) fn parse_num<T: FromStr>(name: &str, value: &Option<String>) -> Result<Option<T>> {
    match value {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| AppError::BadRequest(format!("invalid {}: {}", name, raw))),
    }
}

impl StreamQuery {
    /// Resolve the query against defaults and apply the latency preset
    pub fn into_params(self, default_codec: Codec) -> Result<StreamParams> {
        let mut params = StreamParams {
            codec: default_codec,
            ..StreamParams::default()
        };

        if let Some(w) = parse_num::<u32>("w", &self.w)? {
            params.width = w;
        }
        if let Some(h) = parse_num::<u32>("h", &self.h)? {
            params.height = h;
        }
        if let Some(fps) = parse_num::<u32>("fps", &self.fps)? {
            params.fps = fps;
        }
        if let Some(bitrate) = parse_num::<u32>("bitrate", &self.bitrate)? {
            params.bitrate_kbps = bitrate;
        }
        if let Some(quality) = parse_num::<u32>("quality", &self.quality)? {
            if !(1..=100).contains(&quality) {
                return Err(AppError::BadRequest(format!(
                    "quality must be 1-100, got {}",
                    quality
                )));
            }
            params.quality = quality;
        }
        if let Some(gop) = parse_num::<u32>("gop", &self.gop)? {
            params.gop = gop;
        }
        if let Some(ref codec) = self.codec {
            params.codec = codec.parse()?;
        }
        if let Some(ref container) = self.container {
            params.container = container.parse()?;
        }

        match self.latency.as_deref() {
            None => {}
            // The zerolatency preset rewrites codec, container, GOP and
            // bitrate floor in one shot.
            Some("zerolatency") => {
                if self.codec.is_none() || params.codec == Codec::Mjpeg {
                    params.codec = Codec::H264;
                }
                params.container = Container::Raw;
                params.gop = 1;
                params.bitrate_kbps = params.bitrate_kbps.max(512);
                params.latency = LatencyTier::Ultra;
            }
            Some("view") => params.latency = LatencyTier::View,
            Some("low") => params.latency = LatencyTier::Low,
            Some("ultra") => params.latency = LatencyTier::Ultra,
            Some(other) => {
                return Err(AppError::BadRequest(format!(
                    "unsupported latency tier: {}",
                    other
                )));
            }
        }

        if params.width == 0 || params.height == 0 {
            return Err(AppError::BadRequest(format!(
                "invalid geometry {}x{}",
                params.width, params.height
            )));
        }

        Ok(params)
    }
}
