//! V4L2 device enumeration and capability queries

use serde::Serialize;
use std::path::PathBuf;
use tracing::debug;
use v4l::prelude::*;
use v4l::video::Capture as CaptureTrait;
use v4l::FourCC;

use crate::error::{AppError, Result};
use crate::video::capture::device_path;

/// Capability report for one device, as returned by `/device/{id}/caps`
#[derive(Debug, Clone, Serialize)]
pub struct DeviceCaps {
    pub device: String,
    pub card: String,
    pub driver: String,
    pub bus_info: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<CurrentFormat>,
    pub formats: Vec<FormatCaps>,
}

/// The format currently applied on the device
#[derive(Debug, Clone, Serialize)]
pub struct CurrentFormat {
    pub width: u32,
    pub height: u32,
    pub fourcc: String,
}

/// One enumerated pixel format and its frame sizes
#[derive(Debug, Clone, Serialize)]
pub struct FormatCaps {
    pub fourcc: String,
    pub description: String,
    pub sizes: Vec<FrameSizeCaps>,
}

/// One frame size and the rates the device offers for it
#[derive(Debug, Clone, Serialize)]
pub struct FrameSizeCaps {
    pub width: u32,
    pub height: u32,
    pub fps: Vec<u32>,
}

fn fourcc_string(fourcc: FourCC) -> String {
    String::from_utf8_lossy(&fourcc.repr).into_owned()
}

/// Whether a device node reports the video-capture capability
fn is_capture_device(path: &PathBuf) -> bool {
    let Ok(device) = Device::with_path(path) else {
        return false;
    };
    match device.query_caps() {
        Ok(caps) => caps
            .capabilities
            .contains(v4l::capability::Flags::VIDEO_CAPTURE),
        Err(_) => false,
    }
}

/// Enumerate `/dev/video*` nodes that can capture. Always returns at
/// least `"video0"` as a fallback hint; results are sorted.
pub fn list_devices() -> Vec<String> {
    let mut devices = Vec::new();

    if let Ok(entries) = std::fs::read_dir("/dev") {
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.starts_with("video") {
                continue;
            }
            if is_capture_device(&path) {
                devices.push(name.to_string());
            } else {
                debug!("Skipping non-capture node {}", path.display());
            }
        }
    }

    if devices.is_empty() {
        devices.push("video0".to_string());
    }
    devices.sort();
    devices
}

/// Query a device's full capability tree: identity, current format, and
/// every format/frame-size/frame-interval combination it advertises.
pub fn query_caps(device_id: &str) -> Result<DeviceCaps> {
    let path = device_path(device_id);
    let device = Device::with_path(&path).map_err(|e| {
        AppError::DeviceUnavailable(format!("failed to open {}: {}", path.display(), e))
    })?;

    let caps = device
        .query_caps()
        .map_err(|e| AppError::DeviceUnavailable(format!("QUERYCAP failed: {}", e)))?;
    if !caps
        .capabilities
        .contains(v4l::capability::Flags::VIDEO_CAPTURE)
    {
        return Err(AppError::DeviceUnavailable(format!(
            "{} does not support video capture",
            path.display()
        )));
    }

    let current = device.format().ok().map(|fmt| CurrentFormat {
        width: fmt.width,
        height: fmt.height,
        fourcc: fourcc_string(fmt.fourcc),
    });

    let mut formats = Vec::new();
    for desc in device.enum_formats().unwrap_or_default() {
        let mut sizes = Vec::new();
        for size in device.enum_framesizes(desc.fourcc).unwrap_or_default() {
            match size.size {
                v4l::framesize::FrameSizeEnum::Discrete(d) => {
                    sizes.push(FrameSizeCaps {
                        width: d.width,
                        height: d.height,
                        fps: frame_rates(&device, desc.fourcc, d.width, d.height),
                    });
                }
                v4l::framesize::FrameSizeEnum::Stepwise(s) => {
                    // Report the bounds of a stepwise range.
                    for (w, h) in [(s.min_width, s.min_height), (s.max_width, s.max_height)] {
                        sizes.push(FrameSizeCaps {
                            width: w,
                            height: h,
                            fps: frame_rates(&device, desc.fourcc, w, h),
                        });
                    }
                }
            }
        }
        formats.push(FormatCaps {
            fourcc: fourcc_string(desc.fourcc),
            description: desc.description.clone(),
            sizes,
        });
    }

    Ok(DeviceCaps {
        device: device_id.to_string(),
        card: caps.card.clone(),
        driver: caps.driver.clone(),
        bus_info: caps.bus.clone(),
        current,
        formats,
    })
}

fn frame_rates(device: &Device, fourcc: FourCC, width: u32, height: u32) -> Vec<u32> {
    let mut rates = Vec::new();
    for interval in device
        .enum_frameintervals(fourcc, width, height)
        .unwrap_or_default()
    {
        match interval.interval {
            v4l::frameinterval::FrameIntervalEnum::Discrete(fraction) => {
                if fraction.numerator > 0 {
                    rates.push(fraction.denominator / fraction.numerator);
                }
            }
            v4l::frameinterval::FrameIntervalEnum::Stepwise(step) => {
                if step.max.numerator > 0 && step.min.numerator > 0 {
                    rates.push(step.max.denominator / step.max.numerator);
                    rates.push(step.min.denominator / step.min.numerator);
                }
            }
        }
    }
    rates.sort_unstable_by(|a, b| b.cmp(a));
    rates.dedup();
    rates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_devices_never_empty_and_sorted() {
        let devices = list_devices();
        assert!(!devices.is_empty());
        let mut sorted = devices.clone();
        sorted.sort();
        assert_eq!(devices, sorted);
    }

    #[test]
    fn test_caps_for_missing_device() {
        let err = query_caps("video-does-not-exist").unwrap_err();
        assert_eq!(err.kind(), "device_unavailable");
    }
}
