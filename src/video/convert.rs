//! Software pixel format conversion to planar I420
//!
//! YUYV (from V4L2 capture) and NV12 to the YUV420P layout the H.264
//! encoder consumes. Inputs with odd geometry or mismatched lengths are
//! rejected; the functions are otherwise total.

use crate::error::{AppError, Result};
use crate::video::format::{PixelFormat, Resolution};
use crate::video::frame::VideoFrame;

/// I420 buffer with contiguous Y, U, V planes (reused across conversions)
pub struct I420Buffer {
    data: Vec<u8>,
    width: u32,
    height: u32,
    u_offset: usize,
    v_offset: usize,
}

impl I420Buffer {
    pub fn new(resolution: Resolution) -> Self {
        let y_size = resolution.pixels();
        let uv_size = y_size / 4;
        Self {
            data: vec![0u8; y_size + 2 * uv_size],
            width: resolution.width,
            height: resolution.height,
            u_offset: y_size,
            v_offset: y_size + uv_size,
        }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    pub fn y_plane(&self) -> &[u8] {
        &self.data[..self.u_offset]
    }

    pub fn u_plane(&self) -> &[u8] {
        &self.data[self.u_offset..self.v_offset]
    }

    pub fn v_plane(&self) -> &[u8] {
        &self.data[self.v_offset..]
    }

    /// Mutable (y, u, v) plane views
    pub fn planes_mut(&mut self) -> (&mut [u8], &mut [u8], &mut [u8]) {
        let (y, uv) = self.data.split_at_mut(self.u_offset);
        let (u, v) = uv.split_at_mut(self.v_offset - self.u_offset);
        (y, u, v)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

fn check_geometry(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
        return Err(AppError::Video(format!(
            "converter requires even non-zero geometry, got {}x{}",
            width, height
        )));
    }
    Ok(())
}

/// Convert a packed YUYV 4:2:2 frame to planar I420.
///
/// For each 2x2 block the U sample is the average of the two row U bytes
/// (offset +1 within the pair) and V the average of the two row V bytes
/// (offset +3).
pub fn yuyv_to_i420(src: &[u8], width: u32, height: u32, dst: &mut I420Buffer) -> Result<()> {
    check_geometry(width, height)?;
    let w = width as usize;
    let h = height as usize;
    if src.len() < w * h * 2 {
        return Err(AppError::Video(format!(
            "YUYV frame too small: {} < {}",
            src.len(),
            w * h * 2
        )));
    }
    if dst.width != width || dst.height != height {
        return Err(AppError::Video(format!(
            "I420 buffer is {}x{}, frame is {}x{}",
            dst.width, dst.height, width, height
        )));
    }

    let uv_width = w / 2;
    let (y_plane, u_plane, v_plane) = dst.planes_mut();

    for row in (0..h).step_by(2) {
        let row0 = &src[row * w * 2..(row + 1) * w * 2];
        let row1 = &src[(row + 1) * w * 2..(row + 2) * w * 2];
        let uv_row = (row / 2) * uv_width;

        for col in (0..w).step_by(2) {
            let p = col * 2;
            y_plane[row * w + col] = row0[p];
            y_plane[row * w + col + 1] = row0[p + 2];
            y_plane[(row + 1) * w + col] = row1[p];
            y_plane[(row + 1) * w + col + 1] = row1[p + 2];

            let u = (row0[p + 1] as u16 + row1[p + 1] as u16) / 2;
            let v = (row0[p + 3] as u16 + row1[p + 3] as u16) / 2;
            u_plane[uv_row + col / 2] = u as u8;
            v_plane[uv_row + col / 2] = v as u8;
        }
    }
    Ok(())
}

/// De-interleave an NV12 frame (Y plane + interleaved UV plane) into
/// planar I420, honoring independent source strides.
#[allow(clippy::too_many_arguments)]
pub fn nv12_to_i420(
    src_y: &[u8],
    src_uv: &[u8],
    width: u32,
    height: u32,
    stride_y: u32,
    stride_uv: u32,
    dst: &mut I420Buffer,
) -> Result<()> {
    check_geometry(width, height)?;
    let w = width as usize;
    let h = height as usize;
    let sy = stride_y as usize;
    let suv = stride_uv as usize;
    if sy < w || suv < w {
        return Err(AppError::Video(format!(
            "NV12 strides ({}, {}) below width {}",
            sy, suv, w
        )));
    }
    if src_y.len() < sy * (h - 1) + w || src_uv.len() < suv * (h / 2 - 1) + w {
        return Err(AppError::Video("NV12 planes too small".to_string()));
    }
    if dst.width != width || dst.height != height {
        return Err(AppError::Video(format!(
            "I420 buffer is {}x{}, frame is {}x{}",
            dst.width, dst.height, width, height
        )));
    }

    let uv_width = w / 2;
    let (y_plane, u_plane, v_plane) = dst.planes_mut();

    for row in 0..h {
        y_plane[row * w..(row + 1) * w].copy_from_slice(&src_y[row * sy..row * sy + w]);
    }
    for row in 0..h / 2 {
        let uv = &src_uv[row * suv..row * suv + w];
        let u_row = &mut u_plane[row * uv_width..(row + 1) * uv_width];
        let v_row = &mut v_plane[row * uv_width..(row + 1) * uv_width];
        for col in 0..uv_width {
            u_row[col] = uv[2 * col];
            v_row[col] = uv[2 * col + 1];
        }
    }
    Ok(())
}

/// Convert a captured YUYV or NV12 frame into the destination I420
/// buffer, whose geometry is the session's negotiated one. NV12 frames
/// from the capture are contiguous with both strides equal to the width.
pub fn frame_to_i420(frame: &VideoFrame, dst: &mut I420Buffer) -> Result<()> {
    let res = dst.resolution();
    match frame.format {
        PixelFormat::Yuyv => yuyv_to_i420(frame.data(), res.width, res.height, dst),
        PixelFormat::Nv12 => {
            let y_size = res.pixels();
            let data = frame.data();
            if data.len() < y_size {
                return Err(AppError::Video(format!(
                    "NV12 frame too small: {} < {}",
                    data.len(),
                    y_size
                )));
            }
            let (y, uv) = data.split_at(y_size);
            nv12_to_i420(y, uv, res.width, res.height, res.width, res.width, dst)
        }
        other => Err(AppError::Video(format!("cannot convert {} to I420", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i420_buffer_layout() {
        let buf = I420Buffer::new(Resolution::new(4, 4));
        assert_eq!(buf.len(), 24);
        assert_eq!(buf.y_plane().len(), 16);
        assert_eq!(buf.u_plane().len(), 4);
        assert_eq!(buf.v_plane().len(), 4);
    }

    #[test]
    fn test_yuyv_known_pattern() {
        // 2x2 frame, one chroma sample. Layout per row: Y0 U Y1 V.
        let src = [
            10, 100, 20, 200, // row 0
            30, 120, 40, 220, // row 1
        ];
        let mut dst = I420Buffer::new(Resolution::new(2, 2));
        yuyv_to_i420(&src, 2, 2, &mut dst).unwrap();
        assert_eq!(dst.y_plane(), &[10, 20, 30, 40]);
        // U = avg(100, 120), V = avg(200, 220)
        assert_eq!(dst.u_plane(), &[110]);
        assert_eq!(dst.v_plane(), &[210]);
    }

    #[test]
    fn test_yuyv_rejects_odd_geometry() {
        let mut dst = I420Buffer::new(Resolution::new(2, 2));
        assert!(yuyv_to_i420(&[0; 6], 3, 1, &mut dst).is_err());
    }

    #[test]
    fn test_yuyv_rejects_short_input() {
        let mut dst = I420Buffer::new(Resolution::new(4, 4));
        assert!(yuyv_to_i420(&[0; 8], 4, 4, &mut dst).is_err());
    }

    #[test]
    fn test_nv12_deinterleave() {
        // 2x2 frame with stride == width.
        let y = [1, 2, 3, 4];
        let uv = [50, 60];
        let mut dst = I420Buffer::new(Resolution::new(2, 2));
        nv12_to_i420(&y, &uv, 2, 2, 2, 2, &mut dst).unwrap();
        assert_eq!(dst.y_plane(), &[1, 2, 3, 4]);
        assert_eq!(dst.u_plane(), &[50]);
        assert_eq!(dst.v_plane(), &[60]);
    }

    #[test]
    fn test_nv12_honors_strides() {
        // 2x2 frame with stride 4 (2 bytes padding per row).
        let y = [1, 2, 0, 0, 3, 4, 0, 0];
        let uv = [50, 60, 0, 0];
        let mut dst = I420Buffer::new(Resolution::new(2, 2));
        nv12_to_i420(&y[..6], &uv[..2], 2, 2, 4, 4, &mut dst).unwrap();
        assert_eq!(dst.y_plane(), &[1, 2, 3, 4]);
        assert_eq!(dst.u_plane(), &[50]);
        assert_eq!(dst.v_plane(), &[60]);
    }
}
