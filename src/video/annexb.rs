//! Annex-B byte-stream utilities
//!
//! NAL scanning, AVCC length-prefix conversion and SPS/PPS extraction over
//! raw encoder output.

use bytes::Bytes;

/// NAL unit type for an IDR slice
pub const NAL_TYPE_IDR: u8 = 5;
/// NAL unit type for a sequence parameter set
pub const NAL_TYPE_SPS: u8 = 7;
/// NAL unit type for a picture parameter set
pub const NAL_TYPE_PPS: u8 = 8;

/// Cached H.264 parameter sets, extracted from a session's first IDR
#[derive(Debug, Clone)]
pub struct ParameterSets {
    pub sps: Bytes,
    pub pps: Bytes,
}

/// Returns the length of the start code at `pos` (3 or 4), or `None`
fn start_code_len(buf: &[u8], pos: usize) -> Option<usize> {
    let rest = &buf[pos..];
    if rest.len() >= 3 && rest[0] == 0 && rest[1] == 0 {
        if rest[2] == 1 {
            return Some(3);
        }
        if rest.len() >= 4 && rest[2] == 0 && rest[3] == 1 {
            return Some(4);
        }
    }
    None
}

/// Lazy iterator over the `(offset, length)` of each NAL unit in an
/// Annex-B buffer. A NAL starts after its start code and ends at the next
/// start code or end of buffer. Zero-length NALs are yielded as-is; callers
/// decide whether to skip them.
pub struct NalUnits<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for NalUnits<'a> {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<Self::Item> {
        // Find the next start code from the current position.
        while self.pos < self.buf.len() {
            if let Some(sc) = start_code_len(self.buf, self.pos) {
                let start = self.pos + sc;
                let mut end = start;
                while end < self.buf.len() && start_code_len(self.buf, end).is_none() {
                    end += 1;
                }
                self.pos = end;
                return Some((start, end - start));
            }
            self.pos += 1;
        }
        None
    }
}

/// Scan an Annex-B buffer for NAL units
pub fn nal_units(buf: &[u8]) -> NalUnits<'_> {
    NalUnits { buf, pos: 0 }
}

/// NAL unit type from its header byte (low 5 bits)
pub fn nal_type(header: u8) -> u8 {
    header & 0x1F
}

/// Convert an Annex-B NAL stream to a length-prefixed (AVCC) sample.
/// Every NAL is prefixed with its 32-bit big-endian length; zero-length
/// NALs are skipped.
pub fn annexb_to_avcc(annexb: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(annexb.len() + 16);
    for (offset, len) in nal_units(annexb) {
        if len == 0 {
            continue;
        }
        out.extend_from_slice(&(len as u32).to_be_bytes());
        out.extend_from_slice(&annexb[offset..offset + len]);
    }
    out
}

/// Extract the first SPS and PPS from an Annex-B buffer. Scanning stops
/// once both have been seen.
pub fn extract_parameter_sets(annexb: &[u8]) -> Option<ParameterSets> {
    let mut sps: Option<&[u8]> = None;
    let mut pps: Option<&[u8]> = None;
    for (offset, len) in nal_units(annexb) {
        if len == 0 {
            continue;
        }
        let nal = &annexb[offset..offset + len];
        match nal_type(nal[0]) {
            NAL_TYPE_SPS if sps.is_none() => sps = Some(nal),
            NAL_TYPE_PPS if pps.is_none() => pps = Some(nal),
            _ => {}
        }
        if sps.is_some() && pps.is_some() {
            break;
        }
    }
    match (sps, pps) {
        (Some(sps), Some(pps)) => Some(ParameterSets {
            sps: Bytes::copy_from_slice(sps),
            pps: Bytes::copy_from_slice(pps),
        }),
        _ => None,
    }
}

/// Whether the access unit carries an IDR slice. Encoders prefix SPS/PPS
/// to IDR frames, so the whole unit is scanned rather than only the first
/// NAL.
pub fn contains_idr(annexb: &[u8]) -> bool {
    nal_units(annexb)
        .filter(|&(_, len)| len > 0)
        .any(|(offset, _)| nal_type(annexb[offset]) == NAL_TYPE_IDR)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_stream() -> Vec<u8> {
        // SPS (type 7), PPS (type 8) with 3-byte start codes, IDR (type 5)
        // with a 4-byte start code.
        let mut buf = Vec::new();
        buf.extend_from_slice(&[0, 0, 1, 0x67, 0x42, 0xC0, 0x1E]);
        buf.extend_from_slice(&[0, 0, 1, 0x68, 0xCE, 0x3C, 0x80]);
        buf.extend_from_slice(&[0, 0, 0, 1, 0x65, 0x88, 0x84, 0x00, 0x10]);
        buf
    }

    #[test]
    fn test_nal_scan_offsets() {
        let buf = sample_stream();
        let nals: Vec<_> = nal_units(&buf).collect();
        assert_eq!(nals, vec![(3, 4), (10, 4), (18, 5)]);
    }

    #[test]
    fn test_scan_handles_trailing_nal_at_end_of_buffer() {
        let buf = [0u8, 0, 1, 0x41, 0xAA];
        let nals: Vec<_> = nal_units(&buf).collect();
        assert_eq!(nals, vec![(3, 2)]);
    }

    #[test]
    fn test_avcc_lengths() {
        let buf = sample_stream();
        let avcc = annexb_to_avcc(&buf);
        // 3 NALs of length 4, 4 and 5, each with a 4-byte prefix.
        assert_eq!(avcc.len(), (4 + 4) + (4 + 4) + (4 + 5));
        assert_eq!(&avcc[..4], &[0, 0, 0, 4]);
        assert_eq!(avcc[4], 0x67);
    }

    #[test]
    fn test_avcc_skips_empty_nals() {
        // Two adjacent start codes produce a zero-length NAL.
        let buf = [0u8, 0, 1, 0, 0, 1, 0x41, 0x00];
        let avcc = annexb_to_avcc(&buf);
        assert_eq!(avcc, vec![0, 0, 0, 2, 0x41, 0x00]);
    }

    #[test]
    fn test_avcc_normalizes_start_code_lengths() {
        // The same NALs behind 3- and 4-byte start codes produce identical
        // AVCC output.
        let three = [0u8, 0, 1, 0x67, 0x01, 0, 0, 1, 0x68, 0x02];
        let four = [0u8, 0, 0, 1, 0x67, 0x01, 0, 0, 0, 1, 0x68, 0x02];
        assert_eq!(annexb_to_avcc(&three), annexb_to_avcc(&four));
    }

    #[test]
    fn test_extract_parameter_sets() {
        let buf = sample_stream();
        let ps = extract_parameter_sets(&buf).expect("both present");
        assert_eq!(ps.sps.as_ref(), &[0x67, 0x42, 0xC0, 0x1E]);
        assert_eq!(ps.pps.as_ref(), &[0x68, 0xCE, 0x3C, 0x80]);
    }

    #[test]
    fn test_extract_requires_both() {
        let sps_only = [0u8, 0, 1, 0x67, 0x42];
        assert!(extract_parameter_sets(&sps_only).is_none());
    }

    #[test]
    fn test_contains_idr() {
        assert!(contains_idr(&sample_stream()));
        let p_frame = [0u8, 0, 0, 1, 0x41, 0x9A];
        assert!(!contains_idr(&p_frame));
    }
}
