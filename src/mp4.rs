//! Fragmented MP4 (fMP4) muxing
//!
//! Stateless builder for a single H.264 video track: one `ftyp`+`moov`
//! init segment, then one `moof`+`mdat` pair per encoded sample. All box
//! sizes are 32-bit; per-fragment payloads stay far below 4 GiB.

use bytes::{BufMut, Bytes, BytesMut};

use crate::video::annexb::ParameterSets;

const TIMESCALE: u32 = 90_000;
const TRACK_ID: u32 = 1;

/// `trun` first-sample flags: sync sample
const SAMPLE_FLAGS_SYNC: u32 = 0x0200_0000;
/// `trun` first-sample flags: non-sync, depended-on
const SAMPLE_FLAGS_NON_SYNC: u32 = 0x0101_0000;

/// Sample duration in 90 kHz ticks for a nominal fps (6000 when fps == 0)
pub fn sample_duration(fps: u32) -> u32 {
    if fps > 0 {
        TIMESCALE / fps
    } else {
        6000
    }
}

fn put_box(out: &mut BytesMut, fourcc: &[u8; 4], payload: &[u8]) {
    out.put_u32(payload.len() as u32 + 8);
    out.put_slice(fourcc);
    out.put_slice(payload);
}

fn put_full_box_header(out: &mut BytesMut, version: u8, flags: u32) {
    out.put_u8(version);
    out.put_u8((flags >> 16) as u8);
    out.put_u8((flags >> 8) as u8);
    out.put_u8(flags as u8);
}

const UNITY_MATRIX: [u32; 9] = [
    0x0001_0000, 0, 0, //
    0, 0x0001_0000, 0, //
    0, 0, 0x4000_0000,
];

/// Per-session fMP4 builder
pub struct Mp4Fragmenter {
    width: u32,
    height: u32,
    sps: Bytes,
    pps: Bytes,
}

impl Mp4Fragmenter {
    pub fn new(width: u32, height: u32, parameter_sets: &ParameterSets) -> Self {
        Self {
            width,
            height,
            sps: parameter_sets.sps.clone(),
            pps: parameter_sets.pps.clone(),
        }
    }

    /// Build the `ftyp` + `moov` init segment
    pub fn init_segment(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(1024);

        // ftyp
        {
            let mut p = BytesMut::new();
            p.put_slice(b"isom");
            p.put_u32(0x0000_0200);
            p.put_slice(b"isom");
            p.put_slice(b"iso6");
            p.put_slice(b"avc1");
            put_box(&mut out, b"ftyp", &p);
        }

        let mut moov = BytesMut::new();

        // mvhd
        {
            let mut p = BytesMut::new();
            put_full_box_header(&mut p, 0, 0);
            p.put_u32(0); // creation time
            p.put_u32(0); // modification time
            p.put_u32(TIMESCALE);
            p.put_u32(TIMESCALE * 60); // duration placeholder
            p.put_u32(0x0001_0000); // rate 1.0
            p.put_u16(0x0100); // volume 1.0
            p.put_bytes(0, 10); // reserved
            for m in UNITY_MATRIX {
                p.put_u32(m);
            }
            p.put_bytes(0, 24); // pre_defined
            p.put_u32(TRACK_ID + 1); // next track id
            put_box(&mut moov, b"mvhd", &p);
        }

        let mut trak = BytesMut::new();

        // tkhd: enabled, in movie, in preview
        {
            let mut p = BytesMut::new();
            put_full_box_header(&mut p, 0, 0x000007);
            p.put_u32(0); // creation time
            p.put_u32(0); // modification time
            p.put_u32(TRACK_ID);
            p.put_u32(0); // reserved
            p.put_u32(TIMESCALE * 60); // duration placeholder
            p.put_u64(0); // reserved
            p.put_u16(0); // layer
            p.put_u16(0); // alternate group
            p.put_u16(0); // volume (video)
            p.put_u16(0);
            for m in UNITY_MATRIX {
                p.put_u32(m);
            }
            p.put_u32(self.width << 16); // 16.16 fixed
            p.put_u32(self.height << 16);
            put_box(&mut trak, b"tkhd", &p);
        }

        let mut mdia = BytesMut::new();

        // mdhd
        {
            let mut p = BytesMut::new();
            put_full_box_header(&mut p, 0, 0);
            p.put_u32(0);
            p.put_u32(0);
            p.put_u32(TIMESCALE);
            p.put_u32(TIMESCALE * 60);
            p.put_u16(0x55C4); // language "und"
            p.put_u16(0);
            put_box(&mut mdia, b"mdhd", &p);
        }

        // hdlr
        {
            let mut p = BytesMut::new();
            put_full_box_header(&mut p, 0, 0);
            p.put_u32(0);
            p.put_slice(b"vide");
            p.put_bytes(0, 12);
            p.put_slice(b"video\0");
            put_box(&mut mdia, b"hdlr", &p);
        }

        let mut minf = BytesMut::new();

        // vmhd
        {
            let mut p = BytesMut::new();
            put_full_box_header(&mut p, 0, 0x000001);
            p.put_bytes(0, 8); // graphics mode + opcolor
            put_box(&mut minf, b"vmhd", &p);
        }

        // dinf -> dref -> url (self-contained)
        {
            let mut url = BytesMut::new();
            put_full_box_header(&mut url, 0, 0x000001);
            let mut url_box = BytesMut::new();
            put_box(&mut url_box, b"url ", &url);

            let mut dref = BytesMut::new();
            put_full_box_header(&mut dref, 0, 0);
            dref.put_u32(1);
            dref.put_slice(&url_box);

            let mut dinf = BytesMut::new();
            put_box(&mut dinf, b"dref", &dref);
            put_box(&mut minf, b"dinf", &dinf);
        }

        let mut stbl = BytesMut::new();

        // stsd -> avc1 -> avcC
        {
            let mut avc1 = BytesMut::new();
            avc1.put_bytes(0, 6); // reserved
            avc1.put_u16(1); // data reference index
            avc1.put_bytes(0, 16); // pre_defined + reserved
            avc1.put_u16(self.width as u16);
            avc1.put_u16(self.height as u16);
            avc1.put_u32(0x0048_0000); // 72 dpi horizontal
            avc1.put_u32(0x0048_0000); // 72 dpi vertical
            avc1.put_u32(0); // reserved
            avc1.put_u16(1); // frame count
            avc1.put_bytes(0, 32); // compressor name
            avc1.put_u16(0x0018); // depth
            avc1.put_u16(0xFFFF); // pre_defined

            let mut avcc = BytesMut::new();
            avcc.put_u8(1); // configuration version
            let (profile, compat, level) = if self.sps.len() >= 4 {
                (self.sps[1], self.sps[2], self.sps[3])
            } else {
                (0, 0, 0)
            };
            avcc.put_u8(profile);
            avcc.put_u8(compat);
            avcc.put_u8(level);
            avcc.put_u8(0xFF); // lengthSizeMinusOne = 3
            avcc.put_u8(0xE1); // one SPS
            avcc.put_u16(self.sps.len() as u16);
            avcc.put_slice(&self.sps);
            avcc.put_u8(1); // one PPS
            avcc.put_u16(self.pps.len() as u16);
            avcc.put_slice(&self.pps);
            put_box(&mut avc1, b"avcC", &avcc);

            let mut avc1_box = BytesMut::new();
            put_box(&mut avc1_box, b"avc1", &avc1);

            let mut stsd = BytesMut::new();
            put_full_box_header(&mut stsd, 0, 0);
            stsd.put_u32(1);
            stsd.put_slice(&avc1_box);
            put_box(&mut stbl, b"stsd", &stsd);
        }

        // Empty sample tables; fragments carry the real sample data.
        for fourcc in [b"stts", b"stsc"] {
            let mut p = BytesMut::new();
            put_full_box_header(&mut p, 0, 0);
            p.put_u32(0);
            put_box(&mut stbl, fourcc, &p);
        }
        {
            let mut p = BytesMut::new();
            put_full_box_header(&mut p, 0, 0);
            p.put_u32(0); // sample size
            p.put_u32(0); // sample count
            put_box(&mut stbl, b"stsz", &p);
        }
        {
            let mut p = BytesMut::new();
            put_full_box_header(&mut p, 0, 0);
            p.put_u32(0);
            put_box(&mut stbl, b"stco", &p);
        }

        put_box(&mut minf, b"stbl", &stbl);
        put_box(&mut mdia, b"minf", &minf);
        put_box(&mut trak, b"mdia", &mdia);
        put_box(&mut moov, b"trak", &trak);

        // mvex -> trex
        {
            let mut trex = BytesMut::new();
            put_full_box_header(&mut trex, 0, 0);
            trex.put_u32(TRACK_ID);
            trex.put_u32(1); // default sample description index
            trex.put_u32(0); // default duration
            trex.put_u32(0); // default size
            trex.put_u32(0x0100_0000); // default flags
            let mut mvex = BytesMut::new();
            put_box(&mut mvex, b"trex", &trex);
            put_box(&mut moov, b"mvex", &mvex);
        }

        put_box(&mut out, b"moov", &moov);
        out.freeze()
    }

    /// Build one `moof` + `mdat` pair for a single AVCC sample
    pub fn fragment(
        &self,
        avcc_sample: &[u8],
        sequence: u32,
        base_decode_time: u64,
        sample_duration: u32,
        keyframe: bool,
    ) -> Bytes {
        let mut mfhd = BytesMut::new();
        {
            let mut p = BytesMut::new();
            put_full_box_header(&mut p, 0, 0);
            p.put_u32(sequence);
            put_box(&mut mfhd, b"mfhd", &p);
        }

        let mut tfhd = BytesMut::new();
        {
            let mut p = BytesMut::new();
            put_full_box_header(&mut p, 0, 0x020000); // default-base-is-moof
            p.put_u32(TRACK_ID);
            put_box(&mut tfhd, b"tfhd", &p);
        }

        let mut tfdt = BytesMut::new();
        {
            let mut p = BytesMut::new();
            put_full_box_header(&mut p, 0, 0);
            p.put_u32(base_decode_time as u32);
            put_box(&mut tfdt, b"tfdt", &p);
        }

        // The trun data offset points at the first byte of the mdat
        // payload, so the moof size must be known before building it.
        let trun_size = 8 + 4 + 4 * 5;
        let traf_size = 8 + tfhd.len() + tfdt.len() + trun_size;
        let moof_size = 8 + mfhd.len() + traf_size;
        let data_offset = (moof_size + 8) as u32;

        let mut trun = BytesMut::new();
        {
            let mut p = BytesMut::new();
            // data-offset, first-sample-flags, duration, size present
            put_full_box_header(&mut p, 0, 0x000701);
            p.put_u32(1); // sample count
            p.put_u32(data_offset);
            p.put_u32(sample_duration);
            p.put_u32(avcc_sample.len() as u32);
            p.put_u32(if keyframe {
                SAMPLE_FLAGS_SYNC
            } else {
                SAMPLE_FLAGS_NON_SYNC
            });
            put_box(&mut trun, b"trun", &p);
        }

        let mut traf = BytesMut::new();
        traf.put_slice(&tfhd);
        traf.put_slice(&tfdt);
        traf.put_slice(&trun);

        let mut moof_payload = BytesMut::new();
        moof_payload.put_slice(&mfhd);
        put_box(&mut moof_payload, b"traf", &traf);

        let mut out = BytesMut::with_capacity(moof_size + 8 + avcc_sample.len());
        put_box(&mut out, b"moof", &moof_payload);
        debug_assert_eq!(out.len(), moof_size);

        out.put_u32(avcc_sample.len() as u32 + 8);
        out.put_slice(b"mdat");
        out.put_slice(avcc_sample);
        out.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_parameter_sets() -> ParameterSets {
        ParameterSets {
            sps: Bytes::from_static(&[0x67, 0x42, 0xC0, 0x1E, 0xAB]),
            pps: Bytes::from_static(&[0x68, 0xCE, 0x3C, 0x80]),
        }
    }

    fn read_u32(buf: &[u8], at: usize) -> u32 {
        u32::from_be_bytes(buf[at..at + 4].try_into().unwrap())
    }

    #[test]
    fn test_init_segment_starts_with_ftyp_then_moov() {
        let mux = Mp4Fragmenter::new(640, 480, &test_parameter_sets());
        let init = mux.init_segment();
        assert_eq!(&init[4..8], b"ftyp");
        assert_eq!(&init[8..12], b"isom");
        let ftyp_size = read_u32(&init, 0) as usize;
        assert_eq!(&init[ftyp_size + 4..ftyp_size + 8], b"moov");
        // The moov box spans the rest of the segment.
        let moov_size = read_u32(&init, ftyp_size) as usize;
        assert_eq!(ftyp_size + moov_size, init.len());
    }

    #[test]
    fn test_avcc_carries_profile_and_parameter_sets() {
        let ps = test_parameter_sets();
        let mux = Mp4Fragmenter::new(640, 480, &ps);
        let init = mux.init_segment();
        let needle = b"avcC";
        let pos = init
            .windows(4)
            .position(|w| w == needle)
            .expect("avcC present");
        let avcc = &init[pos + 4..];
        assert_eq!(avcc[0], 1); // configuration version
        assert_eq!(avcc[1], ps.sps[1]); // profile
        assert_eq!(avcc[2], ps.sps[2]); // compat
        assert_eq!(avcc[3], ps.sps[3]); // level
        assert_eq!(avcc[4], 0xFF); // lengthSizeMinusOne = 3
        assert_eq!(avcc[5], 0xE1); // one SPS
        let sps_len = u16::from_be_bytes([avcc[6], avcc[7]]) as usize;
        assert_eq!(sps_len, ps.sps.len());
        assert_eq!(&avcc[8..8 + sps_len], ps.sps.as_ref());
    }

    #[test]
    fn test_fragment_data_offset_hits_mdat_payload() {
        let mux = Mp4Fragmenter::new(640, 480, &test_parameter_sets());
        let sample = [0u8, 0, 0, 2, 0x65, 0x88];
        let frag = mux.fragment(&sample, 1, 0, 3000, true);

        let moof_size = read_u32(&frag, 0) as usize;
        assert_eq!(&frag[4..8], b"moof");
        assert_eq!(&frag[moof_size + 4..moof_size + 8], b"mdat");

        // Locate trun inside the fragment and check its data offset.
        let pos = frag
            .windows(4)
            .position(|w| w == b"trun")
            .expect("trun present");
        let trun_payload = pos + 4;
        let data_offset = read_u32(&frag, trun_payload + 8) as usize;
        assert_eq!(data_offset, moof_size + 8);
        // The offset lands on the first mdat payload byte.
        assert_eq!(&frag[data_offset..data_offset + sample.len()], &sample);
    }

    #[test]
    fn test_fragment_sample_flags() {
        let mux = Mp4Fragmenter::new(640, 480, &test_parameter_sets());
        let sample = [0u8; 4];

        let key = mux.fragment(&sample, 1, 0, 3000, true);
        let pos = key.windows(4).position(|w| w == b"trun").unwrap() + 4;
        assert_eq!(read_u32(&key, pos + 20), SAMPLE_FLAGS_SYNC);

        let delta = mux.fragment(&sample, 2, 3000, 3000, false);
        let pos = delta.windows(4).position(|w| w == b"trun").unwrap() + 4;
        assert_eq!(read_u32(&delta, pos + 20), SAMPLE_FLAGS_NON_SYNC);
    }

    #[test]
    fn test_fragment_carries_sequence_and_decode_time() {
        let mux = Mp4Fragmenter::new(640, 480, &test_parameter_sets());
        let frag = mux.fragment(&[1, 2, 3], 42, 6000, 3000, false);
        let mfhd = frag.windows(4).position(|w| w == b"mfhd").unwrap() + 4;
        assert_eq!(read_u32(&frag, mfhd + 4), 42);
        let tfdt = frag.windows(4).position(|w| w == b"tfdt").unwrap() + 4;
        assert_eq!(read_u32(&frag, tfdt + 4), 6000);
    }

    #[test]
    fn test_sample_duration() {
        assert_eq!(sample_duration(30), 3000);
        assert_eq!(sample_duration(15), 6000);
        assert_eq!(sample_duration(0), 6000);
    }
}
