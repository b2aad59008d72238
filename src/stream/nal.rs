//! NAL unit helpers for the legacy raw stream.
//!
//! The phone always prefixes each unit with a 4-byte `00 00 00 01` start code,
//! so the unit type is read from the header byte at a fixed offset instead of
//! scanning for start codes. [`split_annexb`] is the general scanner, used when
//! several units arrive concatenated in one buffer (and for file replay).

use std::borrow::Cow;

/// Annex-B start code the phone puts in front of every unit
pub const START_CODE: [u8; 4] = [0, 0, 0, 1];
/// Three-byte form encoders may use between units of one picture
pub const SHORT_START_CODE: [u8; 3] = [0, 0, 1];
/// Offset of the NAL header byte, right after the start code
pub const NAL_TYPE_OFFSET: usize = START_CODE.len();

/// Codec string used when no SPS has been seen yet
pub const DEFAULT_AVC_CODEC: &str = "avc1.42002a";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalType {
    /// Non-IDR slice (type 1)
    Slice,
    /// IDR slice, a self-contained keyframe (type 5)
    Idr,
    /// Sequence parameter set (type 7)
    Sps,
    /// Picture parameter set (type 8)
    Pps,
    Other(u8),
}

impl NalType {
    pub fn from_header(byte: u8) -> Self {
        match byte & 0x1F {
            1 => NalType::Slice,
            5 => NalType::Idr,
            7 => NalType::Sps,
            8 => NalType::Pps,
            other => NalType::Other(other),
        }
    }
}

/// HEVC unit type from the first header byte
pub fn hevc_type(header: u8) -> u8 {
    (header >> 1) & 0x3F
}

/// IDR_W_RADL, IDR_N_LP, VPS and SPS units let a decoder start from this picture.
pub fn is_hevc_key(unit_type: u8) -> bool {
    matches!(unit_type, 19 | 20 | 32 | 33)
}

/// Type of a start-code-prefixed unit, `None` if the buffer is too short.
pub fn nal_type(unit: &[u8]) -> Option<NalType> {
    unit.get(NAL_TYPE_OFFSET).copied().map(NalType::from_header)
}

pub fn contains_start_code(data: &[u8]) -> bool {
    data.windows(START_CODE.len()).any(|w| w == START_CODE)
}

pub fn starts_with_start_code(data: &[u8]) -> bool {
    data.starts_with(&START_CODE) || data.starts_with(&SHORT_START_CODE)
}

/// Split a buffer on 3- and 4-byte start codes. Bytes before the first start
/// code are discarded. Every returned unit carries a 4-byte start code so the
/// header sits at [`NAL_TYPE_OFFSET`]; units found behind a 3-byte code are
/// copied with the missing zero added.
pub fn split_annexb(data: &[u8]) -> Vec<Cow<'_, [u8]>> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + SHORT_START_CODE.len() <= data.len() {
        if data[i..i + SHORT_START_CODE.len()] == SHORT_START_CODE {
            let long = i > 0 && data[i - 1] == 0;
            starts.push(if long { i - 1 } else { i });
            i += SHORT_START_CODE.len();
        } else {
            i += 1;
        }
    }

    starts
        .iter()
        .enumerate()
        .map(|(n, &start)| {
            let end = starts.get(n + 1).copied().unwrap_or(data.len());
            let unit = &data[start..end];
            if unit.starts_with(&START_CODE) {
                Cow::Borrowed(unit)
            } else {
                let mut widened = Vec::with_capacity(unit.len() + 1);
                widened.push(0);
                widened.extend_from_slice(unit);
                Cow::Owned(widened)
            }
        })
        .collect()
}

/// Types of every unit found in `data`.
pub fn unit_types(data: &[u8]) -> Vec<NalType> {
    split_annexb(data)
        .iter()
        .filter_map(|unit| nal_type(unit))
        .collect()
}

/// `avc1.PPCCLL` from the profile, constraint and level bytes of an SPS.
pub fn avc_codec_string(sps: &[u8]) -> String {
    match sps.get(NAL_TYPE_OFFSET + 1..NAL_TYPE_OFFSET + 4) {
        Some(bytes) => format!("avc1.{:02x}{:02x}{:02x}", bytes[0], bytes[1], bytes[2]),
        None => DEFAULT_AVC_CODEC.to_string(),
    }
}

/// SPS and PPS joined into a decoder description, each with a start code.
pub fn parameter_set_description(sps: &[u8], pps: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(sps.len() + pps.len() + 2 * START_CODE.len());
    for unit in [sps, pps] {
        if !unit.starts_with(&START_CODE) {
            out.extend_from_slice(&START_CODE);
        }
        out.extend_from_slice(unit);
    }
    out
}
