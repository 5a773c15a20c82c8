//! Register codec: typed values <-> little-endian bytes at a chosen resolution.
//!
//! Integer resolutions store `round(value * scale)`; the most negative integer of each
//! width is reserved to mean "no value" and encoding saturates to the remaining range.
//! `f32` values use IEEE754 layout with NaN as the "no value" marker.

use crate::{ControlError, Result};
use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "i8")]
    Int8,
    #[serde(rename = "i16")]
    Int16,
    #[serde(rename = "i32")]
    Int32,
    #[serde(rename = "f32")]
    Float32,
    #[serde(rename = "ignore")]
    Ignore,
}

impl Resolution {
    pub fn width(self) -> usize {
        match self {
            Resolution::Int8 => 1,
            Resolution::Int16 => 2,
            Resolution::Int32 | Resolution::Float32 => 4,
            Resolution::Ignore => 0,
        }
    }

    /// Wire code; `Ignore` is never put on the wire.
    pub fn code(self) -> Option<u8> {
        match self {
            Resolution::Int8 => Some(0),
            Resolution::Int16 => Some(1),
            Resolution::Int32 => Some(2),
            Resolution::Float32 => Some(3),
            Resolution::Ignore => None,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Resolution::Int8),
            1 => Some(Resolution::Int16),
            2 => Some(Resolution::Int32),
            3 => Some(Resolution::Float32),
            _ => None,
        }
    }

    /// Default scale for positional quantities (value = raw / scale).
    pub fn scale(self) -> f64 {
        match self {
            Resolution::Int8 => 100.0,
            Resolution::Int16 => 10_000.0,
            Resolution::Int32 => 100_000.0,
            Resolution::Float32 | Resolution::Ignore => 1.0,
        }
    }

    /// Largest raw integer magnitude that still carries a value.
    fn raw_max(self) -> Option<i64> {
        match self {
            Resolution::Int8 => Some(i64::from(i8::MAX)),
            Resolution::Int16 => Some(i64::from(i16::MAX)),
            Resolution::Int32 => Some(i64::from(i32::MAX)),
            Resolution::Float32 | Resolution::Ignore => None,
        }
    }

    /// Largest representable magnitude at `scale`, for integer resolutions.
    pub fn max_magnitude(self, scale: f64) -> Option<f64> {
        self.raw_max().map(|m| m as f64 / scale)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Resolution::Int8 => "i8",
            Resolution::Int16 => "i16",
            Resolution::Int32 => "i32",
            Resolution::Float32 => "f32",
            Resolution::Ignore => "ignore",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "i8" | "int8" => Ok(Resolution::Int8),
            "i16" | "int16" => Ok(Resolution::Int16),
            "i32" | "int32" => Ok(Resolution::Int32),
            "f32" | "float32" | "float" => Ok(Resolution::Float32),
            "ignore" => Ok(Resolution::Ignore),
            other => Err(format!("unknown resolution: {other}")),
        }
    }
}

/// Encode `value` at the default scale of `resolution`. NaN encodes as "no value".
pub fn encode(value: f64, resolution: Resolution) -> Vec<u8> {
    let value = if value.is_nan() { None } else { Some(value) };
    encode_with(value, resolution, resolution.scale())
}

/// Decode one value at the default scale of `resolution`.
pub fn decode(bytes: &[u8], resolution: Resolution) -> Result<Option<f64>> {
    decode_with(bytes, resolution, resolution.scale())
}

pub fn encode_with(value: Option<f64>, resolution: Resolution, scale: f64) -> Vec<u8> {
    match resolution {
        Resolution::Ignore => Vec::new(),
        Resolution::Float32 => {
            let v = value.map(|v| v as f32).unwrap_or(f32::NAN);
            v.to_le_bytes().to_vec()
        }
        Resolution::Int8 => (quantize(value, resolution, scale) as i8).to_le_bytes().to_vec(),
        Resolution::Int16 => (quantize(value, resolution, scale) as i16)
            .to_le_bytes()
            .to_vec(),
        Resolution::Int32 => (quantize(value, resolution, scale) as i32)
            .to_le_bytes()
            .to_vec(),
    }
}

fn quantize(value: Option<f64>, resolution: Resolution, scale: f64) -> i64 {
    let max = resolution.raw_max().unwrap_or(0);
    match value {
        // The reserved minimum.
        None => -max - 1,
        Some(v) => {
            let raw = (v * scale).round();
            if raw.is_nan() {
                -max - 1
            } else {
                raw.clamp(-max as f64, max as f64) as i64
            }
        }
    }
}

/// Decode the first `resolution.width()` bytes of `bytes`.
pub fn decode_with(bytes: &[u8], resolution: Resolution, scale: f64) -> Result<Option<f64>> {
    let width = resolution.width();
    if bytes.len() < width {
        return Err(ControlError::MalformedFrame {
            resolution,
            needed: width,
            got: bytes.len(),
        });
    }
    let b = &bytes[..width];
    let raw = match resolution {
        Resolution::Ignore => return Ok(None),
        Resolution::Float32 => {
            let v = f32::from_le_bytes([b[0], b[1], b[2], b[3]]);
            return Ok(if v.is_nan() { None } else { Some(f64::from(v)) });
        }
        Resolution::Int8 => i64::from(i8::from_le_bytes([b[0]])),
        Resolution::Int16 => i64::from(i16::from_le_bytes([b[0], b[1]])),
        Resolution::Int32 => i64::from(i32::from_le_bytes([b[0], b[1], b[2], b[3]])),
    };
    let max = resolution.raw_max().unwrap_or(0);
    if raw == -max - 1 {
        return Ok(None);
    }
    Ok(Some(raw as f64 / scale))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Register;

    const INTEGER: [Resolution; 3] = [Resolution::Int8, Resolution::Int16, Resolution::Int32];

    fn assert_round_trip(reg: Register, res: Resolution, v: f64) {
        let scale = reg.scale(res);
        let bytes = encode_with(Some(v), res, scale);
        assert_eq!(bytes.len(), res.width());
        let back = decode_with(&bytes, res, scale).unwrap().unwrap();
        let step = 1.0 / scale;
        assert!(
            (back - v).abs() <= step / 2.0 + 1e-9,
            "{reg} {res}: {v} -> {back}"
        );
    }

    #[test]
    fn integer_round_trip_spans_range() {
        for reg in Register::ALL {
            for res in INTEGER {
                let max = res.max_magnitude(reg.scale(res)).unwrap();
                for v in [0.0, max, -max, max / 3.0, -max / 7.0] {
                    assert_round_trip(reg, res, v);
                }
            }
        }
    }

    #[test]
    fn float_round_trip() {
        for v in [0.0, -1.5, 123.456, f64::from(f32::MAX)] {
            let back = decode(&encode(v, Resolution::Float32), Resolution::Float32)
                .unwrap()
                .unwrap();
            assert!((back - v).abs() <= v.abs() * 1e-6);
        }
    }

    #[test]
    fn default_scales_match_positions() {
        assert_eq!(encode(0.5, Resolution::Int8), vec![50]);
        assert_eq!(encode(-0.0001, Resolution::Int16), (-1i16).to_le_bytes().to_vec());
        assert_eq!(decode(&[0x10, 0x27], Resolution::Int16).unwrap(), Some(1.0));
    }

    #[test]
    fn out_of_range_saturates() {
        assert_eq!(encode(5.0, Resolution::Int8), vec![127]);
        assert_eq!(encode(-5.0, Resolution::Int8), (-127i8).to_le_bytes().to_vec());
        assert_eq!(encode(f64::INFINITY, Resolution::Int16), i16::MAX.to_le_bytes().to_vec());
    }

    #[test]
    fn nan_is_absent() {
        for res in [Resolution::Int8, Resolution::Int16, Resolution::Int32, Resolution::Float32] {
            assert_eq!(decode(&encode(f64::NAN, res), res).unwrap(), None);
        }
    }

    #[test]
    fn ignore_is_empty() {
        assert!(encode(1.0, Resolution::Ignore).is_empty());
        assert_eq!(decode(&[], Resolution::Ignore).unwrap(), None);
    }

    #[test]
    fn undersized_buffer_is_malformed() {
        let err = decode(&[0x01], Resolution::Int32).unwrap_err();
        assert!(matches!(
            err,
            ControlError::MalformedFrame {
                resolution: Resolution::Int32,
                needed: 4,
                got: 1
            }
        ));
    }

    #[test]
    fn parses_names_and_codes() {
        assert_eq!("F32".parse::<Resolution>().unwrap(), Resolution::Float32);
        assert_eq!("int16".parse::<Resolution>().unwrap(), Resolution::Int16);
        assert_eq!(Resolution::from_code(2), Some(Resolution::Int32));
        assert_eq!(Resolution::Ignore.code(), None);
    }
}
