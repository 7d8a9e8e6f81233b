//! Fixed-width linear PCM sample decoding.
//!
//! Each supported wire format is described by a static [`EncodingProfile`]. Decoding is a pure
//! function of the profile, the byte buffer, and an offset: it reads one sample and maps it to a
//! normalized `f32` by dividing through the profile's full-scale magnitude.

use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

/// Wire encodings accepted by the player.
///
/// Names match the identifiers used by the transport side when the stream format is negotiated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Encoding {
    #[serde(rename = "8bitInt")]
    Int8,
    #[default]
    #[serde(rename = "16bitIntLE")]
    Int16Le,
    #[serde(rename = "16bitIntBE")]
    Int16Be,
    #[serde(rename = "32bitIntLE")]
    Int32Le,
    #[serde(rename = "32bitIntBE")]
    Int32Be,
    #[serde(rename = "32bitFloatLE")]
    Float32Le,
    #[serde(rename = "32bitFloatBE")]
    Float32Be,
}

/// Immutable description of one sample layout.
#[derive(Debug)]
pub struct EncodingProfile {
    /// Wire name, e.g. `16bitIntLE`.
    pub name: &'static str,
    /// Significant bits per sample.
    pub bit_depth: u16,
    /// Bytes consumed per sample.
    pub sample_width: usize,
    /// Divisor mapping full-scale values to `[-1.0, 1.0]`.
    pub max_magnitude: f32,
    read: fn(&[u8]) -> f32,
}

impl EncodingProfile {
    /// Decode the sample starting at `offset`.
    ///
    /// The caller must guarantee `offset + sample_width <= bytes.len()`.
    #[inline]
    pub fn decode(&self, bytes: &[u8], offset: usize) -> f32 {
        (self.read)(&bytes[offset..offset + self.sample_width]) / self.max_magnitude
    }

    /// Whether `len` bytes hold a whole number of samples.
    pub fn is_aligned(&self, len: usize) -> bool {
        len % self.sample_width == 0
    }
}

static INT8: EncodingProfile = EncodingProfile {
    name: "8bitInt",
    bit_depth: 8,
    sample_width: 1,
    max_magnitude: 128.0,
    read: |b| b[0] as i8 as f32,
};

static INT16_LE: EncodingProfile = EncodingProfile {
    name: "16bitIntLE",
    bit_depth: 16,
    sample_width: 2,
    max_magnitude: 32_768.0,
    read: |b| i16::from_le_bytes([b[0], b[1]]) as f32,
};

static INT16_BE: EncodingProfile = EncodingProfile {
    name: "16bitIntBE",
    bit_depth: 16,
    sample_width: 2,
    max_magnitude: 32_768.0,
    read: |b| i16::from_be_bytes([b[0], b[1]]) as f32,
};

static INT32_LE: EncodingProfile = EncodingProfile {
    name: "32bitIntLE",
    bit_depth: 32,
    sample_width: 4,
    max_magnitude: 2_147_483_648.0,
    read: |b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32,
};

static INT32_BE: EncodingProfile = EncodingProfile {
    name: "32bitIntBE",
    bit_depth: 32,
    sample_width: 4,
    max_magnitude: 2_147_483_648.0,
    read: |b| i32::from_be_bytes([b[0], b[1], b[2], b[3]]) as f32,
};

static FLOAT32_LE: EncodingProfile = EncodingProfile {
    name: "32bitFloatLE",
    bit_depth: 32,
    sample_width: 4,
    max_magnitude: 1.0,
    read: |b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]),
};

static FLOAT32_BE: EncodingProfile = EncodingProfile {
    name: "32bitFloatBE",
    bit_depth: 32,
    sample_width: 4,
    max_magnitude: 1.0,
    read: |b| f32::from_be_bytes([b[0], b[1], b[2], b[3]]),
};

impl Encoding {
    pub const ALL: [Encoding; 7] = [
        Encoding::Int8,
        Encoding::Int16Le,
        Encoding::Int16Be,
        Encoding::Int32Le,
        Encoding::Int32Be,
        Encoding::Float32Le,
        Encoding::Float32Be,
    ];

    /// Static profile for this encoding.
    pub fn profile(self) -> &'static EncodingProfile {
        match self {
            Encoding::Int8 => &INT8,
            Encoding::Int16Le => &INT16_LE,
            Encoding::Int16Be => &INT16_BE,
            Encoding::Int32Le => &INT32_LE,
            Encoding::Int32Be => &INT32_BE,
            Encoding::Float32Le => &FLOAT32_LE,
            Encoding::Float32Be => &FLOAT32_BE,
        }
    }

    pub fn name(self) -> &'static str {
        self.profile().name
    }

    pub fn sample_width(self) -> usize {
        self.profile().sample_width
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Encoding {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Encoding::ALL
            .into_iter()
            .find(|e| e.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                let known: Vec<&str> = Encoding::ALL.iter().map(|e| e.name()).collect();
                anyhow!("unknown encoding {wanted:?} (expected one of {})", known.join(", "))
            })
    }
}

/// Decode one sample of `profile` at `offset`.
pub fn decode(profile: &EncodingProfile, bytes: &[u8], offset: usize) -> f32 {
    profile.decode(bytes, offset)
}

/// Decode an aligned buffer, appending every sample to `out`.
///
/// Trailing bytes that do not form a whole sample are ignored.
pub fn decode_into(profile: &EncodingProfile, bytes: &[u8], out: &mut Vec<f32>) {
    out.reserve(bytes.len() / profile.sample_width);
    out.extend(
        bytes
            .chunks_exact(profile.sample_width)
            .map(|chunk| profile.decode(chunk, 0)),
    );
}
