//! Codec profiles: encoder stage and RTP clock rate per codec.
//!
//! Each supported codec maps to a [`CodecProfile`] holding the pipeline
//! fragment that encodes raw media into that codec, and the clock rate used
//! to express sample durations to the transport layer.
//!
//! | Codec | Kind  | Clock rate | Encoder stage  |
//! |-------|-------|------------|----------------|
//! | VP8   | video | 90000      | `vp8enc`       |
//! | VP9   | video | 90000      | `vp9enc`       |
//! | H264  | video | 90000      | `x264enc`      |
//! | Opus  | audio | 48000      | `opusenc`      |
//! | G722  | audio | 48000      | `avenc_g722`   |
//!
//! Adding a codec is a new [`Codec`] variant plus one row in [`PROFILES`].

use std::fmt;
use std::str::FromStr;

use crate::error::{BridgeError, Result};

/// Clock rate for all video codecs (RFC 3551 §5).
pub const VIDEO_CLOCK_RATE: u32 = 90_000;

/// Clock rate for all audio codecs.
pub const AUDIO_CLOCK_RATE: u32 = 48_000;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Codecs a session can encode to.
///
/// Parsed from the identifiers negotiated by signalling (`VP8`, `VP9`,
/// `H264`, `Opus`, `G722`); anything else is [`BridgeError::UnknownCodec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    Vp8,
    Vp9,
    H264,
    Opus,
    G722,
}

impl Codec {
    pub const ALL: [Codec; 5] = [Self::Vp8, Self::Vp9, Self::H264, Self::Opus, Self::G722];

    /// Identifier as negotiated by signalling (e.g. `"VP8"`, `"Opus"`).
    pub fn name(self) -> &'static str {
        match self {
            Self::Vp8 => "VP8",
            Self::Vp9 => "VP9",
            Self::H264 => "H264",
            Self::Opus => "Opus",
            Self::G722 => "G722",
        }
    }

    pub fn is_audio(self) -> bool {
        matches!(self, Self::Opus | Self::G722)
    }

    /// Encoder fragment and clock rate for this codec.
    pub fn profile(self) -> &'static CodecProfile {
        &PROFILES[self as usize].1
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Codec {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|codec| codec.name() == s)
            .ok_or_else(|| BridgeError::UnknownCodec(s.to_string()))
    }
}

/// Encoder stage and timing parameters for a codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecProfile {
    /// Pipeline fragment spliced between the source and the sink stage.
    pub encoder: &'static str,
    /// Ticks per second used for sample durations.
    pub clock_rate: u32,
}

impl CodecProfile {
    /// Sample duration in clock ticks for a buffer of `duration_nanos`.
    pub fn samples_for(&self, duration_nanos: u64) -> u32 {
        samples_for_duration(self.clock_rate, duration_nanos)
    }
}

/// Profile table, one row per [`Codec`] in declaration order.
pub static PROFILES: [(Codec, CodecProfile); 5] = [
    (
        Codec::Vp8,
        CodecProfile {
            encoder: "vp8enc error-resilient=partitions keyframe-max-dist=10 auto-alt-ref=true cpu-used=5 deadline=1",
            clock_rate: VIDEO_CLOCK_RATE,
        },
    ),
    (
        Codec::Vp9,
        CodecProfile {
            encoder: "vp9enc",
            clock_rate: VIDEO_CLOCK_RATE,
        },
    ),
    (
        Codec::H264,
        CodecProfile {
            encoder: "video/x-raw,format=I420 ! x264enc bframes=0 speed-preset=veryfast key-int-max=60 ! video/x-h264,stream-format=byte-stream",
            clock_rate: VIDEO_CLOCK_RATE,
        },
    ),
    (
        Codec::Opus,
        CodecProfile {
            encoder: "opusenc",
            clock_rate: AUDIO_CLOCK_RATE,
        },
    ),
    (
        Codec::G722,
        CodecProfile {
            encoder: "avenc_g722",
            clock_rate: AUDIO_CLOCK_RATE,
        },
    ),
];

/// Resolve a codec identifier to its profile.
///
/// Unknown identifiers yield [`BridgeError::UnknownCodec`]; callers must not
/// go on to build a pipeline.
pub fn resolve(codec_name: &str) -> Result<(Codec, &'static CodecProfile)> {
    let codec: Codec = codec_name.parse()?;
    Ok((codec, codec.profile()))
}

/// Convert a duration in nanoseconds to clock ticks at `clock_rate`.
///
/// Computed exactly in integer arithmetic, rounding ties to even.
/// Saturates at `u32::MAX`.
pub fn samples_for_duration(clock_rate: u32, duration_nanos: u64) -> u32 {
    let scaled = clock_rate as u128 * duration_nanos as u128;
    let quotient = scaled / NANOS_PER_SEC;
    let remainder = scaled % NANOS_PER_SEC;

    let rounded = match (remainder * 2).cmp(&NANOS_PER_SEC) {
        std::cmp::Ordering::Less => quotient,
        std::cmp::Ordering::Greater => quotient + 1,
        std::cmp::Ordering::Equal => quotient + (quotient & 1),
    };

    u32::try_from(rounded).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_codec_resolves() {
        for codec in Codec::ALL {
            let (resolved, profile) = resolve(codec.name()).unwrap();
            assert_eq!(resolved, codec);
            assert!(!profile.encoder.is_empty());
            let expected = if codec.is_audio() {
                AUDIO_CLOCK_RATE
            } else {
                VIDEO_CLOCK_RATE
            };
            assert_eq!(profile.clock_rate, expected, "{codec}");
        }
    }

    #[test]
    fn profile_rows_follow_codec_order() {
        for (index, (codec, _)) in PROFILES.iter().enumerate() {
            assert_eq!(*codec as usize, index);
        }
    }

    #[test]
    fn unknown_codec_rejected() {
        let err = resolve("AV1").unwrap_err();
        assert!(matches!(err, BridgeError::UnknownCodec(ref name) if name == "AV1"));
    }

    #[test]
    fn codec_names_are_case_sensitive() {
        assert!(resolve("opus").is_err());
        assert!(resolve("h264").is_err());
        assert!(resolve("").is_err());
    }

    #[test]
    fn h264_emits_byte_stream() {
        let (_, profile) = resolve("H264").unwrap();
        assert!(profile.encoder.contains("x264enc"));
        assert!(profile.encoder.ends_with("stream-format=byte-stream"));
    }

    #[test]
    fn opus_20ms() {
        assert_eq!(samples_for_duration(AUDIO_CLOCK_RATE, 20_000_000), 960);
    }

    #[test]
    fn vp8_30fps() {
        assert_eq!(samples_for_duration(VIDEO_CLOCK_RATE, 33_333_333), 3000);
    }

    #[test]
    fn h264_16ms() {
        assert_eq!(Codec::H264.profile().samples_for(16_000_000), 1440);
    }

    #[test]
    fn zero_duration() {
        assert_eq!(samples_for_duration(VIDEO_CLOCK_RATE, 0), 0);
    }

    #[test]
    fn ties_round_to_even() {
        // 90000 * 5_000 ns = 0.45 ticks -> 0
        assert_eq!(samples_for_duration(VIDEO_CLOCK_RATE, 5_000), 0);
        // 1 Hz: 0.5 s -> 0, 1.5 s -> 2, 2.5 s -> 2
        assert_eq!(samples_for_duration(1, 500_000_000), 0);
        assert_eq!(samples_for_duration(1, 1_500_000_000), 2);
        assert_eq!(samples_for_duration(1, 2_500_000_000), 2);
        assert_eq!(samples_for_duration(1, 2_500_000_001), 3);
    }

    #[test]
    fn saturates_on_overflow() {
        assert_eq!(samples_for_duration(VIDEO_CLOCK_RATE, u64::MAX), u32::MAX);
    }
}
