//! Audio formats, codecs and framing.
//!
//! Every call negotiates two [`AudioConfig`]s: one facing the carrier and one
//! facing the speech provider. The [`AudioResampler`] bridges the two, while
//! [`InputAccumulator`] and [`OutputFramer`] shape the byte stream into the
//! chunk sizes carriers and providers expect.
//!
//! # Modules
//! - `mulaw`: G.711 μ-law encode/decode
//! - `resampler`: format, channel and sample-rate conversion
//! - `opus`: 20 ms Opus and G.711 framing for the WebRTC carrier
//! - `buffer`: threshold accumulation and fixed-size output framing

mod buffer;
pub mod mulaw;
pub mod opus;
mod resampler;

pub use buffer::{InputAccumulator, OutputFramer};
pub use opus::{CodecError, FrameCodec, PassthroughCodec, PcmuCodec, socket_codec};
#[cfg(feature = "opus")]
pub use opus::OpusCodec;
pub use resampler::AudioResampler;

use serde::{Deserialize, Serialize};

/// Input chunk duration emitted by carrier adapters.
pub const DEFAULT_INPUT_DURATION_MS: u32 = 60;

/// Output frame duration written to carriers.
pub const DEFAULT_FRAME_DURATION_MS: u32 = 20;

/// Errors raised by the audio conversion layer.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum AudioError {
    #[error("Unsupported audio format for conversion: {0}")]
    UnsupportedFormat(AudioFormat),
    #[error("Invalid PCM16 payload: {0} bytes is not a whole number of samples")]
    OddByteCount(usize),
    #[error("Invalid audio config: {0}")]
    InvalidConfig(String),
}

/// Wire encoding of an audio stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    /// Signed 16-bit little-endian PCM.
    Linear16,
    /// 8-bit G.711 μ-law.
    Mulaw8,
    /// Opus frames. Byte math is expressed in decoded PCM16.
    Opus48,
}

impl AudioFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Linear16 => "linear16",
            AudioFormat::Mulaw8 => "mulaw8",
            AudioFormat::Opus48 => "opus48",
        }
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AudioFormat {
    type Err = AudioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "linear16" | "pcm16" | "pcm_s16le" | "slin" => Ok(AudioFormat::Linear16),
            "mulaw8" | "mulaw" | "ulaw" | "pcm_mulaw" => Ok(AudioFormat::Mulaw8),
            "opus48" | "opus" => Ok(AudioFormat::Opus48),
            other => Err(AudioError::InvalidConfig(format!(
                "unknown audio format '{other}'"
            ))),
        }
    }
}

/// Negotiated audio format for one direction of a call.
///
/// Immutable once a stream is set up; a new format means a new config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioConfig {
    pub format: AudioFormat,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioConfig {
    pub const fn new(format: AudioFormat, sample_rate: u32, channels: u16) -> Self {
        Self {
            format,
            sample_rate,
            channels,
        }
    }

    /// Twilio media streams.
    pub const fn mulaw_8k() -> Self {
        Self::new(AudioFormat::Mulaw8, 8000, 1)
    }

    /// Exotel and Asterisk AudioSocket.
    pub const fn linear16_8k() -> Self {
        Self::new(AudioFormat::Linear16, 8000, 1)
    }

    /// Internal format and Vonage.
    pub const fn linear16_16k() -> Self {
        Self::new(AudioFormat::Linear16, 16000, 1)
    }

    pub const fn linear16_24k() -> Self {
        Self::new(AudioFormat::Linear16, 24000, 1)
    }

    pub const fn linear16_48k() -> Self {
        Self::new(AudioFormat::Linear16, 48000, 1)
    }

    /// WebRTC media.
    pub const fn opus_48k() -> Self {
        Self::new(AudioFormat::Opus48, 48000, 1)
    }

    pub fn bytes_per_sample(&self) -> usize {
        match self.format {
            AudioFormat::Mulaw8 => 1,
            AudioFormat::Linear16 | AudioFormat::Opus48 => 2,
        }
    }

    /// Bytes of audio per millisecond: `sample_rate * bytes_per_sample * channels / 1000`.
    pub fn bytes_per_ms(&self) -> usize {
        self.sample_rate as usize * self.bytes_per_sample() * self.channels as usize / 1000
    }

    /// Size in bytes of `duration_ms` of audio, rounded down to whole sample frames.
    pub fn frame_bytes(&self, duration_ms: u32) -> usize {
        let frame = self.bytes_per_sample() * self.channels.max(1) as usize;
        let raw = self.sample_rate as usize * duration_ms as usize / 1000 * frame;
        raw - raw % frame
    }

    /// PCM16 view of this config, used when the wire format is compressed.
    pub fn decoded(&self) -> AudioConfig {
        match self.format {
            AudioFormat::Opus48 => AudioConfig::new(AudioFormat::Linear16, self.sample_rate, self.channels),
            _ => *self,
        }
    }

    pub fn validate(&self) -> Result<(), AudioError> {
        if self.sample_rate == 0 {
            return Err(AudioError::InvalidConfig("sample rate must be non-zero".into()));
        }
        if self.channels == 0 {
            return Err(AudioError::InvalidConfig("channel count must be non-zero".into()));
        }
        Ok(())
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self::linear16_16k()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_per_ms() {
        assert_eq!(AudioConfig::mulaw_8k().bytes_per_ms(), 8);
        assert_eq!(AudioConfig::linear16_8k().bytes_per_ms(), 16);
        assert_eq!(AudioConfig::linear16_16k().bytes_per_ms(), 32);
        assert_eq!(AudioConfig::opus_48k().bytes_per_ms(), 96);
    }

    #[test]
    fn test_frame_bytes_defaults() {
        let twilio = AudioConfig::mulaw_8k();
        assert_eq!(twilio.frame_bytes(DEFAULT_INPUT_DURATION_MS), 480);
        assert_eq!(twilio.frame_bytes(DEFAULT_FRAME_DURATION_MS), 160);

        let webrtc = AudioConfig::opus_48k();
        assert_eq!(webrtc.frame_bytes(DEFAULT_FRAME_DURATION_MS), 1920);
    }

    #[test]
    fn test_frame_bytes_whole_samples() {
        let cfg = AudioConfig::new(AudioFormat::Linear16, 11025, 2);
        assert_eq!(cfg.frame_bytes(10) % 4, 0);
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("ulaw".parse::<AudioFormat>().unwrap(), AudioFormat::Mulaw8);
        assert_eq!("PCM_S16LE".parse::<AudioFormat>().unwrap(), AudioFormat::Linear16);
        assert!("flac".parse::<AudioFormat>().is_err());
    }

    #[test]
    fn test_validate() {
        assert!(AudioConfig::new(AudioFormat::Linear16, 0, 1).validate().is_err());
        assert!(AudioConfig::linear16_16k().validate().is_ok());
    }
}
