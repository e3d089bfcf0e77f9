//! 20 ms frame codecs used by the WebRTC carrier.
//!
//! Every codec here consumes and produces PCM16 48 kHz mono, the decoded
//! form of WebRTC audio. [`OpusCodec`] is compiled with the `opus` feature;
//! [`PcmuCodec`] carries G.711 μ-law RTP and needs no native library.

use bytes::{Bytes, BytesMut};

use super::{AudioConfig, AudioResampler, DEFAULT_FRAME_DURATION_MS};

/// Codec errors.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Codec initialization failed: {0}")]
    Init(String),
    #[error("Encode failed: {0}")]
    Encode(String),
}

/// Frame-oriented codec between PCM16 and a compressed wire format.
pub trait FrameCodec: Send {
    /// PCM16 bytes consumed per encoded frame.
    fn frame_bytes(&self) -> usize;

    /// Encode PCM16, returning one packet per complete frame. A partial frame
    /// is held until the next call or [`FrameCodec::flush`].
    fn encode(&mut self, pcm: &[u8]) -> Result<Vec<Bytes>, CodecError>;

    /// Zero-pad and encode any held partial frame.
    fn flush(&mut self) -> Result<Option<Bytes>, CodecError>;

    /// Decode one packet to PCM16. `None` means the frame was dropped.
    fn decode(&mut self, packet: &[u8]) -> Option<Bytes>;

    /// Discard any held partial frame.
    fn reset(&mut self);
}

fn pcm_frame_bytes() -> usize {
    AudioConfig::opus_48k().frame_bytes(DEFAULT_FRAME_DURATION_MS)
}

/// Frames PCM without compressing it. Used where codec output is not
/// inspected, and in tests.
#[derive(Debug)]
pub struct PassthroughCodec {
    frame_bytes: usize,
    pending: BytesMut,
}

impl PassthroughCodec {
    pub fn new(frame_bytes: usize) -> Self {
        Self {
            frame_bytes,
            pending: BytesMut::new(),
        }
    }
}

impl Default for PassthroughCodec {
    fn default() -> Self {
        Self::new(pcm_frame_bytes())
    }
}

impl FrameCodec for PassthroughCodec {
    fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    fn encode(&mut self, pcm: &[u8]) -> Result<Vec<Bytes>, CodecError> {
        self.pending.extend_from_slice(pcm);
        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_bytes {
            frames.push(self.pending.split_to(self.frame_bytes).freeze());
        }
        Ok(frames)
    }

    fn flush(&mut self) -> Result<Option<Bytes>, CodecError> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        self.pending.resize(self.frame_bytes, 0);
        Ok(Some(self.pending.split().freeze()))
    }

    fn decode(&mut self, packet: &[u8]) -> Option<Bytes> {
        Some(Bytes::copy_from_slice(packet))
    }

    fn reset(&mut self) {
        self.pending.clear();
    }
}

/// Opus, 48 kHz mono, 20 ms frames, VoIP mode with in-band FEC.
#[cfg(feature = "opus")]
pub struct OpusCodec {
    encoder: ::opus::Encoder,
    decoder: ::opus::Decoder,
    pending: BytesMut,
}

/// Expected packet loss hint given to the encoder, in percent.
#[cfg(feature = "opus")]
const EXPECTED_PACKET_LOSS: i32 = 10;

/// Largest Opus packet we ever produce.
#[cfg(feature = "opus")]
const MAX_PACKET_BYTES: usize = 4000;

#[cfg(feature = "opus")]
impl OpusCodec {
    pub fn new() -> Result<Self, CodecError> {
        use ::opus::{Application, Channels};

        let mut encoder = ::opus::Encoder::new(48000, Channels::Mono, Application::Voip)
            .map_err(|e| CodecError::Init(e.to_string()))?;
        encoder
            .set_inband_fec(true)
            .map_err(|e| CodecError::Init(e.to_string()))?;
        encoder
            .set_packet_loss_perc(EXPECTED_PACKET_LOSS)
            .map_err(|e| CodecError::Init(e.to_string()))?;
        let decoder = ::opus::Decoder::new(48000, Channels::Mono)
            .map_err(|e| CodecError::Init(e.to_string()))?;

        Ok(Self {
            encoder,
            decoder,
            pending: BytesMut::new(),
        })
    }

    fn encode_frame(&mut self, frame: &[u8]) -> Result<Bytes, CodecError> {
        let samples: Vec<i16> = frame
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        let mut out = vec![0u8; MAX_PACKET_BYTES];
        let written = self
            .encoder
            .encode(&samples, &mut out)
            .map_err(|e| CodecError::Encode(e.to_string()))?;
        out.truncate(written);
        Ok(Bytes::from(out))
    }
}

#[cfg(feature = "opus")]
impl FrameCodec for OpusCodec {
    fn frame_bytes(&self) -> usize {
        pcm_frame_bytes()
    }

    fn encode(&mut self, pcm: &[u8]) -> Result<Vec<Bytes>, CodecError> {
        self.pending.extend_from_slice(pcm);
        let frame_bytes = pcm_frame_bytes();
        let mut packets = Vec::with_capacity(self.pending.len() / frame_bytes);
        while self.pending.len() >= frame_bytes {
            let frame = self.pending.split_to(frame_bytes);
            packets.push(self.encode_frame(&frame)?);
        }
        Ok(packets)
    }

    fn flush(&mut self) -> Result<Option<Bytes>, CodecError> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        self.pending.resize(pcm_frame_bytes(), 0);
        let frame = self.pending.split();
        self.encode_frame(&frame).map(Some)
    }

    fn decode(&mut self, packet: &[u8]) -> Option<Bytes> {
        let mut samples = vec![0i16; pcm_frame_bytes() / 2 * 3];
        match self.decoder.decode(packet, &mut samples, false) {
            Ok(count) => {
                let mut out = BytesMut::with_capacity(count * 2);
                for s in &samples[..count] {
                    out.extend_from_slice(&s.to_le_bytes());
                }
                Some(out.freeze())
            }
            Err(e) => {
                tracing::warn!("Dropping undecodable Opus frame: {}", e);
                None
            }
        }
    }

    fn reset(&mut self) {
        self.pending.clear();
    }
}

/// G.711 μ-law at 8 kHz, the one audio codec every browser offers.
///
/// PCM16 48 kHz frames are resampled down and companded on encode; RTP
/// payloads are expanded and resampled back up on decode.
#[derive(Debug, Default)]
pub struct PcmuCodec {
    framer: PassthroughCodec,
    resampler: AudioResampler,
}

impl PcmuCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn compand(&self, frame: &[u8]) -> Result<Bytes, CodecError> {
        self.resampler
            .resample(frame, &AudioConfig::linear16_48k(), &AudioConfig::mulaw_8k())
            .map(Bytes::from)
            .map_err(|e| CodecError::Encode(e.to_string()))
    }
}

impl FrameCodec for PcmuCodec {
    fn frame_bytes(&self) -> usize {
        self.framer.frame_bytes()
    }

    fn encode(&mut self, pcm: &[u8]) -> Result<Vec<Bytes>, CodecError> {
        let frames = self.framer.encode(pcm)?;
        frames.iter().map(|frame| self.compand(frame)).collect()
    }

    fn flush(&mut self) -> Result<Option<Bytes>, CodecError> {
        match self.framer.flush()? {
            Some(frame) => self.compand(&frame).map(Some),
            None => Ok(None),
        }
    }

    fn decode(&mut self, packet: &[u8]) -> Option<Bytes> {
        self.resampler
            .resample(packet, &AudioConfig::mulaw_8k(), &AudioConfig::linear16_48k())
            .ok()
            .map(Bytes::from)
    }

    fn reset(&mut self) {
        self.framer.reset();
    }
}

/// Codec for media carried on the WebRTC signaling socket itself: Opus with
/// the `opus` feature, raw PCM16 48 kHz frames without it.
pub fn socket_codec() -> Result<Box<dyn FrameCodec>, CodecError> {
    #[cfg(feature = "opus")]
    {
        Ok(Box::new(OpusCodec::new()?))
    }
    #[cfg(not(feature = "opus"))]
    {
        Ok(Box::new(PassthroughCodec::default()))
    }
}
