use super::{AudioConfig, AudioError, AudioFormat, mulaw};

/// Converts audio between [`AudioConfig`]s.
///
/// Samples are decoded to normalized `f64`, channel-converted, linearly
/// interpolated to the target rate and encoded with clamping. Opus is not
/// handled here; see the `opus` module.
#[derive(Debug, Clone, Copy, Default)]
pub struct AudioResampler;

impl AudioResampler {
    pub fn new() -> Self {
        Self
    }

    /// Convert `data` from `source` to `target`.
    ///
    /// Returns the input unchanged when format, rate and channels all match.
    pub fn resample(
        &self,
        data: &[u8],
        source: &AudioConfig,
        target: &AudioConfig,
    ) -> Result<Vec<u8>, AudioError> {
        if source == target {
            return Ok(data.to_vec());
        }
        if source.sample_rate == 0 || target.sample_rate == 0 {
            return Err(AudioError::InvalidConfig("sample rate must be non-zero".into()));
        }

        let samples = decode_to_f64(data, source)?;
        let samples = convert_channels(samples, source.channels, target.channels);
        let samples = resample_linear(
            &samples,
            target.channels.max(1) as usize,
            source.sample_rate,
            target.sample_rate,
        );
        encode_from_f64(&samples, target)
    }
}

fn decode_to_f64(data: &[u8], config: &AudioConfig) -> Result<Vec<f64>, AudioError> {
    match config.format {
        AudioFormat::Linear16 => {
            if data.len() % 2 != 0 {
                return Err(AudioError::OddByteCount(data.len()));
            }
            Ok(data
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]) as f64 / 32768.0)
                .collect())
        }
        AudioFormat::Mulaw8 => Ok(data
            .iter()
            .map(|&b| mulaw::decode_sample(b) as f64 / 32768.0)
            .collect()),
        AudioFormat::Opus48 => Err(AudioError::UnsupportedFormat(config.format)),
    }
}

fn to_i16(sample: f64) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0) as i16
}

fn encode_from_f64(samples: &[f64], config: &AudioConfig) -> Result<Vec<u8>, AudioError> {
    match config.format {
        AudioFormat::Linear16 => {
            let mut out = Vec::with_capacity(samples.len() * 2);
            for &s in samples {
                out.extend_from_slice(&to_i16(s).to_le_bytes());
            }
            Ok(out)
        }
        AudioFormat::Mulaw8 => Ok(samples
            .iter()
            .map(|&s| mulaw::encode_sample(to_i16(s)))
            .collect()),
        AudioFormat::Opus48 => Err(AudioError::UnsupportedFormat(config.format)),
    }
}

/// Interleaved channel conversion: stereo→mono averages, mono→N duplicates.
fn convert_channels(samples: Vec<f64>, from: u16, to: u16) -> Vec<f64> {
    let (from, to) = (from.max(1) as usize, to.max(1) as usize);
    if from == to {
        return samples;
    }
    let frames = samples.len() / from;
    let mut out = Vec::with_capacity(frames * to);
    for frame in samples.chunks_exact(from) {
        if to == 1 {
            out.push(frame.iter().sum::<f64>() / from as f64);
        } else if from == 1 {
            out.extend(std::iter::repeat_n(frame[0], to));
        } else {
            let mono = frame.iter().sum::<f64>() / from as f64;
            out.extend(std::iter::repeat_n(mono, to));
        }
    }
    out
}

fn resample_linear(samples: &[f64], channels: usize, from_rate: u32, to_rate: u32) -> Vec<f64> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }
    let in_frames = samples.len() / channels;
    let ratio = from_rate as f64 / to_rate as f64;
    let out_frames = (in_frames as f64 / ratio) as usize;
    let mut out = Vec::with_capacity(out_frames * channels);

    for i in 0..out_frames {
        let position = i as f64 * ratio;
        let index = position as usize;
        let frac = position - index as f64;
        for ch in 0..channels {
            let current = samples[index.min(in_frames - 1) * channels + ch];
            let value = if index + 1 < in_frames {
                let next = samples[(index + 1) * channels + ch];
                current + (next - current) * frac
            } else {
                current
            };
            out.push(value);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_identity_returns_input() {
        let r = AudioResampler::new();
        let data = pcm(&[1, 2, 3]);
        let cfg = AudioConfig::linear16_16k();
        assert_eq!(r.resample(&data, &cfg, &cfg).unwrap(), data);
    }

    #[test]
    fn test_upsample_8k_to_16k_doubles_length() {
        let r = AudioResampler::new();
        let data = pcm(&[0; 160]);
        let out = r
            .resample(&data, &AudioConfig::linear16_8k(), &AudioConfig::linear16_16k())
            .unwrap();
        assert_eq!(out.len(), data.len() * 2);
    }

    #[test]
    fn test_downsample_48k_to_16k() {
        let r = AudioResampler::new();
        let data = pcm(&[1000; 960]);
        let out = r
            .resample(&data, &AudioConfig::linear16_48k(), &AudioConfig::linear16_16k())
            .unwrap();
        assert_eq!(out.len(), 640);
        let first = i16::from_le_bytes([out[0], out[1]]);
        assert!((first - 1000).abs() <= 1);
    }

    #[test]
    fn test_mulaw_to_linear_same_rate() {
        let r = AudioResampler::new();
        let mulaw_bytes = mulaw::encode(&[0, 8000, -8000, 0]);
        let out = r
            .resample(&mulaw_bytes, &AudioConfig::mulaw_8k(), &AudioConfig::linear16_8k())
            .unwrap();
        assert_eq!(out.len(), 8);
        let second = i16::from_le_bytes([out[2], out[3]]);
        assert!(second > 7000 && second < 9000);
    }

    #[test]
    fn test_linear_to_mulaw_halves_bytes() {
        let r = AudioResampler::new();
        let data = pcm(&[500; 320]);
        let out = r
            .resample(&data, &AudioConfig::linear16_8k(), &AudioConfig::mulaw_8k())
            .unwrap();
        assert_eq!(out.len(), 320);
    }

    #[test]
    fn test_stereo_to_mono_averages() {
        let r = AudioResampler::new();
        let stereo = AudioConfig::new(AudioFormat::Linear16, 16000, 2);
        let data = pcm(&[1000, 3000, -2000, 2000]);
        let out = r.resample(&data, &stereo, &AudioConfig::linear16_16k()).unwrap();
        assert_eq!(out.len(), 4);
        let a = i16::from_le_bytes([out[0], out[1]]);
        let b = i16::from_le_bytes([out[2], out[3]]);
        assert!((a - 2000).abs() <= 1);
        assert!(b.abs() <= 1);
    }

    #[test]
    fn test_odd_pcm_rejected() {
        let r = AudioResampler::new();
        let err = r
            .resample(&[0, 1, 2], &AudioConfig::linear16_8k(), &AudioConfig::linear16_16k())
            .unwrap_err();
        assert_eq!(err, AudioError::OddByteCount(3));
    }

    #[test]
    fn test_opus_rejected() {
        let r = AudioResampler::new();
        let err = r
            .resample(&[0, 0], &AudioConfig::opus_48k(), &AudioConfig::linear16_16k())
            .unwrap_err();
        assert_eq!(err, AudioError::UnsupportedFormat(AudioFormat::Opus48));
    }

    #[test]
    fn test_clamping_on_encode() {
        assert_eq!(to_i16(2.0), i16::MAX);
        assert_eq!(to_i16(-2.0), -i16::MAX);
    }
}
