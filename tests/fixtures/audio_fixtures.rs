//! Generated audio for call tests.
//!
//! Everything is 16-bit little-endian mono PCM so it can be fed straight
//! into the native carrier or a speech provider mock.

use std::f32::consts::PI;

/// Internal call audio rate.
pub const SAMPLE_RATE: u32 = 16000;

/// 20 ms at 16 kHz.
pub const MS_20: usize = 320;
/// 60 ms at 16 kHz, one default input buffer.
pub const MS_60: usize = 960;

pub fn generate_silence_bytes(duration_samples: usize) -> Vec<u8> {
    vec![0u8; duration_samples * 2]
}

pub fn generate_sine_wave(
    duration_samples: usize,
    frequency: f32,
    amplitude: f32,
    sample_rate: u32,
) -> Vec<i16> {
    let max_amplitude = amplitude * i16::MAX as f32;
    let angular_freq = 2.0 * PI * frequency / sample_rate as f32;

    (0..duration_samples)
        .map(|i| ((angular_freq * i as f32).sin() * max_amplitude) as i16)
        .collect()
}

/// A 440 Hz tone at the internal rate.
pub fn generate_a440_bytes(duration_samples: usize) -> Vec<u8> {
    samples_to_bytes(&generate_sine_wave(duration_samples, 440.0, 0.5, SAMPLE_RATE))
}

pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

pub fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}
