//! Optional call recording.
//!
//! Segments are kept in memory in the internal 16 kHz PCM format and
//! written out as one mono WAV file per role when the call ends.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::core::audio::{AudioConfig, AudioError, AudioResampler};
use crate::core::packet::{AudioSegment, Role};

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("Audio conversion failed: {0}")]
    Audio(#[from] AudioError),
    #[error("WAV write failed: {0}")]
    Wav(#[from] hound::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct CallRecorder {
    directory: PathBuf,
    conversation_id: String,
    format: AudioConfig,
    resampler: AudioResampler,
    segments: Mutex<Vec<AudioSegment>>,
}

impl CallRecorder {
    pub fn new(directory: impl Into<PathBuf>, conversation_id: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            conversation_id: conversation_id.into(),
            format: AudioConfig::linear16_16k(),
            resampler: AudioResampler::new(),
            segments: Mutex::new(Vec::new()),
        }
    }

    /// Append audio spoken by `role`, given in `source` format.
    pub fn record(&self, role: Role, data: &[u8], source: &AudioConfig) -> Result<(), RecorderError> {
        if data.is_empty() {
            return Ok(());
        }
        let pcm = self.resampler.resample(data, source, &self.format)?;
        self.segments
            .lock()
            .push(AudioSegment::new(role, Bytes::from(pcm)));
        Ok(())
    }

    pub fn segment_count(&self) -> usize {
        self.segments.lock().len()
    }

    /// Path of the WAV file for `role`.
    pub fn path_for(&self, role: Role) -> PathBuf {
        let suffix = match role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        self.directory
            .join(format!("{}_{}.wav", self.conversation_id, suffix))
    }

    /// Write the recorded segments and return the files produced.
    ///
    /// Roles without audio produce no file. The segment list is emptied.
    pub fn finalize(&self) -> Result<Vec<PathBuf>, RecorderError> {
        let segments = std::mem::take(&mut *self.segments.lock());
        if segments.is_empty() {
            return Ok(Vec::new());
        }
        std::fs::create_dir_all(&self.directory)?;

        let mut written = Vec::new();
        for role in [Role::User, Role::Assistant] {
            let mut ordered: Vec<&AudioSegment> =
                segments.iter().filter(|s| s.role == role).collect();
            if ordered.is_empty() {
                continue;
            }
            ordered.sort_by_key(|s| s.timestamp);
            let path = self.path_for(role);
            write_wav(&path, self.format, &ordered)?;
            written.push(path);
        }
        info!(
            conversation_id = %self.conversation_id,
            files = written.len(),
            "Call recording written"
        );
        Ok(written)
    }

    /// [`finalize`](Self::finalize) on the blocking pool, logging failures.
    pub async fn finalize_async(self: std::sync::Arc<Self>) {
        let conversation_id = self.conversation_id.clone();
        match tokio::task::spawn_blocking(move || self.finalize()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(conversation_id = %conversation_id, error = %e, "Failed to write call recording"),
            Err(e) => warn!(conversation_id = %conversation_id, error = %e, "Recording task panicked"),
        }
    }
}

fn write_wav(path: &Path, format: AudioConfig, segments: &[&AudioSegment]) -> Result<(), RecorderError> {
    let spec = hound::WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for segment in segments {
        for sample in segment.data.chunks_exact(2) {
            writer.write_sample(i16::from_le_bytes([sample[0], sample[1]]))?;
        }
    }
    writer.finalize()?;
    Ok(())
}
