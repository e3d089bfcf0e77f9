use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{CallConfiguration, CallIdentity, StreamAttribute, StreamError, StreamState, StreamStateCell};
use crate::core::audio::{
    DEFAULT_FRAME_DURATION_MS, DEFAULT_INPUT_DURATION_MS, InputAccumulator, OutputFramer,
};
use crate::core::packet::Packet;
use crate::core::transformer::ProviderSelection;
use crate::core::transport::{FrameStream, WsFrame};

/// Buffer sizing for a stream.
///
/// Sizes default to durations of the negotiated format; explicit byte
/// counts take precedence.
#[derive(Debug, Clone, Copy)]
pub struct BufferOptions {
    pub input_duration_ms: u32,
    pub output_frame_ms: u32,
    pub input_threshold: Option<usize>,
    pub output_frame_size: Option<usize>,
}

impl Default for BufferOptions {
    fn default() -> Self {
        Self {
            input_duration_ms: DEFAULT_INPUT_DURATION_MS,
            output_frame_ms: DEFAULT_FRAME_DURATION_MS,
            input_threshold: None,
            output_frame_size: None,
        }
    }
}

/// State shared by every carrier adapter: identity, formats, buffers,
/// cancellation and lifecycle.
///
/// Buffer locks are held only around buffer mutation, never across I/O.
pub struct BaseStreamer {
    identity: CallIdentity,
    attribute: StreamAttribute,
    input_context: String,
    input: Mutex<InputAccumulator>,
    output: Mutex<OutputFramer>,
    cancel: CancellationToken,
    state: StreamStateCell,
    configured: AtomicBool,
}

impl BaseStreamer {
    pub fn new(identity: CallIdentity, attribute: StreamAttribute, options: BufferOptions) -> Self {
        let input_threshold = options
            .input_threshold
            .unwrap_or_else(|| attribute.input.decoded().frame_bytes(options.input_duration_ms));
        let output_frame = options
            .output_frame_size
            .unwrap_or_else(|| attribute.output.decoded().frame_bytes(options.output_frame_ms));

        debug!(
            conversation_id = %identity.conversation_id,
            input_threshold,
            output_frame,
            "Stream buffers configured"
        );

        Self {
            input_context: identity.conversation_id.clone(),
            identity,
            attribute,
            input: Mutex::new(InputAccumulator::new(input_threshold)),
            output: Mutex::new(OutputFramer::new(output_frame)),
            cancel: CancellationToken::new(),
            state: StreamStateCell::default(),
            configured: AtomicBool::new(false),
        }
    }

    pub fn identity(&self) -> &CallIdentity {
        &self.identity
    }

    pub fn attribute(&self) -> StreamAttribute {
        self.attribute
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> StreamState {
        self.state.get()
    }

    pub fn mark_connecting(&self) {
        self.state.advance(StreamState::Connecting);
    }

    /// Build the configuration event. Returns `None` after the first call.
    pub fn configuration(
        &self,
        stt: Option<ProviderSelection>,
        tts: Option<ProviderSelection>,
    ) -> Option<CallConfiguration> {
        if self.configured.swap(true, Ordering::AcqRel) {
            return None;
        }
        self.state.advance(StreamState::Connecting);
        self.state.advance(StreamState::Active);
        Some(CallConfiguration {
            identity: self.identity.clone(),
            audio: self.attribute,
            stt,
            tts,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.configured.load(Ordering::Acquire)
    }

    /// Append inbound audio; yields an audio packet once the threshold is crossed.
    pub fn buffer_input(&self, data: &[u8]) -> Option<Packet> {
        let chunk = self.input.lock().push(data)?;
        Some(Packet::audio(self.input_context.clone(), chunk))
    }

    pub fn input_len(&self) -> usize {
        self.input.lock().len()
    }

    pub fn clear_input(&self) {
        self.input.lock().clear();
    }

    /// Append outbound audio; returns every complete frame.
    pub fn buffer_output(&self, data: &[u8]) -> Vec<Bytes> {
        self.output.lock().push(data)
    }

    pub fn drain_output_frames(&self) -> Vec<Bytes> {
        self.output.lock().drain_frames()
    }

    pub fn flush_output(&self) -> Option<Bytes> {
        self.output.lock().flush()
    }

    pub fn reset_output(&self) {
        self.output.lock().reset();
    }

    pub fn output_len(&self) -> usize {
        self.output.lock().len()
    }

    pub fn output_frame_size(&self) -> usize {
        self.output.lock().frame_size()
    }

    /// Whether outbound packets should still reach the carrier.
    pub fn accepts_sends(&self) -> bool {
        self.state.get().accepts_sends() && !self.cancel.is_cancelled()
    }

    pub fn begin_draining(&self) {
        self.state.advance(StreamState::Draining);
    }

    /// Terminal close. Idempotent.
    pub fn close(&self) {
        self.state.advance(StreamState::Draining);
        self.state.advance(StreamState::Closed);
        self.cancel.cancel();
    }

    /// Record a `recv` failure: every error ends the call.
    pub fn fail(&self, err: StreamError) -> StreamError {
        match &err {
            StreamError::EndOfStream => debug!(
                conversation_id = %self.identity.conversation_id,
                "Stream ended"
            ),
            other => tracing::error!(
                conversation_id = %self.identity.conversation_id,
                error = %other,
                "Stream failed"
            ),
        }
        self.close();
        err
    }
}

/// Read the next data frame, honouring cancellation.
///
/// A close frame or the end of the stream map to [`StreamError::EndOfStream`].
pub async fn read_frame(
    cancel: &CancellationToken,
    stream: &mut FrameStream,
) -> Result<WsFrame, StreamError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StreamError::EndOfStream),
        frame = stream.next() => match frame {
            Some(Ok(WsFrame::Close)) | None => Err(StreamError::EndOfStream),
            Some(Ok(frame)) => Ok(frame),
            Some(Err(e)) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audio::AudioConfig;

    fn twilio_base() -> BaseStreamer {
        BaseStreamer::new(
            CallIdentity::new("a1", "c1"),
            StreamAttribute::symmetric(AudioConfig::mulaw_8k()),
            BufferOptions::default(),
        )
    }

    #[test]
    fn test_thresholds_derived_from_format() {
        let base = twilio_base();
        assert_eq!(base.input.lock().threshold(), 480);
        assert_eq!(base.output_frame_size(), 160);
    }

    #[test]
    fn test_explicit_sizes_override() {
        let base = BaseStreamer::new(
            CallIdentity::new("a1", "c1"),
            StreamAttribute::symmetric(AudioConfig::mulaw_8k()),
            BufferOptions {
                input_threshold: Some(100),
                output_frame_size: Some(50),
                ..Default::default()
            },
        );
        assert_eq!(base.input.lock().threshold(), 100);
        assert_eq!(base.output_frame_size(), 50);
    }

    #[test]
    fn test_configuration_emitted_once() {
        let base = twilio_base();
        assert_eq!(base.state(), StreamState::Idle);
        assert!(base.configuration(None, None).is_some());
        assert_eq!(base.state(), StreamState::Active);
        assert!(base.configuration(None, None).is_none());
    }

    #[test]
    fn test_close_cancels_and_stops_sends() {
        let base = twilio_base();
        base.configuration(None, None);
        assert!(base.accepts_sends());
        base.close();
        base.close();
        assert_eq!(base.state(), StreamState::Closed);
        assert!(base.cancel_token().is_cancelled());
        assert!(!base.accepts_sends());
    }

    #[test]
    fn test_buffer_input_packet() {
        let base = twilio_base();
        assert!(base.buffer_input(&[0u8; 400]).is_none());
        let packet = base.buffer_input(&[0u8; 220]).unwrap();
        match packet {
            Packet::Audio(chunk) => assert_eq!(chunk.data.len(), 480),
            other => panic!("unexpected packet {other:?}"),
        }
        assert_eq!(base.input_len(), 140);
    }
}
