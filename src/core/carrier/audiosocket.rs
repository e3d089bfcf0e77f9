//! Asterisk AudioSocket adapter.
//!
//! AudioSocket is a TCP protocol of `type(1) | length(2, BE) | payload`
//! frames. Asterisk opens with a uuid frame naming the call context, then
//! streams signed linear 8 kHz mono audio. The listener reads the uuid
//! with [`read_context_id`] to resolve the call before building the
//! streamer, so the streamer yields its configuration on the first `recv`.

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::CarrierKind;
use crate::core::packet::{Directive, Packet};
use crate::core::streamer::{
    BaseStreamer, BufferOptions, CallIdentity, InboundEvent, StreamAttribute, StreamError,
    StreamState, Streamer,
};

// =============================================================================
// Frames
// =============================================================================

pub const KIND_HANGUP: u8 = 0x00;
pub const KIND_UUID: u8 = 0x01;
pub const KIND_SILENCE: u8 = 0x02;
pub const KIND_DTMF: u8 = 0x03;
pub const KIND_AUDIO: u8 = 0x10;
pub const KIND_ERROR: u8 = 0xff;

const HEADER_LEN: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSocketFrame {
    Hangup,
    Uuid(Uuid),
    Silence,
    Dtmf(u8),
    /// Signed linear 16-bit, 8 kHz, mono.
    Audio(Bytes),
    Error(Bytes),
    Unknown { kind: u8, payload: Bytes },
}

impl AudioSocketFrame {
    fn kind(&self) -> u8 {
        match self {
            AudioSocketFrame::Hangup => KIND_HANGUP,
            AudioSocketFrame::Uuid(_) => KIND_UUID,
            AudioSocketFrame::Silence => KIND_SILENCE,
            AudioSocketFrame::Dtmf(_) => KIND_DTMF,
            AudioSocketFrame::Audio(_) => KIND_AUDIO,
            AudioSocketFrame::Error(_) => KIND_ERROR,
            AudioSocketFrame::Unknown { kind, .. } => *kind,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AudioSocketError {
    #[error("AudioSocket I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid uuid payload length: {0} (expected 16)")]
    InvalidUuid(usize),
    #[error("Payload of {0} bytes does not fit in a frame")]
    PayloadTooLarge(usize),
}

impl From<AudioSocketError> for StreamError {
    fn from(err: AudioSocketError) -> Self {
        match err {
            AudioSocketError::Io(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::UnexpectedEof
                        | std::io::ErrorKind::ConnectionReset
                        | std::io::ErrorKind::BrokenPipe
                ) =>
            {
                StreamError::EndOfStream
            }
            AudioSocketError::Io(e) => StreamError::Transport(e.to_string()),
            other => StreamError::Protocol(other.to_string()),
        }
    }
}

/// Length-prefixed AudioSocket framing.
#[derive(Debug, Default, Clone, Copy)]
pub struct AudioSocketCodec;

impl Decoder for AudioSocketCodec {
    type Item = AudioSocketFrame;
    type Error = AudioSocketError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let kind = src[0];
        let len = u16::from_be_bytes([src[1], src[2]]) as usize;
        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }
        src.advance(HEADER_LEN);
        let payload = src.split_to(len).freeze();

        Ok(Some(match kind {
            KIND_HANGUP => AudioSocketFrame::Hangup,
            KIND_UUID => {
                let uuid =
                    Uuid::from_slice(&payload).map_err(|_| AudioSocketError::InvalidUuid(len))?;
                AudioSocketFrame::Uuid(uuid)
            }
            KIND_SILENCE => AudioSocketFrame::Silence,
            KIND_DTMF => AudioSocketFrame::Dtmf(payload.first().copied().unwrap_or_default()),
            KIND_AUDIO => AudioSocketFrame::Audio(payload),
            KIND_ERROR => AudioSocketFrame::Error(payload),
            kind => AudioSocketFrame::Unknown { kind, payload },
        }))
    }
}

impl Encoder<AudioSocketFrame> for AudioSocketCodec {
    type Error = AudioSocketError;

    fn encode(&mut self, frame: AudioSocketFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let kind = frame.kind();
        let payload: Bytes = match frame {
            AudioSocketFrame::Hangup | AudioSocketFrame::Silence => Bytes::new(),
            AudioSocketFrame::Uuid(uuid) => Bytes::copy_from_slice(uuid.as_bytes()),
            AudioSocketFrame::Dtmf(digit) => Bytes::copy_from_slice(&[digit]),
            AudioSocketFrame::Audio(data)
            | AudioSocketFrame::Error(data)
            | AudioSocketFrame::Unknown { payload: data, .. } => data,
        };
        let len = u16::try_from(payload.len())
            .map_err(|_| AudioSocketError::PayloadTooLarge(payload.len()))?;
        dst.reserve(HEADER_LEN + payload.len());
        dst.put_u8(kind);
        dst.put_u16(len);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

// =============================================================================
// Connection
// =============================================================================

pub type AudioSocketReader = FramedRead<Box<dyn AsyncRead + Send + Unpin>, AudioSocketCodec>;
pub type AudioSocketWriter = FramedWrite<Box<dyn AsyncWrite + Send + Unpin>, AudioSocketCodec>;

/// Split a connection into framed halves.
pub fn framed<S>(stream: S) -> (AudioSocketReader, AudioSocketWriter)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read, write) = tokio::io::split(stream);
    let read: Box<dyn AsyncRead + Send + Unpin> = Box::new(read);
    let write: Box<dyn AsyncWrite + Send + Unpin> = Box::new(write);
    (
        FramedRead::new(read, AudioSocketCodec),
        FramedWrite::new(write, AudioSocketCodec),
    )
}

/// Read the opening uuid frame and return it in hyphenated form.
pub async fn read_context_id(reader: &mut AudioSocketReader) -> Result<String, StreamError> {
    match reader.next().await {
        Some(Ok(AudioSocketFrame::Uuid(uuid))) => Ok(uuid.hyphenated().to_string()),
        Some(Ok(other)) => Err(StreamError::Protocol(format!(
            "expected uuid frame (0x01), got frame type 0x{:02x}",
            other.kind()
        ))),
        Some(Err(e)) => Err(e.into()),
        None => Err(StreamError::EndOfStream),
    }
}

// =============================================================================
// Streamer
// =============================================================================

pub struct AudioSocketStreamer {
    base: BaseStreamer,
    reader: Mutex<AudioSocketReader>,
    writer: Mutex<AudioSocketWriter>,
}

impl AudioSocketStreamer {
    /// `reader` must already be past the uuid frame.
    pub fn new(
        reader: AudioSocketReader,
        writer: AudioSocketWriter,
        identity: CallIdentity,
        buffers: BufferOptions,
    ) -> Self {
        Self {
            base: BaseStreamer::new(
                identity,
                CarrierKind::AudioSocket.default_attribute(),
                buffers,
            ),
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        }
    }

    async fn read(&self) -> Result<AudioSocketFrame, StreamError> {
        let cancel = self.base.cancel_token();
        let mut reader = self.reader.lock().await;
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(self.base.fail(StreamError::EndOfStream)),
            next = reader.next() => next,
        };
        match next {
            Some(Ok(frame)) => Ok(frame),
            Some(Err(e)) => Err(self.base.fail(e.into())),
            None => Err(self.base.fail(StreamError::EndOfStream)),
        }
    }

    async fn write_all(&self, frames: Vec<AudioSocketFrame>) -> Result<(), StreamError> {
        let mut writer = self.writer.lock().await;
        for frame in frames {
            if let Err(e) = writer.feed(frame).await {
                return Err(self.base.fail(e.into()));
            }
        }
        if let Err(e) = writer.flush().await {
            return Err(self.base.fail(e.into()));
        }
        Ok(())
    }

    async fn write_audio(&self, frames: Vec<Bytes>) -> Result<(), StreamError> {
        if frames.is_empty() {
            return Ok(());
        }
        self.write_all(frames.into_iter().map(AudioSocketFrame::Audio).collect())
            .await
    }
}

#[async_trait]
impl Streamer for AudioSocketStreamer {
    fn context(&self) -> CancellationToken {
        self.base.cancel_token()
    }

    async fn recv(&self) -> Result<InboundEvent, StreamError> {
        if let Some(configuration) = self.base.configuration(None, None) {
            info!(
                conversation_id = %configuration.identity.conversation_id,
                "AudioSocket call configured"
            );
            return Ok(InboundEvent::Configuration(configuration));
        }
        loop {
            match self.read().await? {
                AudioSocketFrame::Audio(data) => {
                    if let Some(packet) = self.base.buffer_input(&data) {
                        return Ok(InboundEvent::Message(packet));
                    }
                }
                AudioSocketFrame::Hangup => {
                    info!(
                        conversation_id = %self.base.identity().conversation_id,
                        "AudioSocket hangup received"
                    );
                    self.base.begin_draining();
                    return Err(self.base.fail(StreamError::EndOfStream));
                }
                AudioSocketFrame::Error(payload) => {
                    return Err(self.base.fail(StreamError::Transport(format!(
                        "audiosocket error frame received (code {:?})",
                        payload.first()
                    ))));
                }
                AudioSocketFrame::Uuid(_) | AudioSocketFrame::Silence => {}
                AudioSocketFrame::Dtmf(digit) => debug!(digit = %char::from(digit), "DTMF ignored"),
                AudioSocketFrame::Unknown { kind, .. } => {
                    warn!(kind, "Skipping unknown AudioSocket frame");
                }
            }
        }
    }

    async fn send(&self, packet: Packet) -> Result<(), StreamError> {
        if !self.base.accepts_sends() {
            return Ok(());
        }
        match packet {
            Packet::Audio(chunk) => {
                let frames = self.base.buffer_output(&chunk.data);
                self.write_audio(frames).await
            }
            Packet::Completion { .. } => {
                let rest = self.base.flush_output();
                self.write_audio(rest.into_iter().collect()).await
            }
            Packet::Interruption { .. } => {
                // AudioSocket has no clear frame.
                self.base.clear_input();
                self.base.reset_output();
                Ok(())
            }
            Packet::Directive(Directive::EndConversation) => {
                let _ = self.write_all(vec![AudioSocketFrame::Hangup]).await;
                self.base.close();
                let _ = self.writer.lock().await.close().await;
                Ok(())
            }
            Packet::Text(_) | Packet::Flush { .. } => Ok(()),
        }
    }

    fn config(&self) -> StreamAttribute {
        self.base.attribute()
    }

    fn state(&self) -> StreamState {
        self.base.state()
    }

    fn identity(&self) -> &CallIdentity {
        self.base.identity()
    }
}
