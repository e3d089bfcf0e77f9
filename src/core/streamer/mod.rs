//! Carrier-agnostic duplex call stream.
//!
//! A [`Streamer`] is the single seam between a carrier connection and the
//! conversation orchestrator. `recv` yields a configuration event once the
//! carrier handshake resolves to a call, followed by inbound packets; `send`
//! delivers outbound packets in the carrier's vocabulary.
//!
//! `recv` and `send` take `&self` and may run concurrently. Implementations
//! guard their read and write halves independently.

mod base;
mod state;

pub use base::{BaseStreamer, BufferOptions, read_frame};
pub use state::{StreamState, StreamStateCell};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::core::audio::AudioConfig;
use crate::core::packet::Packet;
use crate::core::transformer::ProviderSelection;
use crate::core::transport::TransportError;

/// Who a call belongs to. Fixed for the lifetime of a stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallIdentity {
    pub assistant_id: String,
    pub conversation_id: String,
    #[serde(default = "default_version")]
    pub version: String,
    /// Carrier call id (Twilio CallSid, Vonage uuid, ...).
    #[serde(default)]
    pub channel_id: Option<String>,
    /// Remote party number, when known.
    #[serde(default)]
    pub caller: Option<String>,
}

fn default_version() -> String {
    "latest".to_string()
}

impl CallIdentity {
    pub fn new(assistant_id: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self {
            assistant_id: assistant_id.into(),
            conversation_id: conversation_id.into(),
            version: default_version(),
            channel_id: None,
            caller: None,
        }
    }

    pub fn with_channel_id(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }

    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }
}

/// Input and output audio formats of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamAttribute {
    pub input: AudioConfig,
    pub output: AudioConfig,
}

impl StreamAttribute {
    pub const fn symmetric(config: AudioConfig) -> Self {
        Self {
            input: config,
            output: config,
        }
    }
}

/// Emitted by a stream once the carrier handshake identifies the call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallConfiguration {
    pub identity: CallIdentity,
    pub audio: StreamAttribute,
    /// Explicit provider choices; `None` falls back to the assistant profile.
    pub stt: Option<ProviderSelection>,
    pub tts: Option<ProviderSelection>,
}

/// What `recv` produces.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Configuration(CallConfiguration),
    Message(Packet),
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StreamError {
    /// The carrier ended the call or the call context was cancelled.
    #[error("End of stream")]
    EndOfStream,
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Codec error: {0}")]
    Codec(String),
    #[error("Stream closed")]
    Closed,
}

impl From<TransportError> for StreamError {
    fn from(err: TransportError) -> Self {
        if err.is_graceful() {
            StreamError::EndOfStream
        } else {
            StreamError::Transport(err.to_string())
        }
    }
}

/// Carrier-agnostic duplex stream for one call.
#[async_trait]
pub trait Streamer: Send + Sync {
    /// Cancellation scope of the call. Cancelling it ends `recv` promptly.
    fn context(&self) -> CancellationToken;

    /// Next inbound event. Returns [`StreamError::EndOfStream`] on hang-up.
    async fn recv(&self) -> Result<InboundEvent, StreamError>;

    /// Deliver an outbound packet. A no-op once the stream is draining.
    async fn send(&self, packet: Packet) -> Result<(), StreamError>;

    /// Negotiated audio formats; fixed at construction.
    fn config(&self) -> StreamAttribute;

    fn state(&self) -> StreamState;

    fn identity(&self) -> &CallIdentity;
}
