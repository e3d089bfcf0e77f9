//! Carrier protocol adapters.
//!
//! Each adapter turns one carrier's media protocol into the [`Streamer`]
//! contract. WebSocket carriers share [`WsChannel`] for guarded reads and
//! writes over a [`MediaTransport`]; AudioSocket speaks raw TCP frames.
//!
//! Inbound audio stays in the carrier's format. Resampling to provider
//! formats happens in the orchestrator.
//!
//! # Carriers
//! - [`twilio`]: JSON media envelope, μ-law 8 kHz
//! - [`exotel`]: JSON media envelope, linear16 8 kHz
//! - [`vonage`]: binary linear16 16 kHz plus JSON events
//! - [`webrtc`]: JSON signaling for a peer connection ([`peer`]), or socket media
//! - [`native`]: the gateway's own JSON client protocol
//! - [`audiosocket`]: Asterisk AudioSocket over TCP

pub mod audiosocket;
mod client;
mod envelope;
pub mod exotel;
pub mod native;
pub mod peer;
pub mod twilio;
pub mod vonage;
pub mod webrtc;

pub use audiosocket::{AudioSocketCodec, AudioSocketFrame, AudioSocketStreamer};
pub use client::{ClientMessage, ServerEvent};
pub use exotel::ExotelStreamer;
pub use native::NativeStreamer;
pub use twilio::TwilioStreamer;
pub use vonage::VonageStreamer;
pub use peer::{DEFAULT_ICE_SERVER, RtcPeerConnector};
pub use self::webrtc::{PeerEvent, PeerSession, PeerSignaling, SignalMessage, WebRtcStreamer};

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use futures::SinkExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::core::audio::{AudioConfig, socket_codec};
use crate::core::streamer::{
    BaseStreamer, BufferOptions, CallIdentity, StreamAttribute, StreamError, Streamer, read_frame,
};
use crate::core::telephony::CallTerminator;
use crate::core::transport::{FrameSink, FrameStream, MediaTransport, WsFrame};

// =============================================================================
// Carrier Kind
// =============================================================================

/// Supported carriers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CarrierKind {
    Twilio,
    Exotel,
    Vonage,
    WebRtc,
    Native,
    AudioSocket,
}

impl CarrierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CarrierKind::Twilio => "twilio",
            CarrierKind::Exotel => "exotel",
            CarrierKind::Vonage => "vonage",
            CarrierKind::WebRtc => "webrtc",
            CarrierKind::Native => "native",
            CarrierKind::AudioSocket => "audiosocket",
        }
    }

    /// Wire formats the carrier uses in both directions.
    pub fn default_attribute(&self) -> StreamAttribute {
        match self {
            CarrierKind::Twilio => StreamAttribute::symmetric(AudioConfig::mulaw_8k()),
            CarrierKind::Exotel | CarrierKind::AudioSocket => {
                StreamAttribute::symmetric(AudioConfig::linear16_8k())
            }
            CarrierKind::Vonage | CarrierKind::Native => {
                StreamAttribute::symmetric(AudioConfig::linear16_16k())
            }
            CarrierKind::WebRtc => StreamAttribute::symmetric(AudioConfig::opus_48k()),
        }
    }

    /// Whether the carrier places and answers phone calls.
    pub fn is_telephony(&self) -> bool {
        matches!(
            self,
            CarrierKind::Twilio | CarrierKind::Exotel | CarrierKind::Vonage
        )
    }
}

impl fmt::Display for CarrierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CarrierKind {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "twilio" => Ok(CarrierKind::Twilio),
            "exotel" => Ok(CarrierKind::Exotel),
            "vonage" => Ok(CarrierKind::Vonage),
            "webrtc" => Ok(CarrierKind::WebRtc),
            "native" => Ok(CarrierKind::Native),
            "audiosocket" | "asterisk" => Ok(CarrierKind::AudioSocket),
            other => Err(StreamError::Protocol(format!(
                "illegal carrier identifier '{other}'"
            ))),
        }
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Per-stream knobs handed to the carrier factory.
#[derive(Clone, Default)]
pub struct CarrierOptions {
    pub buffers: BufferOptions,
    /// Overrides the carrier's default formats. Honoured by the native carrier.
    pub attribute: Option<StreamAttribute>,
    /// Completes the call at the carrier on `EndConversation`.
    pub terminator: Option<Arc<dyn CallTerminator>>,
    /// SDP/ICE relay for WebRTC.
    pub signaling: Option<Arc<dyn PeerSignaling>>,
}

impl fmt::Debug for CarrierOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CarrierOptions")
            .field("buffers", &self.buffers)
            .field("attribute", &self.attribute)
            .field("terminator", &self.terminator.is_some())
            .field("signaling", &self.signaling.is_some())
            .finish()
    }
}

/// Build the streamer for a WebSocket carrier.
///
/// AudioSocket runs over TCP and is built with [`AudioSocketStreamer::new`].
pub fn create_streamer(
    kind: CarrierKind,
    transport: MediaTransport,
    identity: CallIdentity,
    options: CarrierOptions,
) -> Result<Box<dyn Streamer>, StreamError> {
    debug!(carrier = %kind, conversation_id = %identity.conversation_id, "Creating streamer");
    match kind {
        CarrierKind::Twilio => Ok(Box::new(TwilioStreamer::new(
            transport,
            identity,
            options.buffers,
            options.terminator,
        ))),
        CarrierKind::Exotel => Ok(Box::new(ExotelStreamer::new(
            transport,
            identity,
            options.buffers,
        ))),
        CarrierKind::Vonage => Ok(Box::new(VonageStreamer::new(
            transport,
            identity,
            options.buffers,
            options.terminator,
        ))),
        CarrierKind::WebRtc => {
            let codec = socket_codec().map_err(|e| StreamError::Codec(e.to_string()))?;
            let signaling = options
                .signaling
                .unwrap_or_else(|| Arc::new(RtcPeerConnector::default()));
            Ok(Box::new(WebRtcStreamer::new(
                transport,
                identity,
                codec,
                signaling,
                options.buffers,
            )))
        }
        CarrierKind::Native => Ok(Box::new(NativeStreamer::new(
            transport,
            identity,
            options
                .attribute
                .unwrap_or_else(|| kind.default_attribute()),
            options.buffers,
        ))),
        CarrierKind::AudioSocket => Err(StreamError::Protocol(
            "audiosocket is served over TCP, not WebSocket".to_string(),
        )),
    }
}

// =============================================================================
// WebSocket Channel
// =============================================================================

/// Read and write halves of a carrier socket, each behind its own lock.
pub(crate) struct WsChannel {
    reader: Mutex<FrameStream>,
    writer: Mutex<FrameSink>,
}

impl WsChannel {
    pub(crate) fn new(transport: MediaTransport) -> Self {
        Self {
            reader: Mutex::new(transport.stream),
            writer: Mutex::new(transport.sink),
        }
    }

    /// Next data frame. Every failure, hang-up included, closes the stream.
    pub(crate) async fn read(&self, base: &BaseStreamer) -> Result<WsFrame, StreamError> {
        let cancel = base.cancel_token();
        let mut stream = self.reader.lock().await;
        match read_frame(&cancel, &mut stream).await {
            Ok(frame) => {
                base.mark_connecting();
                Ok(frame)
            }
            Err(e) => Err(base.fail(e)),
        }
    }

    pub(crate) async fn write(&self, base: &BaseStreamer, frame: WsFrame) -> Result<(), StreamError> {
        let mut sink = self.writer.lock().await;
        match sink.send(frame).await {
            Ok(()) => Ok(()),
            Err(e) => Err(base.fail(e.into())),
        }
    }

    pub(crate) async fn write_all(
        &self,
        base: &BaseStreamer,
        frames: impl IntoIterator<Item = WsFrame>,
    ) -> Result<(), StreamError> {
        let mut sink = self.writer.lock().await;
        for frame in frames {
            if let Err(e) = sink.send(frame).await {
                return Err(base.fail(e.into()));
            }
        }
        Ok(())
    }

    /// Send a close frame and release the sink. Errors are ignored.
    pub(crate) async fn shutdown(&self) {
        let mut sink = self.writer.lock().await;
        let _ = sink.send(WsFrame::Close).await;
        let _ = sink.close().await;
    }
}

/// Serialize an outbound JSON control frame.
pub(crate) fn json_frame<T: serde::Serialize>(value: &T) -> Result<WsFrame, StreamError> {
    serde_json::to_string(value)
        .map(WsFrame::Text)
        .map_err(|e| StreamError::Protocol(format!("Failed to encode frame: {e}")))
}
