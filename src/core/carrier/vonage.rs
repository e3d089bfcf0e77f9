//! Vonage Voice API WebSocket adapter.
//!
//! Audio flows as binary linear16 16 kHz frames in both directions. JSON
//! text frames carry events (`websocket:connected`, `websocket:dtmf`,
//! `stop`). Outbound clear is `{"action":"clear"}`.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{CarrierKind, WsChannel, json_frame};
use crate::core::packet::{Directive, Packet};
use crate::core::streamer::{
    BaseStreamer, BufferOptions, CallIdentity, InboundEvent, StreamAttribute, StreamError,
    StreamState, Streamer,
};
use crate::core::telephony::CallTerminator;
use crate::core::transport::{MediaTransport, WsFrame};

#[derive(Debug, Deserialize)]
struct VonageEvent {
    event: String,
    #[serde(default, rename = "content-type")]
    content_type: Option<String>,
}

#[derive(Debug, Serialize)]
struct VonageAction {
    action: &'static str,
}

const CLEAR: VonageAction = VonageAction { action: "clear" };

pub struct VonageStreamer {
    base: BaseStreamer,
    channel: WsChannel,
    terminator: Option<Arc<dyn CallTerminator>>,
}

impl VonageStreamer {
    /// `terminator` hangs up the call through the Voice API when the call
    /// uuid is known.
    pub fn new(
        transport: MediaTransport,
        identity: CallIdentity,
        buffers: BufferOptions,
        terminator: Option<Arc<dyn CallTerminator>>,
    ) -> Self {
        Self {
            base: BaseStreamer::new(identity, CarrierKind::Vonage.default_attribute(), buffers),
            channel: WsChannel::new(transport),
            terminator,
        }
    }

    fn on_event(&self, text: &str) -> Result<Option<InboundEvent>, StreamError> {
        let event: VonageEvent = match serde_json::from_str(text) {
            Ok(event) => event,
            Err(e) => {
                warn!(carrier = "vonage", error = %e, "Skipping malformed event frame");
                return Ok(None);
            }
        };
        match event.event.as_str() {
            "websocket:connected" => {
                info!(
                    conversation_id = %self.base.identity().conversation_id,
                    content_type = ?event.content_type,
                    "Vonage socket connected"
                );
                Ok(self
                    .base
                    .configuration(None, None)
                    .map(InboundEvent::Configuration))
            }
            "stop" => {
                self.base.begin_draining();
                Err(self.base.fail(StreamError::EndOfStream))
            }
            "websocket:dtmf" => Ok(None),
            other => {
                debug!(event = other, "Unhandled Vonage event");
                Ok(None)
            }
        }
    }

    async fn write_audio(&self, frames: Vec<Bytes>) -> Result<(), StreamError> {
        if frames.is_empty() {
            return Ok(());
        }
        self.channel
            .write_all(&self.base, frames.into_iter().map(WsFrame::Binary))
            .await
    }

    async fn end_conversation(&self) {
        if let (Some(terminator), Some(uuid)) = (&self.terminator, &self.base.identity().channel_id)
            && let Err(e) = terminator.hangup(uuid).await
        {
            warn!(carrier = "vonage", uuid = %uuid, error = %e, "Failed to hang up call");
        }
        self.base.close();
        self.channel.shutdown().await;
    }
}

#[async_trait]
impl Streamer for VonageStreamer {
    fn context(&self) -> CancellationToken {
        self.base.cancel_token()
    }

    async fn recv(&self) -> Result<InboundEvent, StreamError> {
        loop {
            match self.channel.read(&self.base).await? {
                WsFrame::Binary(data) => {
                    if let Some(packet) = self.base.buffer_input(&data) {
                        return Ok(InboundEvent::Message(packet));
                    }
                }
                WsFrame::Text(text) => {
                    if let Some(event) = self.on_event(&text)? {
                        return Ok(event);
                    }
                }
                WsFrame::Close => return Err(self.base.fail(StreamError::EndOfStream)),
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
                self.base.reset_output();
                self.channel.write(&self.base, json_frame(&CLEAR)?).await
            }
            Packet::Directive(Directive::EndConversation) => {
                self.end_conversation().await;
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
