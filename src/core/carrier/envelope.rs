//! JSON media envelope shared by Twilio and Exotel.
//!
//! Both carriers send `connected`, `start`, `media`, `dtmf`, `mark` and
//! `stop` events and accept `media` and `clear`. They differ only in the
//! stream id key and the audio format.

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::{CarrierKind, WsChannel};
use crate::core::packet::{Directive, Packet};
use crate::core::streamer::{
    BaseStreamer, BufferOptions, CallIdentity, InboundEvent, StreamAttribute, StreamError,
};
use crate::core::telephony::CallTerminator;
use crate::core::transport::{MediaTransport, WsFrame};

/// Carrier-specific envelope details.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Dialect {
    pub carrier: CarrierKind,
    /// Key of the stream id in outbound frames.
    pub stream_key: &'static str,
    /// Whether `EndConversation` completes the call through the terminator.
    pub hangs_up: bool,
}

#[derive(Debug, Deserialize)]
struct InboundEnvelope {
    event: String,
    #[serde(default, rename = "streamSid", alias = "stream_sid")]
    stream_sid: Option<String>,
    #[serde(default)]
    start: Option<StartPayload>,
    #[serde(default)]
    media: Option<MediaPayload>,
}

#[derive(Debug, Deserialize)]
struct StartPayload {
    #[serde(default, rename = "streamSid", alias = "stream_sid")]
    stream_sid: Option<String>,
    #[serde(default, rename = "callSid", alias = "call_sid")]
    call_sid: Option<String>,
    #[serde(default, rename = "customParameters", alias = "custom_parameters")]
    custom_parameters: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct MediaPayload {
    payload: String,
}

#[derive(Debug, Default)]
struct Session {
    stream_sid: Option<String>,
    call_sid: Option<String>,
}

/// Streamer for JSON media envelope carriers.
pub(crate) struct EnvelopeStreamer {
    dialect: Dialect,
    base: BaseStreamer,
    channel: WsChannel,
    session: Mutex<Session>,
    terminator: Option<Arc<dyn CallTerminator>>,
}

impl EnvelopeStreamer {
    pub(crate) fn new(
        dialect: Dialect,
        transport: MediaTransport,
        identity: CallIdentity,
        buffers: BufferOptions,
        terminator: Option<Arc<dyn CallTerminator>>,
    ) -> Self {
        let session = Session {
            stream_sid: None,
            call_sid: identity.channel_id.clone(),
        };
        Self {
            base: BaseStreamer::new(identity, dialect.carrier.default_attribute(), buffers),
            channel: WsChannel::new(transport),
            session: Mutex::new(session),
            terminator,
            dialect,
        }
    }

    pub(crate) fn base(&self) -> &BaseStreamer {
        &self.base
    }

    pub(crate) fn stream_sid(&self) -> Option<String> {
        self.session.lock().stream_sid.clone()
    }

    pub(crate) async fn recv(&self) -> Result<InboundEvent, StreamError> {
        loop {
            match self.channel.read(&self.base).await? {
                WsFrame::Text(text) => {
                    if let Some(event) = self.on_text(&text)? {
                        return Ok(event);
                    }
                }
                WsFrame::Binary(data) => {
                    debug!(
                        carrier = %self.dialect.carrier,
                        bytes = data.len(),
                        "Ignoring binary frame on JSON media stream"
                    );
                }
                WsFrame::Close => return Err(self.base.fail(StreamError::EndOfStream)),
            }
        }
    }

    fn on_text(&self, text: &str) -> Result<Option<InboundEvent>, StreamError> {
        let envelope: InboundEnvelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(carrier = %self.dialect.carrier, error = %e, "Skipping malformed media frame");
                return Ok(None);
            }
        };

        match envelope.event.as_str() {
            "connected" => Ok(self.configuration()),
            "start" => {
                let start = envelope.start;
                let stream_sid = envelope
                    .stream_sid
                    .or_else(|| start.as_ref().and_then(|s| s.stream_sid.clone()));
                {
                    let mut session = self.session.lock();
                    if let Some(sid) = stream_sid {
                        session.stream_sid = Some(sid);
                    }
                    if session.call_sid.is_none() {
                        session.call_sid = start.as_ref().and_then(|s| s.call_sid.clone());
                    }
                }
                if let Some(start) = &start
                    && !start.custom_parameters.is_empty()
                {
                    debug!(parameters = ?start.custom_parameters, "Stream custom parameters");
                }
                info!(
                    carrier = %self.dialect.carrier,
                    conversation_id = %self.base.identity().conversation_id,
                    stream_sid = ?self.stream_sid(),
                    "Media stream started"
                );
                Ok(self.configuration())
            }
            "media" => {
                let Some(media) = envelope.media else {
                    return Ok(None);
                };
                match BASE64.decode(media.payload.as_bytes()) {
                    Ok(audio) => Ok(self.base.buffer_input(&audio).map(InboundEvent::Message)),
                    Err(e) => {
                        warn!(carrier = %self.dialect.carrier, error = %e, "Dropping undecodable media payload");
                        Ok(None)
                    }
                }
            }
            "stop" => {
                info!(
                    carrier = %self.dialect.carrier,
                    conversation_id = %self.base.identity().conversation_id,
                    "Media stream stopped by carrier"
                );
                self.base.begin_draining();
                Err(self.base.fail(StreamError::EndOfStream))
            }
            "dtmf" | "mark" => Ok(None),
            other => {
                warn!(carrier = %self.dialect.carrier, event = other, "Unhandled media event");
                Ok(None)
            }
        }
    }

    fn configuration(&self) -> Option<InboundEvent> {
        self.base
            .configuration(None, None)
            .map(InboundEvent::Configuration)
    }

    fn envelope(&self, event: &str, stream_sid: &str, payload: Option<&[u8]>) -> WsFrame {
        let mut map = Map::new();
        map.insert("event".into(), Value::from(event));
        map.insert(self.dialect.stream_key.into(), Value::from(stream_sid));
        if let Some(payload) = payload {
            let mut media = Map::new();
            media.insert("payload".into(), Value::from(BASE64.encode(payload)));
            map.insert("media".into(), Value::Object(media));
        }
        WsFrame::Text(Value::Object(map).to_string())
    }

    async fn write_media(&self, frames: Vec<Bytes>) -> Result<(), StreamError> {
        if frames.is_empty() {
            return Ok(());
        }
        let Some(stream_sid) = self.stream_sid() else {
            debug!(
                carrier = %self.dialect.carrier,
                frames = frames.len(),
                "Dropping outbound audio before stream start"
            );
            return Ok(());
        };
        let frames: Vec<WsFrame> = frames
            .iter()
            .map(|frame| self.envelope("media", &stream_sid, Some(frame)))
            .collect();
        self.channel.write_all(&self.base, frames).await
    }

    pub(crate) async fn send(&self, packet: Packet) -> Result<(), StreamError> {
        if !self.base.accepts_sends() {
            return Ok(());
        }
        match packet {
            Packet::Audio(chunk) => {
                let frames = self.base.buffer_output(&chunk.data);
                self.write_media(frames).await
            }
            Packet::Completion { .. } => {
                let rest = self.base.flush_output();
                self.write_media(rest.into_iter().collect()).await
            }
            Packet::Interruption { .. } => {
                self.base.reset_output();
                match self.stream_sid() {
                    Some(sid) => {
                        let clear = self.envelope("clear", &sid, None);
                        self.channel.write(&self.base, clear).await
                    }
                    None => Ok(()),
                }
            }
            Packet::Directive(Directive::EndConversation) => {
                self.end_conversation().await;
                Ok(())
            }
            Packet::Text(_) | Packet::Flush { .. } => Ok(()),
        }
    }

    async fn end_conversation(&self) {
        let call_sid = self.session.lock().call_sid.clone();
        if self.dialect.hangs_up
            && let (Some(terminator), Some(call_sid)) = (&self.terminator, call_sid)
            && let Err(e) = terminator.hangup(&call_sid).await
        {
            warn!(carrier = %self.dialect.carrier, call_sid = %call_sid, error = %e, "Failed to complete call");
        }
        self.close().await;
    }

    pub(crate) async fn close(&self) {
        self.base.close();
        self.channel.shutdown().await;
    }

    pub(crate) fn attribute(&self) -> StreamAttribute {
        self.base.attribute()
    }
}
