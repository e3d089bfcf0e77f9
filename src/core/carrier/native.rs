//! Native client adapter.
//!
//! Clients speak [`ClientMessage`] JSON and may send raw audio as binary
//! frames in the negotiated input format. The gateway answers with binary
//! audio frames and [`ServerEvent`]s, including transcripts.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::{ClientMessage, ServerEvent};
use super::{WsChannel, json_frame};
use crate::core::packet::{Directive, InterruptionSource, Packet};
use crate::core::streamer::{
    BaseStreamer, BufferOptions, CallIdentity, InboundEvent, StreamAttribute, StreamError,
    StreamState, Streamer,
};
use crate::core::transport::{MediaTransport, WsFrame};

pub struct NativeStreamer {
    base: BaseStreamer,
    channel: WsChannel,
}

impl NativeStreamer {
    pub fn new(
        transport: MediaTransport,
        identity: CallIdentity,
        attribute: StreamAttribute,
        buffers: BufferOptions,
    ) -> Self {
        Self {
            base: BaseStreamer::new(identity, attribute, buffers),
            channel: WsChannel::new(transport),
        }
    }

    async fn on_message(&self, text: &str) -> Result<Option<InboundEvent>, StreamError> {
        let message = match ClientMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(carrier = "native", error = %e, "Skipping malformed client message");
                return Ok(None);
            }
        };

        match message {
            ClientMessage::Config { stt, tts } => {
                let Some(configuration) = self.base.configuration(stt, tts) else {
                    debug!("Ignoring repeated config message");
                    return Ok(None);
                };
                info!(
                    conversation_id = %configuration.identity.conversation_id,
                    "Native client configured"
                );
                let ready = ServerEvent::Ready {
                    conversation_id: configuration.identity.conversation_id.clone(),
                };
                self.channel.write(&self.base, json_frame(&ready)?).await?;
                Ok(Some(InboundEvent::Configuration(configuration)))
            }
            ClientMessage::Audio { data } => match BASE64.decode(data.as_bytes()) {
                Ok(audio) => Ok(self.base.buffer_input(&audio).map(InboundEvent::Message)),
                Err(e) => {
                    warn!(carrier = "native", error = %e, "Dropping undecodable audio");
                    Ok(None)
                }
            },
            ClientMessage::Text { text } => Ok(Some(InboundEvent::Message(Packet::text(
                self.base.identity().conversation_id.clone(),
                text,
                true,
            )))),
            ClientMessage::Interrupt => Ok(Some(InboundEvent::Message(Packet::interruption(
                InterruptionSource::Word,
            )))),
            ClientMessage::End | ClientMessage::Disconnect => {
                self.base.begin_draining();
                Err(self.base.fail(StreamError::EndOfStream))
            }
            ClientMessage::Offer { .. } | ClientMessage::Answer { .. } | ClientMessage::Ice { .. } => {
                warn!(carrier = "native", "Signaling messages require the webrtc endpoint");
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

    async fn write_event(&self, event: &ServerEvent) -> Result<(), StreamError> {
        self.channel.write(&self.base, json_frame(event)?).await
    }
}

#[async_trait]
impl Streamer for NativeStreamer {
    fn context(&self) -> CancellationToken {
        self.base.cancel_token()
    }

    async fn recv(&self) -> Result<InboundEvent, StreamError> {
        loop {
            match self.channel.read(&self.base).await? {
                WsFrame::Text(text) => {
                    if let Some(event) = self.on_message(&text).await? {
                        return Ok(event);
                    }
                }
                WsFrame::Binary(data) => {
                    if let Some(packet) = self.base.buffer_input(&data) {
                        return Ok(InboundEvent::Message(packet));
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
            Packet::Text(chunk) => {
                self.write_event(&ServerEvent::Text {
                    context_id: chunk.context_id,
                    text: chunk.text,
                    is_final: chunk.is_final,
                    confidence: chunk.confidence,
                })
                .await
            }
            Packet::Completion { context_id } => {
                let rest = self.base.flush_output();
                self.write_audio(rest.into_iter().collect()).await?;
                self.write_event(&ServerEvent::Completion { context_id }).await
            }
            Packet::Interruption { .. } => {
                self.base.reset_output();
                self.write_event(&ServerEvent::Interruption).await
            }
            Packet::Directive(Directive::EndConversation) => {
                let _ = self.write_event(&ServerEvent::End).await;
                self.base.close();
                self.channel.shutdown().await;
                Ok(())
            }
            Packet::Flush { .. } => Ok(()),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audio::AudioConfig;
    use crate::core::transport::TransportPeer;

    fn streamer() -> (NativeStreamer, TransportPeer) {
        let (transport, peer) = MediaTransport::pair();
        (
            NativeStreamer::new(
                transport,
                CallIdentity::new("asst", "conv-n"),
                StreamAttribute::symmetric(AudioConfig::linear16_16k()),
                BufferOptions::default(),
            ),
            peer,
        )
    }

    #[tokio::test]
    async fn test_config_carries_provider_selection_and_acks() {
        let (streamer, mut peer) = streamer();
        peer.send_text(r#"{"type":"config","tts":{"provider":"cartesia"}}"#);
        match streamer.recv().await.unwrap() {
            InboundEvent::Configuration(cfg) => {
                assert!(cfg.stt.is_none());
                assert_eq!(cfg.tts.unwrap().provider, "cartesia");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            peer.drain(),
            vec![WsFrame::Text(
                r#"{"type":"ready","conversation_id":"conv-n"}"#.to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_text_binary_and_base64_audio() {
        let (streamer, peer) = streamer();
        peer.send_text(r#"{"type":"text","text":"hello there"}"#);
        peer.send_binary(vec![0u8; 1000]);
        peer.send_text(format!(
            r#"{{"type":"audio","data":"{}"}}"#,
            BASE64.encode(vec![0u8; 920])
        ));
        peer.send_text(r#"{"type":"interrupt"}"#);

        match streamer.recv().await.unwrap() {
            InboundEvent::Message(Packet::Text(chunk)) => {
                assert_eq!(chunk.text, "hello there");
                assert!(chunk.is_final);
            }
            other => panic!("unexpected {other:?}"),
        }
        match streamer.recv().await.unwrap() {
            InboundEvent::Message(Packet::Audio(chunk)) => assert_eq!(chunk.data.len(), 1920),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            streamer.recv().await.unwrap(),
            InboundEvent::Message(Packet::Interruption { .. })
        ));
    }

    #[tokio::test]
    async fn test_outbound_events() {
        let (streamer, mut peer) = streamer();
        streamer.send(Packet::text("ctx", "hi", false)).await.unwrap();
        streamer.send(Packet::audio("ctx", vec![0u8; 700])).await.unwrap();
        streamer.send(Packet::completion("ctx")).await.unwrap();

        let frames = peer.drain();
        assert_eq!(frames.len(), 4);
        assert!(matches!(&frames[0], WsFrame::Text(t) if t.contains(r#""type":"text""#)));
        assert!(matches!(&frames[1], WsFrame::Binary(b) if b.len() == 640));
        assert!(matches!(&frames[2], WsFrame::Binary(b) if b.len() == 60));
        assert_eq!(
            frames[3],
            WsFrame::Text(r#"{"type":"completion","context_id":"ctx"}"#.to_string())
        );
    }

    #[tokio::test]
    async fn test_end_message_closes() {
        let (streamer, peer) = streamer();
        peer.send_text(r#"{"type":"end"}"#);
        assert_eq!(streamer.recv().await.unwrap_err(), StreamError::EndOfStream);
        assert_eq!(streamer.state(), StreamState::Closed);
    }
}
