//! WebRTC adapter over a signaling WebSocket.
//!
//! The socket carries [`ClientMessage`] JSON (config, SDP offer/answer, ICE
//! candidates). The first offer opens a [`PeerSession`] through the
//! configured [`PeerSignaling`]; its answer and locally gathered candidates
//! go back over the socket, and remote track audio arrives as PCM16 48 kHz.
//!
//! Clients without a peer connection may stream media over the socket
//! instead: binary 20 ms frames at 48 kHz, Opus when built with the `opus`
//! feature and raw PCM16 otherwise. A frame that fails to decode is dropped.
//! Outbound audio follows the peer once it is connected.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::{ClientMessage, ServerEvent};
use super::{CarrierKind, WsChannel, json_frame};
use crate::core::audio::FrameCodec;
use crate::core::packet::{Directive, InterruptionSource, Packet};
use crate::core::streamer::{
    BaseStreamer, BufferOptions, CallIdentity, InboundEvent, StreamAttribute, StreamError,
    StreamState, Streamer,
};
use crate::core::transport::{MediaTransport, WsFrame};

/// Peer events queued before the streamer reads them.
const PEER_EVENT_CAPACITY: usize = 256;

// =============================================================================
// Signaling
// =============================================================================

/// SDP and ICE messages exchanged with the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalMessage {
    Offer(String),
    Answer(String),
    Ice {
        candidate: String,
        sdp_mid: Option<String>,
        sdp_mline_index: Option<u16>,
    },
}

impl SignalMessage {
    fn into_event(self) -> ServerEvent {
        match self {
            SignalMessage::Offer(sdp) => ServerEvent::Offer { sdp },
            SignalMessage::Answer(sdp) => ServerEvent::Answer { sdp },
            SignalMessage::Ice {
                candidate,
                sdp_mid,
                sdp_mline_index,
            } => ServerEvent::Ice {
                candidate,
                sdp_mid,
                sdp_mline_index,
            },
        }
    }
}

/// Raised by a peer session outside of any client request.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// Signal for the client, typically a trickled ICE candidate.
    Signal(SignalMessage),
    /// Decoded remote audio, PCM16 48 kHz mono.
    Media(Bytes),
}

/// Opens the peer connection that terminates a WebRTC call.
#[async_trait]
pub trait PeerSignaling: Send + Sync {
    /// Start a session. Asynchronous signals and media go to `events`.
    async fn open(
        &self,
        conversation_id: &str,
        events: mpsc::Sender<PeerEvent>,
    ) -> Result<Arc<dyn PeerSession>, StreamError>;
}

/// One live peer connection.
#[async_trait]
pub trait PeerSession: Send + Sync {
    /// Apply a client signal and return the signals to send back.
    async fn signal(&self, signal: SignalMessage) -> Result<Vec<SignalMessage>, StreamError>;

    /// Whether outbound audio should go to the peer instead of the socket.
    fn has_media(&self) -> bool;

    /// Queue PCM16 48 kHz for the local track.
    async fn write_pcm(&self, pcm: &[u8]) -> Result<(), StreamError>;

    /// Pad and queue the partial frame.
    async fn flush(&self) -> Result<(), StreamError>;

    /// Drop queued and partial output.
    fn reset(&self);

    async fn close(&self);
}

// =============================================================================
// Streamer
// =============================================================================

pub struct WebRtcStreamer {
    base: BaseStreamer,
    channel: WsChannel,
    codec: Mutex<Box<dyn FrameCodec>>,
    signaling: Arc<dyn PeerSignaling>,
    session: Mutex<Option<Arc<dyn PeerSession>>>,
    peer_tx: mpsc::Sender<PeerEvent>,
    peer_rx: tokio::sync::Mutex<mpsc::Receiver<PeerEvent>>,
}

impl WebRtcStreamer {
    pub fn new(
        transport: MediaTransport,
        identity: CallIdentity,
        codec: Box<dyn FrameCodec>,
        signaling: Arc<dyn PeerSignaling>,
        buffers: BufferOptions,
    ) -> Self {
        let (peer_tx, peer_rx) = mpsc::channel(PEER_EVENT_CAPACITY);
        Self {
            base: BaseStreamer::new(identity, CarrierKind::WebRtc.default_attribute(), buffers),
            channel: WsChannel::new(transport),
            codec: Mutex::new(codec),
            signaling,
            session: Mutex::new(None),
            peer_tx,
            peer_rx: tokio::sync::Mutex::new(peer_rx),
        }
    }

    fn session(&self) -> Option<Arc<dyn PeerSession>> {
        self.session.lock().clone()
    }

    /// Session for outbound media, if the peer is connected.
    fn media_session(&self) -> Option<Arc<dyn PeerSession>> {
        self.session().filter(|session| session.has_media())
    }

    async fn open_session(&self) -> Result<Arc<dyn PeerSession>, StreamError> {
        if let Some(session) = self.session() {
            return Ok(session);
        }
        let conversation_id = self.base.identity().conversation_id.clone();
        let session = self
            .signaling
            .open(&conversation_id, self.peer_tx.clone())
            .await?;
        let mut slot = self.session.lock();
        Ok(slot.get_or_insert(session).clone())
    }

    async fn close_session(&self) {
        let session = self.session.lock().take();
        if let Some(session) = session {
            session.close().await;
        }
    }

    fn decode_frame(&self, frame: &[u8]) -> Option<Packet> {
        let pcm = self.codec.lock().decode(frame);
        match pcm {
            Some(pcm) => self.base.buffer_input(&pcm),
            None => {
                debug!(bytes = frame.len(), "Dropped undecodable media frame");
                None
            }
        }
    }

    async fn relay(&self, signal: SignalMessage) -> Result<(), StreamError> {
        let conversation_id = self.base.identity().conversation_id.clone();
        let session = match signal {
            SignalMessage::Offer(_) => self.open_session().await.map(Some),
            _ => Ok(self.session()),
        };
        let replies = match session {
            Ok(Some(session)) => session.signal(signal).await,
            Ok(None) => {
                debug!(conversation_id = %conversation_id, ?signal, "Signal before offer, dropping");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        };
        let replies = match replies {
            Ok(replies) => replies,
            Err(e) => {
                warn!(conversation_id = %conversation_id, error = %e, "Peer signaling failed");
                return self
                    .write_event(&ServerEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
            }
        };
        for reply in replies {
            self.write_event(&reply.into_event()).await?;
        }
        Ok(())
    }

    async fn on_peer_event(&self, event: PeerEvent) -> Result<Option<Packet>, StreamError> {
        match event {
            PeerEvent::Signal(signal) => {
                self.write_event(&signal.into_event()).await?;
                Ok(None)
            }
            PeerEvent::Media(pcm) => Ok(self.base.buffer_input(&pcm)),
        }
    }

    async fn on_message(&self, text: &str) -> Result<Option<InboundEvent>, StreamError> {
        let message = match ClientMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(carrier = "webrtc", error = %e, "Skipping malformed signaling message");
                return Ok(None);
            }
        };

        match message {
            ClientMessage::Config { stt, tts } => {
                let Some(configuration) = self.base.configuration(stt, tts) else {
                    return Ok(None);
                };
                info!(
                    conversation_id = %configuration.identity.conversation_id,
                    "WebRTC session configured"
                );
                self.write_event(&ServerEvent::Ready {
                    conversation_id: configuration.identity.conversation_id.clone(),
                })
                .await?;
                Ok(Some(InboundEvent::Configuration(configuration)))
            }
            ClientMessage::Offer { sdp } => {
                self.relay(SignalMessage::Offer(sdp)).await?;
                Ok(None)
            }
            ClientMessage::Answer { sdp } => {
                self.relay(SignalMessage::Answer(sdp)).await?;
                Ok(None)
            }
            ClientMessage::Ice {
                candidate,
                sdp_mid,
                sdp_mline_index,
            } => {
                self.relay(SignalMessage::Ice {
                    candidate,
                    sdp_mid,
                    sdp_mline_index,
                })
                .await?;
                Ok(None)
            }
            ClientMessage::Audio { data } => match BASE64.decode(data.as_bytes()) {
                Ok(frame) => Ok(self.decode_frame(&frame).map(InboundEvent::Message)),
                Err(e) => {
                    warn!(carrier = "webrtc", error = %e, "Dropping undecodable audio");
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
                self.close_session().await;
                Err(self.base.fail(StreamError::EndOfStream))
            }
        }
    }

    async fn on_frame(&self, frame: WsFrame) -> Result<Option<InboundEvent>, StreamError> {
        match frame {
            WsFrame::Binary(frame) => Ok(self.decode_frame(&frame).map(InboundEvent::Message)),
            WsFrame::Text(text) => self.on_message(&text).await,
            WsFrame::Close => {
                self.close_session().await;
                Err(self.base.fail(StreamError::EndOfStream))
            }
        }
    }

    async fn write_frames(&self, frames: Vec<Bytes>) -> Result<(), StreamError> {
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

    async fn send_audio(&self, pcm: &[u8]) -> Result<(), StreamError> {
        if let Some(session) = self.media_session() {
            return session.write_pcm(pcm).await;
        }
        let frames = self
            .codec
            .lock()
            .encode(pcm)
            .map_err(|e| StreamError::Codec(e.to_string()))?;
        self.write_frames(frames).await
    }

    async fn flush_audio(&self) -> Result<(), StreamError> {
        if let Some(session) = self.media_session() {
            return session.flush().await;
        }
        let last = self
            .codec
            .lock()
            .flush()
            .map_err(|e| StreamError::Codec(e.to_string()))?;
        self.write_frames(last.into_iter().collect()).await
    }
}

#[async_trait]
impl Streamer for WebRtcStreamer {
    fn context(&self) -> CancellationToken {
        self.base.cancel_token()
    }

    async fn recv(&self) -> Result<InboundEvent, StreamError> {
        let mut peer_rx = self.peer_rx.lock().await;
        loop {
            let event = tokio::select! {
                biased;
                Some(event) = peer_rx.recv() => {
                    self.on_peer_event(event).await?.map(InboundEvent::Message)
                }
                frame = self.channel.read(&self.base) => self.on_frame(frame?).await?,
            };
            if let Some(event) = event {
                return Ok(event);
            }
        }
    }

    /// Outbound audio is PCM16 at 48 kHz.
    async fn send(&self, packet: Packet) -> Result<(), StreamError> {
        if !self.base.accepts_sends() {
            return Ok(());
        }
        match packet {
            Packet::Audio(chunk) => self.send_audio(&chunk.data).await,
            Packet::Completion { context_id } => {
                self.flush_audio().await?;
                self.write_event(&ServerEvent::Completion { context_id }).await
            }
            Packet::Interruption { .. } => {
                self.codec.lock().reset();
                if let Some(session) = self.session() {
                    session.reset();
                }
                self.write_event(&ServerEvent::Interruption).await
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
            Packet::Directive(Directive::EndConversation) => {
                let _ = self.write_event(&ServerEvent::End).await;
                self.base.close();
                self.close_session().await;
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

impl Drop for WebRtcStreamer {
    fn drop(&mut self) {
        let Some(session) = self.session.get_mut().take() else {
            return;
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { session.close().await });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::core::audio::PassthroughCodec;
    use crate::core::transport::TransportPeer;

    /// Answers offers, records outbound audio and exposes the event sender.
    #[derive(Default)]
    struct FakeSession {
        connected: AtomicBool,
        written: Mutex<Vec<usize>>,
        flushes: Mutex<usize>,
        resets: Mutex<usize>,
        closed: AtomicBool,
    }

    #[async_trait]
    impl PeerSession for FakeSession {
        async fn signal(&self, signal: SignalMessage) -> Result<Vec<SignalMessage>, StreamError> {
            match signal {
                SignalMessage::Offer(sdp) if sdp.starts_with("v=0") => Ok(vec![
                    SignalMessage::Answer("v=0 answer".into()),
                    SignalMessage::Ice {
                        candidate: "candidate:1".into(),
                        sdp_mid: Some("0".into()),
                        sdp_mline_index: Some(0),
                    },
                ]),
                SignalMessage::Offer(_) => Err(StreamError::Protocol("Invalid SDP".into())),
                _ => Ok(Vec::new()),
            }
        }

        fn has_media(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn write_pcm(&self, pcm: &[u8]) -> Result<(), StreamError> {
            self.written.lock().push(pcm.len());
            Ok(())
        }

        async fn flush(&self) -> Result<(), StreamError> {
            *self.flushes.lock() += 1;
            Ok(())
        }

        fn reset(&self) {
            *self.resets.lock() += 1;
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct FakeSignaling {
        session: Arc<FakeSession>,
        opened: Mutex<usize>,
        events: Mutex<Option<mpsc::Sender<PeerEvent>>>,
    }

    #[async_trait]
    impl PeerSignaling for FakeSignaling {
        async fn open(
            &self,
            _conversation_id: &str,
            events: mpsc::Sender<PeerEvent>,
        ) -> Result<Arc<dyn PeerSession>, StreamError> {
            *self.opened.lock() += 1;
            *self.events.lock() = Some(events);
            Ok(self.session.clone())
        }
    }

    impl FakeSignaling {
        fn events(&self) -> mpsc::Sender<PeerEvent> {
            self.events.lock().clone().expect("session opened")
        }
    }

    fn streamer(signaling: Arc<FakeSignaling>) -> (WebRtcStreamer, TransportPeer) {
        let (transport, peer) = MediaTransport::pair();
        (
            WebRtcStreamer::new(
                transport,
                CallIdentity::new("asst", "conv-w"),
                Box::new(PassthroughCodec::default()),
                signaling,
                BufferOptions::default(),
            ),
            peer,
        )
    }

    async fn connected_streamer() -> (WebRtcStreamer, TransportPeer, Arc<FakeSignaling>) {
        let signaling = Arc::new(FakeSignaling::default());
        let (streamer, mut peer) = streamer(signaling.clone());
        peer.send_text(r#"{"type":"offer","sdp":"v=0 offer"}"#);
        peer.send_text(r#"{"type":"config"}"#);
        assert!(matches!(
            streamer.recv().await.unwrap(),
            InboundEvent::Configuration(_)
        ));
        peer.drain();
        signaling.session.connected.store(true, Ordering::SeqCst);
        (streamer, peer, signaling)
    }

    #[tokio::test]
    async fn test_offer_opens_session_and_is_answered() {
        let signaling = Arc::new(FakeSignaling::default());
        let (streamer, mut peer) = streamer(signaling.clone());
        peer.send_text(r#"{"type":"offer","sdp":"v=0 offer"}"#);
        peer.send_text(r#"{"type":"ice","candidate":"candidate:9","sdpMid":"0"}"#);
        peer.send_text(r#"{"type":"config"}"#);
        assert!(matches!(
            streamer.recv().await.unwrap(),
            InboundEvent::Configuration(_)
        ));
        assert_eq!(*signaling.opened.lock(), 1);
        let frames = peer.drain();
        assert_eq!(frames.len(), 3);
        assert_eq!(
            frames[0],
            WsFrame::Text(r#"{"type":"answer","sdp":"v=0 answer"}"#.to_string())
        );
        assert!(matches!(&frames[1], WsFrame::Text(t) if t.contains(r#""sdpMid":"0""#)));
        assert!(matches!(&frames[2], WsFrame::Text(t) if t.contains(r#""type":"ready""#)));
    }

    #[tokio::test]
    async fn test_rejected_offer_reports_error() {
        let signaling = Arc::new(FakeSignaling::default());
        let (streamer, mut peer) = streamer(signaling);
        peer.send_text(r#"{"type":"offer","sdp":"garbage"}"#);
        peer.send_text(r#"{"type":"config"}"#);
        streamer.recv().await.unwrap();
        let frames = peer.drain();
        assert!(matches!(&frames[0], WsFrame::Text(t) if t.contains(r#""type":"error""#)));
    }

    #[tokio::test]
    async fn test_trickled_candidates_reach_client() {
        let (streamer, mut peer, signaling) = connected_streamer().await;
        signaling
            .events()
            .send(PeerEvent::Signal(SignalMessage::Ice {
                candidate: "candidate:2".into(),
                sdp_mid: Some("0".into()),
                sdp_mline_index: Some(0),
            }))
            .await
            .unwrap();
        for _ in 0..3 {
            signaling
                .events()
                .send(PeerEvent::Media(Bytes::from(vec![0u8; 1920])))
                .await
                .unwrap();
        }
        // Remote track audio is buffered like socket media.
        match streamer.recv().await.unwrap() {
            InboundEvent::Message(Packet::Audio(chunk)) => assert_eq!(chunk.data.len(), 5760),
            other => panic!("unexpected {other:?}"),
        }
        let frames = peer.drain();
        assert_eq!(frames.len(), 1);
        assert!(matches!(&frames[0], WsFrame::Text(t) if t.contains("candidate:2")));
    }

    #[tokio::test]
    async fn test_outbound_audio_follows_connected_peer() {
        let (streamer, mut peer, signaling) = connected_streamer().await;
        streamer
            .send(Packet::audio("c", vec![1u8; 3000]))
            .await
            .unwrap();
        streamer
            .send(Packet::interruption(InterruptionSource::Word))
            .await
            .unwrap();
        streamer.send(Packet::completion("c")).await.unwrap();

        assert_eq!(*signaling.session.written.lock(), vec![3000]);
        assert_eq!(*signaling.session.resets.lock(), 1);
        assert_eq!(*signaling.session.flushes.lock(), 1);
        // Only control events use the socket.
        assert_eq!(
            peer.drain(),
            vec![
                WsFrame::Text(r#"{"type":"interruption"}"#.to_string()),
                WsFrame::Text(r#"{"type":"completion","context_id":"c"}"#.to_string()),
            ]
        );

        streamer
            .send(Packet::Directive(Directive::EndConversation))
            .await
            .unwrap();
        assert!(signaling.session.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_inbound_frames_buffer_60ms_of_pcm() {
        let (streamer, peer) = streamer(Arc::new(FakeSignaling::default()));
        // Two 20 ms frames stay buffered, the third crosses 60 ms.
        for _ in 0..3 {
            peer.send_binary(vec![0u8; 1920]);
        }
        match streamer.recv().await.unwrap() {
            InboundEvent::Message(Packet::Audio(chunk)) => assert_eq!(chunk.data.len(), 5760),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_outbound_frame_count_and_flush() {
        let (streamer, mut peer) = streamer(Arc::new(FakeSignaling::default()));
        streamer
            .send(Packet::audio("c", vec![1u8; 1920 * 3 + 100]))
            .await
            .unwrap();
        let frames = peer.drain();
        assert_eq!(frames.len(), 3);

        streamer.send(Packet::completion("c")).await.unwrap();
        let frames = peer.drain();
        assert_eq!(frames.len(), 2);
        assert!(matches!(&frames[0], WsFrame::Binary(b) if b.len() == 1920));
        assert!(matches!(&frames[1], WsFrame::Text(t) if t.contains("completion")));
    }

    #[tokio::test]
    async fn test_interruption_discards_partial_frame() {
        let (streamer, mut peer) = streamer(Arc::new(FakeSignaling::default()));
        streamer.send(Packet::audio("c", vec![1u8; 1000])).await.unwrap();
        streamer
            .send(Packet::interruption(InterruptionSource::Word))
            .await
            .unwrap();
        streamer.send(Packet::completion("c")).await.unwrap();
        let frames = peer.drain();
        assert_eq!(
            frames,
            vec![
                WsFrame::Text(r#"{"type":"interruption"}"#.to_string()),
                WsFrame::Text(r#"{"type":"completion","context_id":"c"}"#.to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_disconnect_ends_stream_and_closes_peer() {
        let (streamer, peer, signaling) = connected_streamer().await;
        peer.send_text(r#"{"type":"disconnect"}"#);
        assert_eq!(streamer.recv().await.unwrap_err(), StreamError::EndOfStream);
        assert!(signaling.session.closed.load(Ordering::SeqCst));
        streamer.send(Packet::text("c", "late", true)).await.unwrap();
        assert_eq!(streamer.state(), StreamState::Closed);
    }
}
