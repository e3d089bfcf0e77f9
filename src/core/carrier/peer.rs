//! Browser peer connections for the WebRTC carrier.
//!
//! [`RtcPeerConnector`] terminates the browser's `RTCPeerConnection` with the
//! `webrtc` crate: it answers the client's SDP offer, trickles locally
//! gathered ICE candidates back over the signaling socket, decodes the remote
//! audio track and paces assistant audio onto a local sample track.
//!
//! Audio is negotiated as Opus when built with the `opus` feature and as
//! G.711 μ-law (PCMU) otherwise. The streamer only ever sees PCM16 48 kHz.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use ::webrtc::api::APIBuilder;
use ::webrtc::api::interceptor_registry::register_default_interceptors;
use ::webrtc::api::media_engine::{MIME_TYPE_PCMU, MediaEngine};
use ::webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use ::webrtc::ice_transport::ice_server::RTCIceServer;
use ::webrtc::interceptor::registry::Registry;
use ::webrtc::media::Sample;
use ::webrtc::peer_connection::RTCPeerConnection;
use ::webrtc::peer_connection::configuration::RTCConfiguration;
use ::webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use ::webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use ::webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use ::webrtc::track::track_local::TrackLocal;
use ::webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use ::webrtc::track::track_remote::TrackRemote;

use super::webrtc::{PeerEvent, PeerSession, PeerSignaling, SignalMessage};
use crate::core::audio::{DEFAULT_FRAME_DURATION_MS, FrameCodec, PcmuCodec};
use crate::core::streamer::StreamError;

/// Public STUN server used when no ICE servers are configured.
pub const DEFAULT_ICE_SERVER: &str = "stun:stun.l.google.com:19302";

const FRAME_DURATION: Duration = Duration::from_millis(DEFAULT_FRAME_DURATION_MS as u64);

/// Room for reading RTCP on the sender side.
const RTCP_BUFFER_BYTES: usize = 1500;

fn peer_error(e: ::webrtc::Error) -> StreamError {
    StreamError::Transport(format!("WebRTC: {e}"))
}

fn sdp_error(e: ::webrtc::Error) -> StreamError {
    StreamError::Protocol(format!("Invalid SDP: {e}"))
}

// =============================================================================
// Codec negotiation
// =============================================================================

/// The one audio codec registered with the media engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RtpAudio {
    Pcmu,
    #[cfg(feature = "opus")]
    Opus,
}

impl RtpAudio {
    fn negotiated() -> Self {
        #[cfg(feature = "opus")]
        {
            Self::Opus
        }
        #[cfg(not(feature = "opus"))]
        {
            Self::Pcmu
        }
    }

    fn from_mime(mime_type: &str) -> Option<Self> {
        if mime_type.eq_ignore_ascii_case(MIME_TYPE_PCMU) {
            return Some(Self::Pcmu);
        }
        #[cfg(feature = "opus")]
        if mime_type.eq_ignore_ascii_case(::webrtc::api::media_engine::MIME_TYPE_OPUS) {
            return Some(Self::Opus);
        }
        None
    }

    fn capability(self) -> RTCRtpCodecCapability {
        match self {
            Self::Pcmu => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_PCMU.to_owned(),
                clock_rate: 8000,
                channels: 1,
                ..Default::default()
            },
            #[cfg(feature = "opus")]
            Self::Opus => RTCRtpCodecCapability {
                mime_type: ::webrtc::api::media_engine::MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
                ..Default::default()
            },
        }
    }

    fn payload_type(self) -> u8 {
        match self {
            Self::Pcmu => 0,
            #[cfg(feature = "opus")]
            Self::Opus => 111,
        }
    }

    fn codec(self) -> Result<Box<dyn FrameCodec>, StreamError> {
        match self {
            Self::Pcmu => Ok(Box::new(PcmuCodec::new())),
            #[cfg(feature = "opus")]
            Self::Opus => crate::core::audio::OpusCodec::new()
                .map(|codec| Box::new(codec) as Box<dyn FrameCodec>)
                .map_err(|e| StreamError::Codec(e.to_string())),
        }
    }
}

// =============================================================================
// Connector
// =============================================================================

/// Opens one `RTCPeerConnection` per WebRTC call.
#[derive(Debug, Clone)]
pub struct RtcPeerConnector {
    ice_servers: Vec<String>,
}

impl RtcPeerConnector {
    pub fn new(ice_servers: Vec<String>) -> Self {
        Self { ice_servers }
    }

    pub fn ice_servers(&self) -> &[String] {
        &self.ice_servers
    }

    fn rtc_configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

impl Default for RtcPeerConnector {
    fn default() -> Self {
        Self::new(vec![DEFAULT_ICE_SERVER.to_string()])
    }
}

#[async_trait]
impl PeerSignaling for RtcPeerConnector {
    async fn open(
        &self,
        conversation_id: &str,
        events: mpsc::Sender<PeerEvent>,
    ) -> Result<Arc<dyn PeerSession>, StreamError> {
        let audio = RtpAudio::negotiated();
        let outbound = audio.codec()?;

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_codec(
                RTCRtpCodecParameters {
                    capability: audio.capability(),
                    payload_type: audio.payload_type(),
                    ..Default::default()
                },
                RTPCodecType::Audio,
            )
            .map_err(peer_error)?;
        let registry =
            register_default_interceptors(Registry::new(), &mut media_engine).map_err(peer_error)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(
            api.new_peer_connection(self.rtc_configuration())
                .await
                .map_err(peer_error)?,
        );

        let track = Arc::new(TrackLocalStaticSample::new(
            audio.capability(),
            "audio".to_owned(),
            "callbridge".to_owned(),
        ));
        let sender = pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(peer_error)?;
        // RTCP has to be read for the interceptors to run.
        tokio::spawn(async move {
            let mut buf = vec![0u8; RTCP_BUFFER_BYTES];
            while sender.read(&mut buf).await.is_ok() {}
        });

        let connected = Arc::new(AtomicBool::new(false));
        watch_peer(&pc, conversation_id, &events, connected.clone());

        let generation = Arc::new(AtomicU64::new(0));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(pace_outbound(track, outbound_rx, generation.clone()));

        info!(conversation_id, codec = ?audio, "Opened WebRTC peer connection");
        Ok(Arc::new(RtcPeerSession {
            conversation_id: conversation_id.to_string(),
            pc,
            connected,
            outbound: Mutex::new(outbound),
            outbound_tx,
            generation,
        }))
    }
}

/// Wire ICE, state and track callbacks to the session's event channel.
fn watch_peer(
    pc: &RTCPeerConnection,
    conversation_id: &str,
    events: &mpsc::Sender<PeerEvent>,
    connected: Arc<AtomicBool>,
) {
    let ice_events = events.clone();
    pc.on_ice_candidate(Box::new(move |candidate| {
        let events = ice_events.clone();
        Box::pin(async move {
            let Some(candidate) = candidate else {
                return;
            };
            match candidate.to_json() {
                Ok(init) => {
                    let _ = events
                        .send(PeerEvent::Signal(SignalMessage::Ice {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                        }))
                        .await;
                }
                Err(e) => warn!(error = %e, "Skipping unserializable ICE candidate"),
            }
        })
    }));

    let state_id = conversation_id.to_string();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        info!(conversation_id = %state_id, ?state, "Peer connection state changed");
        connected.store(state == RTCPeerConnectionState::Connected, Ordering::Release);
        Box::pin(async {})
    }));

    let track_events = events.clone();
    let track_id = conversation_id.to_string();
    pc.on_track(Box::new(move |remote, _receiver, _transceiver| {
        let events = track_events.clone();
        let conversation_id = track_id.clone();
        Box::pin(async move {
            if remote.kind() == RTPCodecType::Audio {
                tokio::spawn(read_remote_audio(remote, events, conversation_id));
            }
        })
    }));
}

/// Decode the browser's audio track into PCM16 48 kHz media events.
async fn read_remote_audio(
    track: Arc<TrackRemote>,
    events: mpsc::Sender<PeerEvent>,
    conversation_id: String,
) {
    let mime_type = track.codec().capability.mime_type;
    let mut codec = match RtpAudio::from_mime(&mime_type).map(RtpAudio::codec) {
        Some(Ok(codec)) => codec,
        Some(Err(e)) => {
            warn!(conversation_id, error = %e, "Cannot decode remote audio track");
            return;
        }
        None => {
            warn!(conversation_id, mime_type, "Unsupported remote audio codec");
            return;
        }
    };
    info!(conversation_id, mime_type, "Remote audio track started");

    loop {
        match track.read_rtp().await {
            Ok((packet, _)) => {
                if packet.payload.is_empty() {
                    continue;
                }
                let Some(pcm) = codec.decode(&packet.payload) else {
                    continue;
                };
                if events.send(PeerEvent::Media(pcm)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(conversation_id, error = %e, "Remote audio track ended");
                break;
            }
        }
    }
}

/// Write encoded frames in real time. Frames queued before the latest
/// [`PeerSession::reset`] are skipped.
async fn pace_outbound(
    track: Arc<TrackLocalStaticSample>,
    mut frames: mpsc::UnboundedReceiver<(u64, Bytes)>,
    generation: Arc<AtomicU64>,
) {
    let mut ticker = tokio::time::interval(FRAME_DURATION);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    while let Some((epoch, data)) = frames.recv().await {
        if epoch != generation.load(Ordering::Acquire) {
            continue;
        }
        ticker.tick().await;
        let sample = Sample {
            data,
            duration: FRAME_DURATION,
            ..Default::default()
        };
        if let Err(e) = track.write_sample(&sample).await {
            debug!(error = %e, "Dropped outbound WebRTC frame");
        }
    }
}

// =============================================================================
// Session
// =============================================================================

struct RtcPeerSession {
    conversation_id: String,
    pc: Arc<RTCPeerConnection>,
    connected: Arc<AtomicBool>,
    outbound: Mutex<Box<dyn FrameCodec>>,
    outbound_tx: mpsc::UnboundedSender<(u64, Bytes)>,
    generation: Arc<AtomicU64>,
}

impl RtcPeerSession {
    fn queue(&self, frames: Vec<Bytes>) -> Result<(), StreamError> {
        let epoch = self.generation.load(Ordering::Acquire);
        for frame in frames {
            self.outbound_tx
                .send((epoch, frame))
                .map_err(|_| StreamError::Closed)?;
        }
        Ok(())
    }
}

#[async_trait]
impl PeerSession for RtcPeerSession {
    async fn signal(&self, signal: SignalMessage) -> Result<Vec<SignalMessage>, StreamError> {
        match signal {
            SignalMessage::Offer(sdp) => {
                let offer = RTCSessionDescription::offer(sdp).map_err(sdp_error)?;
                self.pc
                    .set_remote_description(offer)
                    .await
                    .map_err(sdp_error)?;
                let answer = self.pc.create_answer(None).await.map_err(peer_error)?;
                self.pc
                    .set_local_description(answer)
                    .await
                    .map_err(peer_error)?;
                let sdp = self
                    .pc
                    .local_description()
                    .await
                    .map(|description| description.sdp)
                    .ok_or_else(|| {
                        StreamError::Protocol("peer connection has no local description".into())
                    })?;
                info!(conversation_id = %self.conversation_id, "Answered WebRTC offer");
                Ok(vec![SignalMessage::Answer(sdp)])
            }
            SignalMessage::Answer(sdp) => {
                let answer = RTCSessionDescription::answer(sdp).map_err(sdp_error)?;
                self.pc
                    .set_remote_description(answer)
                    .await
                    .map_err(sdp_error)?;
                Ok(Vec::new())
            }
            SignalMessage::Ice {
                candidate,
                sdp_mid,
                sdp_mline_index,
            } => {
                self.pc
                    .add_ice_candidate(RTCIceCandidateInit {
                        candidate,
                        sdp_mid,
                        sdp_mline_index,
                        ..Default::default()
                    })
                    .await
                    .map_err(|e| StreamError::Protocol(format!("Invalid ICE candidate: {e}")))?;
                Ok(Vec::new())
            }
        }
    }

    fn has_media(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn write_pcm(&self, pcm: &[u8]) -> Result<(), StreamError> {
        let frames = self
            .outbound
            .lock()
            .encode(pcm)
            .map_err(|e| StreamError::Codec(e.to_string()))?;
        self.queue(frames)
    }

    async fn flush(&self) -> Result<(), StreamError> {
        let last = self
            .outbound
            .lock()
            .flush()
            .map_err(|e| StreamError::Codec(e.to_string()))?;
        self.queue(last.into_iter().collect())
    }

    fn reset(&self) {
        self.outbound.lock().reset();
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            debug!(conversation_id = %self.conversation_id, error = %e, "Peer connection close failed");
        }
    }
}
