use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::*;
use crate::core::packet::{InterruptionSource, TextChunk};
use crate::core::streamer::{CallIdentity, StreamAttribute, StreamState};
use crate::core::transformer::{EventSender, ProviderSelection, Transformer};

// =============================================================================
// Mocks
// =============================================================================

struct MockStreamer {
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<InboundEvent>>,
    sent: Mutex<Vec<Packet>>,
    sends_after_eof: AtomicUsize,
    ended: AtomicBool,
    token: CancellationToken,
    identity: CallIdentity,
    attribute: StreamAttribute,
}

impl MockStreamer {
    fn new(attribute: StreamAttribute) -> (Arc<Self>, mpsc::UnboundedSender<InboundEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                inbound: tokio::sync::Mutex::new(rx),
                sent: Mutex::new(Vec::new()),
                sends_after_eof: AtomicUsize::new(0),
                ended: AtomicBool::new(false),
                token: CancellationToken::new(),
                identity: CallIdentity::new("asst", "conv-t"),
                attribute,
            }),
            tx,
        )
    }

    fn sent(&self) -> Vec<Packet> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Streamer for MockStreamer {
    fn context(&self) -> CancellationToken {
        self.token.clone()
    }

    async fn recv(&self) -> Result<InboundEvent, StreamError> {
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            _ = self.token.cancelled() => {
                self.ended.store(true, Ordering::SeqCst);
                Err(StreamError::EndOfStream)
            }
            event = inbound.recv() => match event {
                Some(event) => Ok(event),
                None => {
                    self.ended.store(true, Ordering::SeqCst);
                    Err(StreamError::EndOfStream)
                }
            },
        }
    }

    async fn send(&self, packet: Packet) -> Result<(), StreamError> {
        if self.ended.load(Ordering::SeqCst) {
            self.sends_after_eof.fetch_add(1, Ordering::SeqCst);
        }
        self.sent.lock().push(packet);
        Ok(())
    }

    fn config(&self) -> StreamAttribute {
        self.attribute
    }

    fn state(&self) -> StreamState {
        StreamState::Active
    }

    fn identity(&self) -> &CallIdentity {
        &self.identity
    }
}

/// What one mock transformer saw, plus its event channel.
#[derive(Clone)]
struct Tracked {
    events: EventSender,
    seen: Arc<Mutex<Vec<Packet>>>,
    closes: Arc<AtomicUsize>,
}

impl Tracked {
    fn seen(&self) -> Vec<Packet> {
        self.seen.lock().clone()
    }

    async fn emit(&self, packet: Packet) {
        self.events
            .send(TransformerEvent::Packet(packet))
            .await
            .unwrap();
    }
}

struct MockTransformer {
    tracked: Tracked,
    format: AudioConfig,
    fail_initialize: bool,
}

#[async_trait]
impl Transformer for MockTransformer {
    async fn initialize(&mut self) -> Result<(), TransformerError> {
        if self.fail_initialize {
            return Err(TransformerError::Connection("refused".into()));
        }
        Ok(())
    }

    async fn transform(&mut self, packet: Packet) -> Result<(), TransformerError> {
        self.tracked.seen.lock().push(packet);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransformerError> {
        self.tracked.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

impl SpeechToText for MockTransformer {
    fn input_config(&self) -> AudioConfig {
        self.format
    }
}

impl TextToSpeech for MockTransformer {
    fn output_config(&self) -> AudioConfig {
        self.format
    }
}

#[derive(Default)]
struct MockFactory {
    stt: Mutex<Vec<Tracked>>,
    tts: Mutex<Vec<Tracked>>,
    stt_unreachable: AtomicBool,
}

impl MockFactory {
    fn tracked(events: EventSender) -> Tracked {
        Tracked {
            events,
            seen: Arc::new(Mutex::new(Vec::new())),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn stt(&self, index: usize) -> Tracked {
        self.stt.lock()[index].clone()
    }

    fn tts(&self, index: usize) -> Tracked {
        self.tts.lock()[index].clone()
    }
}

impl TransformerFactory for MockFactory {
    fn create_stt(
        &self,
        _identity: &CallIdentity,
        _selection: &ProviderSelection,
        _input: AudioConfig,
        events: EventSender,
    ) -> Result<Box<dyn SpeechToText>, TalkingError> {
        let tracked = Self::tracked(events);
        self.stt.lock().push(tracked.clone());
        Ok(Box::new(MockTransformer {
            tracked,
            format: AudioConfig::linear16_16k(),
            fail_initialize: self.stt_unreachable.load(Ordering::SeqCst),
        }))
    }

    fn create_tts(
        &self,
        _identity: &CallIdentity,
        _selection: &ProviderSelection,
        _output: AudioConfig,
        events: EventSender,
    ) -> Result<Box<dyn TextToSpeech>, TalkingError> {
        let tracked = Self::tracked(events);
        self.tts.lock().push(tracked.clone());
        Ok(Box::new(MockTransformer {
            tracked,
            format: AudioConfig::linear16_16k(),
            fail_initialize: false,
        }))
    }
}

// =============================================================================
// Helpers
// =============================================================================

async fn eventually(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

fn services(factory: Arc<MockFactory>, assistants: StaticAssistants) -> CallServices {
    CallServices {
        factory,
        assistants: Arc::new(assistants),
        handler: Arc::new(EchoResponder),
        recording_dir: None,
    }
}

fn configuration(streamer: &MockStreamer) -> InboundEvent {
    InboundEvent::Configuration(CallConfiguration {
        identity: streamer.identity.clone(),
        audio: streamer.attribute,
        stt: Some(ProviderSelection::new("mock")),
        tts: Some(ProviderSelection::new("mock")),
    })
}

type RunHandle = tokio::task::JoinHandle<(Result<(), TalkingError>, TalkingState)>;

fn spawn(streamer: Arc<MockStreamer>, services: CallServices) -> RunHandle {
    tokio::spawn(async move {
        let mut talking = Talking::new(streamer, services);
        let result = talking.run().await;
        (result, talking.state())
    })
}

fn final_transcript(text: &str) -> Packet {
    Packet::Text(TextChunk {
        context_id: "stt-1".into(),
        text: text.into(),
        is_final: true,
        confidence: Some(0.9),
        language: Some("en".into()),
    })
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_transcript_is_spoken_back_and_audio_delivered() {
    let (streamer, inbound) = MockStreamer::new(StreamAttribute::symmetric(AudioConfig::linear16_16k()));
    let factory = Arc::new(MockFactory::default());
    let handle = spawn(streamer.clone(), services(factory.clone(), StaticAssistants::new()));

    inbound.send(configuration(&streamer)).unwrap();
    inbound.send(InboundEvent::Message(Packet::audio("conv-t", vec![0u8; 640]))).unwrap();
    eventually("stt audio", || factory.stt.lock().first().is_some_and(|p| !p.seen().is_empty())).await;
    assert!(matches!(&factory.stt(0).seen()[0], Packet::Audio(chunk) if chunk.data.len() == 640));

    factory.stt(0).emit(final_transcript("hello there")).await;
    eventually("tts flush", || factory.tts(0).seen().len() == 2).await;
    let tts_seen = factory.tts(0).seen();
    let Packet::Text(spoken) = &tts_seen[0] else {
        panic!("expected text, got {:?}", tts_seen[0]);
    };
    assert_eq!(spoken.text, "hello there");
    assert_eq!(tts_seen[1], Packet::flush(spoken.context_id.clone()));
    let context_id = spoken.context_id.clone();

    let tts = factory.tts(0);
    tts.emit(Packet::audio("older-context", vec![1u8; 320])).await;
    tts.emit(Packet::audio(context_id.clone(), vec![2u8; 320])).await;
    tts.emit(Packet::completion(context_id.clone())).await;
    eventually("completion", || {
        streamer.sent().iter().any(|p| matches!(p, Packet::Completion { .. }))
    })
    .await;

    let sent = streamer.sent();
    assert!(matches!(&sent[0], Packet::Text(chunk) if chunk.text == "hello there"));
    let audio: Vec<_> = sent
        .iter()
        .filter_map(|p| match p {
            Packet::Audio(chunk) => Some(chunk),
            _ => None,
        })
        .collect();
    assert_eq!(audio.len(), 1);
    assert_eq!(audio[0].context_id, context_id);
    assert_eq!(audio[0].data[0], 2);

    drop(inbound);
    let (result, state) = handle.await.unwrap();
    assert!(result.is_ok());
    assert_eq!(state, TalkingState::Disconnected);
    assert_eq!(factory.stt(0).closes.load(Ordering::SeqCst), 1);
    assert_eq!(factory.tts(0).closes.load(Ordering::SeqCst), 1);
    assert_eq!(streamer.sends_after_eof.load(Ordering::SeqCst), 0);
    assert!(streamer.token.is_cancelled());
}

#[tokio::test]
async fn test_barge_in_clears_both_directions_and_drops_old_audio() {
    let (streamer, inbound) = MockStreamer::new(StreamAttribute::symmetric(AudioConfig::linear16_16k()));
    let factory = Arc::new(MockFactory::default());
    let handle = spawn(streamer.clone(), services(factory.clone(), StaticAssistants::new()));

    inbound.send(configuration(&streamer)).unwrap();
    eventually("connect", || !factory.stt.lock().is_empty() && !factory.tts.lock().is_empty()).await;

    factory.stt(0).emit(final_transcript("first")).await;
    eventually("tts text", || factory.tts(0).seen().len() == 2).await;
    let Packet::Flush { context_id } = factory.tts(0).seen()[1].clone() else {
        panic!("expected flush");
    };

    factory
        .stt(0)
        .emit(Packet::interruption(InterruptionSource::Word))
        .await;
    eventually("tts interruption", || factory.tts(0).seen().len() == 3).await;
    assert!(matches!(factory.tts(0).seen()[2], Packet::Interruption { .. }));

    factory.tts(0).emit(Packet::audio(context_id, vec![0u8; 320])).await;
    factory.stt(0).emit(Packet::interruption(InterruptionSource::Vad)).await;
    eventually("second interruption", || factory.tts(0).seen().len() == 4).await;

    let sent = streamer.sent();
    assert_eq!(
        sent.iter().filter(|p| matches!(p, Packet::Interruption { .. })).count(),
        2
    );
    assert!(!sent.iter().any(|p| matches!(p, Packet::Audio(_))));

    drop(inbound);
    assert!(handle.await.unwrap().0.is_ok());
}

#[tokio::test]
async fn test_fatal_provider_error_ends_call() {
    let (streamer, inbound) = MockStreamer::new(StreamAttribute::symmetric(AudioConfig::linear16_16k()));
    let factory = Arc::new(MockFactory::default());
    let handle = spawn(streamer.clone(), services(factory.clone(), StaticAssistants::new()));

    inbound.send(configuration(&streamer)).unwrap();
    eventually("connect", || !factory.tts.lock().is_empty()).await;
    factory
        .tts(0)
        .events
        .send(TransformerEvent::Fatal(TransformerError::Provider("boom".into())))
        .await
        .unwrap();

    let (result, state) = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        result,
        Err(TalkingError::Transformer(TransformerError::Provider(_)))
    ));
    assert_eq!(state, TalkingState::Disconnected);
    assert_eq!(factory.stt(0).closes.load(Ordering::SeqCst), 1);
    assert_eq!(factory.tts(0).closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_stt_initialize_closes_it() {
    let (streamer, inbound) = MockStreamer::new(StreamAttribute::symmetric(AudioConfig::linear16_16k()));
    let factory = Arc::new(MockFactory::default());
    factory.stt_unreachable.store(true, Ordering::SeqCst);
    let handle = spawn(streamer.clone(), services(factory.clone(), StaticAssistants::new()));

    inbound.send(configuration(&streamer)).unwrap();
    let (result, state) = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        result,
        Err(TalkingError::Transformer(TransformerError::Connection(_)))
    ));
    assert_eq!(state, TalkingState::Disconnected);
    assert_eq!(factory.stt(0).closes.load(Ordering::SeqCst), 1);
    assert!(factory.tts.lock().is_empty());
}

#[tokio::test]
async fn test_reconfiguration_replaces_transformers() {
    let (streamer, inbound) = MockStreamer::new(StreamAttribute::symmetric(AudioConfig::linear16_16k()));
    let factory = Arc::new(MockFactory::default());
    let handle = spawn(streamer.clone(), services(factory.clone(), StaticAssistants::new()));

    inbound.send(configuration(&streamer)).unwrap();
    inbound.send(configuration(&streamer)).unwrap();
    eventually("second connect", || factory.stt.lock().len() == 2).await;
    assert_eq!(factory.stt(0).closes.load(Ordering::SeqCst), 1);
    assert_eq!(factory.tts(0).closes.load(Ordering::SeqCst), 1);
    assert_eq!(factory.stt(1).closes.load(Ordering::SeqCst), 0);

    drop(inbound);
    assert!(handle.await.unwrap().0.is_ok());
    assert_eq!(factory.stt(1).closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_missing_provider_selection_is_fatal() {
    let (streamer, inbound) = MockStreamer::new(StreamAttribute::symmetric(AudioConfig::linear16_16k()));
    let factory = Arc::new(MockFactory::default());
    let handle = spawn(streamer.clone(), services(factory.clone(), StaticAssistants::new()));

    inbound
        .send(InboundEvent::Configuration(CallConfiguration {
            identity: streamer.identity.clone(),
            audio: streamer.attribute,
            stt: None,
            tts: None,
        }))
        .unwrap();
    let (result, state) = handle.await.unwrap();
    assert!(matches!(result, Err(TalkingError::Configuration(_))));
    assert_eq!(state, TalkingState::Disconnected);
    assert!(factory.stt.lock().is_empty());
}

#[tokio::test]
async fn test_profile_supplies_providers_and_greeting() {
    let (streamer, inbound) = MockStreamer::new(StreamAttribute::symmetric(AudioConfig::linear16_16k()));
    let factory = Arc::new(MockFactory::default());
    let mut profile = AssistantProfile::new(ProviderSelection::new("mock"), ProviderSelection::new("mock"));
    profile.greeting = Some("Welcome".into());
    let handle = spawn(
        streamer.clone(),
        services(factory.clone(), StaticAssistants::new().with_profile("asst", profile)),
    );

    inbound
        .send(InboundEvent::Configuration(CallConfiguration {
            identity: streamer.identity.clone(),
            audio: streamer.attribute,
            stt: None,
            tts: None,
        }))
        .unwrap();
    eventually("greeting", || factory.tts.lock().first().is_some_and(|p| p.seen().len() == 2)).await;
    assert!(matches!(&factory.tts(0).seen()[0], Packet::Text(chunk) if chunk.text == "Welcome"));

    drop(inbound);
    assert!(handle.await.unwrap().0.is_ok());
}

#[tokio::test]
async fn test_carrier_audio_is_resampled_both_ways() {
    let (streamer, inbound) = MockStreamer::new(StreamAttribute::symmetric(AudioConfig::mulaw_8k()));
    let factory = Arc::new(MockFactory::default());
    let handle = spawn(streamer.clone(), services(factory.clone(), StaticAssistants::new()));

    inbound.send(configuration(&streamer)).unwrap();
    inbound
        .send(InboundEvent::Message(Packet::audio("conv-t", vec![0xffu8; 160])))
        .unwrap();
    eventually("stt audio", || factory.stt.lock().first().is_some_and(|p| !p.seen().is_empty())).await;
    // 20 ms of 8 kHz μ-law becomes 20 ms of 16 kHz PCM16.
    assert!(matches!(&factory.stt(0).seen()[0], Packet::Audio(chunk) if chunk.data.len() == 640));

    factory.stt(0).emit(final_transcript("ok")).await;
    eventually("tts text", || factory.tts(0).seen().len() == 2).await;
    let context_id = factory.tts(0).seen()[1].context_id().unwrap().to_string();
    factory.tts(0).emit(Packet::audio(context_id, vec![0u8; 640])).await;
    eventually("carrier audio", || streamer.sent().iter().any(|p| matches!(p, Packet::Audio(_)))).await;
    let sent = streamer.sent();
    let audio = sent
        .iter()
        .find_map(|p| match p {
            Packet::Audio(chunk) => Some(chunk),
            _ => None,
        })
        .unwrap();
    assert_eq!(audio.data.len(), 160);

    drop(inbound);
    assert!(handle.await.unwrap().0.is_ok());
}

#[tokio::test]
async fn test_packets_before_configuration_are_dropped() {
    let (streamer, inbound) = MockStreamer::new(StreamAttribute::symmetric(AudioConfig::linear16_16k()));
    let factory = Arc::new(MockFactory::default());
    let handle = spawn(streamer.clone(), services(factory.clone(), StaticAssistants::new()));

    inbound.send(InboundEvent::Message(Packet::audio("conv-t", vec![0u8; 640]))).unwrap();
    inbound.send(configuration(&streamer)).unwrap();
    eventually("connect", || !factory.stt.lock().is_empty()).await;
    drop(inbound);
    assert!(handle.await.unwrap().0.is_ok());
    assert!(factory.stt(0).seen().is_empty());
}

#[tokio::test]
async fn test_disconnect_runs_once() {
    let (streamer, inbound) = MockStreamer::new(StreamAttribute::symmetric(AudioConfig::linear16_16k()));
    let factory = Arc::new(MockFactory::default());
    let mut talking = Talking::new(streamer.clone(), services(factory.clone(), StaticAssistants::new()));
    talking.connect(match configuration(&streamer) {
        InboundEvent::Configuration(cfg) => cfg,
        InboundEvent::Message(_) => unreachable!(),
    })
    .await
    .unwrap();
    assert_eq!(talking.state(), TalkingState::Active);

    talking.disconnect().await;
    talking.disconnect().await;
    assert_eq!(factory.stt(0).closes.load(Ordering::SeqCst), 1);
    assert_eq!(factory.tts(0).closes.load(Ordering::SeqCst), 1);
    assert_eq!(talking.state(), TalkingState::Disconnected);
    drop(inbound);
}
