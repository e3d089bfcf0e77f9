//! Deepgram-style listen (STT) and speak (TTS) WebSocket mocks

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{accept_async, tungstenite::Message};

use super::MockStats;

/// How the listen mock answers audio.
#[derive(Debug, Clone)]
pub struct ListenBehavior {
    /// Final transcript sent after the first audio frame of a connection.
    pub transcript: String,
    pub confidence: f64,
    /// Close the first connection on its first audio frame without answering.
    pub drop_first_connection: bool,
    /// Drop the first connection's TCP stream on its first audio frame,
    /// skipping the close handshake.
    pub abort_first_connection: bool,
}

impl ListenBehavior {
    pub fn transcript(text: &str) -> Self {
        Self {
            transcript: text.to_string(),
            confidence: 0.97,
            drop_first_connection: false,
            abort_first_connection: false,
        }
    }

    pub fn dropping_first_connection(mut self) -> Self {
        self.drop_first_connection = true;
        self
    }

    pub fn aborting_first_connection(mut self) -> Self {
        self.abort_first_connection = true;
        self
    }
}

/// A running mock and what it has seen.
pub struct MockProvider {
    pub addr: SocketAddr,
    pub stats: Arc<MockStats>,
    handle: tokio::task::JoinHandle<()>,
}

impl MockProvider {
    pub(crate) fn new(
        addr: SocketAddr,
        stats: Arc<MockStats>,
        handle: tokio::task::JoinHandle<()>,
    ) -> Self {
        Self {
            addr,
            stats,
            handle,
        }
    }

    /// `endpoint` option value pointing at this mock.
    pub fn endpoint(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }
}

impl Drop for MockProvider {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn message_type(text: &str) -> Option<(String, Value)> {
    let value: Value = serde_json::from_str(text).ok()?;
    let kind = value.get("type")?.as_str()?.to_string();
    Some((kind, value))
}

async fn handle_listen_connection(
    stream: TcpStream,
    stats: Arc<MockStats>,
    behavior: ListenBehavior,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = accept_async(stream).await?;
    let (mut write, mut read) = ws_stream.split();
    let connection = stats.connections.fetch_add(1, Ordering::AcqRel) + 1;

    write
        .send(Message::Text(
            json!({"type": "Metadata", "request_id": format!("mock-{connection}")})
                .to_string()
                .into(),
        ))
        .await?;

    let mut answered = false;
    while let Some(msg) = read.next().await {
        match msg? {
            Message::Binary(audio) => {
                stats.audio_bytes.fetch_add(audio.len() as u64, Ordering::AcqRel);
                if behavior.abort_first_connection && connection == 1 {
                    // Dropping both halves closes the socket with no close frame
                    return Ok(());
                }
                if behavior.drop_first_connection && connection == 1 {
                    write
                        .send(Message::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "mock restart".into(),
                        })))
                        .await?;
                    // Wait for the client to finish the close handshake
                    while let Some(Ok(_)) = read.next().await {}
                    return Ok(());
                }
                if !answered {
                    answered = true;
                    let results = json!({
                        "type": "Results",
                        "is_final": true,
                        "speech_final": true,
                        "channel": {
                            "alternatives": [{
                                "transcript": behavior.transcript,
                                "confidence": behavior.confidence,
                                "languages": ["en"]
                            }]
                        }
                    });
                    write.send(Message::Text(results.to_string().into())).await?;
                }
            }
            Message::Text(text) => {
                if let Some((kind, _)) = message_type(&text) {
                    let close = kind == "CloseStream";
                    stats.messages.lock().push(kind);
                    if close {
                        break;
                    }
                }
            }
            Message::Ping(data) => write.send(Message::Pong(data)).await?,
            Message::Close(_) => break,
            _ => {}
        }
    }
    Ok(())
}

async fn handle_speak_connection(
    stream: TcpStream,
    stats: Arc<MockStats>,
    audio: Bytes,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = accept_async(stream).await?;
    let (mut write, mut read) = ws_stream.split();
    stats.connections.fetch_add(1, Ordering::AcqRel);

    let mut sequence = 0u64;
    while let Some(msg) = read.next().await {
        match msg? {
            Message::Text(text) => {
                let Some((kind, value)) = message_type(&text) else {
                    continue;
                };
                stats.messages.lock().push(kind.clone());
                match kind.as_str() {
                    "Speak" => {
                        let spoken = value
                            .get("text")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string();
                        stats.spoken.lock().push(spoken);
                    }
                    "Flush" => {
                        write.send(Message::Binary(audio.clone())).await?;
                        write
                            .send(Message::Text(
                                json!({"type": "Flushed", "sequence_id": sequence})
                                    .to_string()
                                    .into(),
                            ))
                            .await?;
                        sequence += 1;
                    }
                    "Clear" => {
                        write
                            .send(Message::Text(
                                json!({"type": "Cleared", "sequence_id": sequence})
                                    .to_string()
                                    .into(),
                            ))
                            .await?;
                    }
                    "Close" => break,
                    _ => {}
                }
            }
            Message::Ping(data) => write.send(Message::Pong(data)).await?,
            Message::Close(_) => break,
            _ => {}
        }
    }
    Ok(())
}

/// Start a listen mock on an ephemeral port.
pub async fn spawn_listen_mock(behavior: ListenBehavior) -> MockProvider {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind listen mock");
    let addr = listener.local_addr().expect("listen mock address");
    let stats = Arc::new(MockStats::default());

    let accept_stats = stats.clone();
    let handle = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let stats = accept_stats.clone();
            let behavior = behavior.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_listen_connection(stream, stats, behavior).await {
                    eprintln!("Listen mock connection error: {}", e);
                }
            });
        }
    });

    MockProvider {
        addr,
        stats,
        handle,
    }
}

/// Start a speak mock that answers every `Flush` with `audio` then `Flushed`.
pub async fn spawn_speak_mock(audio: Vec<u8>) -> MockProvider {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind speak mock");
    let addr = listener.local_addr().expect("speak mock address");
    let stats = Arc::new(MockStats::default());
    let audio = Bytes::from(audio);

    let accept_stats = stats.clone();
    let handle = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let stats = accept_stats.clone();
            let audio = audio.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_speak_connection(stream, stats, audio).await {
                    eprintln!("Speak mock connection error: {}", e);
                }
            });
        }
    });

    MockProvider {
        addr,
        stats,
        handle,
    }
}
