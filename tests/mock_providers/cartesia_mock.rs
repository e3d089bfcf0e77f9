//! Cartesia-style TTS WebSocket mock
//!
//! Requests carry a `context_id`. Generations are recorded, and one with
//! `continue: false` is answered with a base64 `chunk` then `done` for its
//! context. Cancels are recorded and acknowledged with nothing.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};

use super::{MockProvider, MockStats};

async fn handle_cartesia_connection(
    stream: TcpStream,
    stats: Arc<MockStats>,
    audio: Arc<Vec<u8>>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = accept_async(stream).await?;
    let (mut write, mut read) = ws_stream.split();
    stats.connections.fetch_add(1, Ordering::AcqRel);

    while let Some(msg) = read.next().await {
        match msg? {
            Message::Text(text) => {
                let Ok(request) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                stats.requests.lock().push(request.clone());
                let context_id = request["context_id"].as_str().unwrap_or_default().to_string();

                if request["cancel"] == true {
                    stats.messages.lock().push("cancel".to_string());
                    continue;
                }
                stats.messages.lock().push("generation".to_string());
                if let Some(transcript) = request["transcript"].as_str()
                    && !transcript.is_empty()
                {
                    stats.spoken.lock().push(transcript.to_string());
                }
                if request["continue"] == false {
                    let chunk = json!({
                        "type": "chunk",
                        "data": BASE64.encode(audio.as_slice()),
                        "context_id": context_id,
                        "done": false,
                        "status_code": 206
                    });
                    write.send(Message::Text(chunk.to_string().into())).await?;
                    let done = json!({"type": "done", "context_id": context_id});
                    write.send(Message::Text(done.to_string().into())).await?;
                }
            }
            Message::Ping(data) => write.send(Message::Pong(data)).await?,
            Message::Close(_) => break,
            _ => {}
        }
    }
    Ok(())
}

/// Start a Cartesia TTS mock answering each final generation with `audio`.
pub async fn spawn_cartesia_tts_mock(audio: Vec<u8>) -> MockProvider {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind Cartesia mock");
    let addr = listener.local_addr().expect("Cartesia mock address");
    let stats = Arc::new(MockStats::default());
    let audio = Arc::new(audio);

    let accept_stats = stats.clone();
    let handle = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let stats = accept_stats.clone();
            let audio = audio.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_cartesia_connection(stream, stats, audio).await {
                    eprintln!("Cartesia mock connection error: {}", e);
                }
            });
        }
    });

    MockProvider::new(addr, stats, handle)
}
