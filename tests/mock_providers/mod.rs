//! Mock speech providers
//!
//! WebSocket servers speaking the Deepgram listen and speak protocols and
//! the Cartesia context-based TTS protocol, bound to an ephemeral local port. Point a transformer at one with the
//! `endpoint` provider option.

// Each test binary uses a different subset
#![allow(dead_code)]

pub mod cartesia_mock;
pub mod websocket_mock;

pub use cartesia_mock::*;
pub use websocket_mock::*;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;

/// What a mock saw, for assertions.
#[derive(Debug, Default)]
pub struct MockStats {
    pub connections: AtomicU64,
    pub audio_bytes: AtomicU64,
    /// `type` of every JSON control message, in arrival order.
    pub messages: Mutex<Vec<String>>,
    /// Text of every `Speak` request.
    pub spoken: Mutex<Vec<String>>,
    /// Every JSON request, for mocks whose messages carry no `type`.
    pub requests: Mutex<Vec<Value>>,
}

impl MockStats {
    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::Acquire)
    }

    pub fn audio_bytes(&self) -> u64 {
        self.audio_bytes.load(Ordering::Acquire)
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().clone()
    }

    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().clone()
    }

    pub fn count(&self, message_type: &str) -> usize {
        self.messages
            .lock()
            .iter()
            .filter(|m| m.as_str() == message_type)
            .count()
    }
}

/// Poll `condition` until it holds or five seconds pass.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
