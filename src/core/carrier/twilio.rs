//! Twilio Media Streams adapter.
//!
//! Inbound: `connected`, `start{streamSid, callSid}`, `media{payload}` with
//! base64 μ-law 8 kHz, `stop`. Outbound: `media` and `clear`, both keyed by
//! `streamSid`. Audio is only sent once `start` has named the stream.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::CarrierKind;
use super::envelope::{Dialect, EnvelopeStreamer};
use crate::core::packet::Packet;
use crate::core::streamer::{
    BufferOptions, CallIdentity, InboundEvent, StreamAttribute, StreamError, StreamState, Streamer,
};
use crate::core::telephony::CallTerminator;
use crate::core::transport::MediaTransport;

const DIALECT: Dialect = Dialect {
    carrier: CarrierKind::Twilio,
    stream_key: "streamSid",
    hangs_up: true,
};

pub struct TwilioStreamer {
    inner: EnvelopeStreamer,
}

impl TwilioStreamer {
    /// `terminator` completes the call over REST on `EndConversation`.
    pub fn new(
        transport: MediaTransport,
        identity: CallIdentity,
        buffers: BufferOptions,
        terminator: Option<Arc<dyn CallTerminator>>,
    ) -> Self {
        Self {
            inner: EnvelopeStreamer::new(DIALECT, transport, identity, buffers, terminator),
        }
    }

    pub fn stream_sid(&self) -> Option<String> {
        self.inner.stream_sid()
    }
}

#[async_trait]
impl Streamer for TwilioStreamer {
    fn context(&self) -> CancellationToken {
        self.inner.base().cancel_token()
    }

    async fn recv(&self) -> Result<InboundEvent, StreamError> {
        self.inner.recv().await
    }

    async fn send(&self, packet: Packet) -> Result<(), StreamError> {
        self.inner.send(packet).await
    }

    fn config(&self) -> StreamAttribute {
        self.inner.attribute()
    }

    fn state(&self) -> StreamState {
        self.inner.base().state()
    }

    fn identity(&self) -> &CallIdentity {
        self.inner.base().identity()
    }
}
