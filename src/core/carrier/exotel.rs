//! Exotel Voicebot stream adapter.
//!
//! Same envelope as Twilio with `stream_sid` keys and linear16 8 kHz
//! payloads. Exotel ends calls itself once the socket closes, so
//! `EndConversation` only closes the stream.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::CarrierKind;
use super::envelope::{Dialect, EnvelopeStreamer};
use crate::core::packet::Packet;
use crate::core::streamer::{
    BufferOptions, CallIdentity, InboundEvent, StreamAttribute, StreamError, StreamState, Streamer,
};
use crate::core::transport::MediaTransport;

const DIALECT: Dialect = Dialect {
    carrier: CarrierKind::Exotel,
    stream_key: "stream_sid",
    hangs_up: false,
};

pub struct ExotelStreamer {
    inner: EnvelopeStreamer,
}

impl ExotelStreamer {
    pub fn new(transport: MediaTransport, identity: CallIdentity, buffers: BufferOptions) -> Self {
        Self {
            inner: EnvelopeStreamer::new(DIALECT, transport, identity, buffers, None),
        }
    }
}

#[async_trait]
impl Streamer for ExotelStreamer {
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
