//! Frame transport used by carrier adapters.
//!
//! Adapters speak [`WsFrame`]s over a boxed sink/stream pair so they do not
//! depend on a particular WebSocket implementation. The HTTP layer wraps an
//! axum socket; tests use [`MediaTransport::pair`].

use std::pin::Pin;

use bytes::Bytes;
use futures::channel::mpsc as fmpsc;
use futures::{Sink, SinkExt, Stream, StreamExt, future};

/// One WebSocket message as seen by an adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsFrame {
    Text(String),
    Binary(Bytes),
    Close,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport closed")]
    Closed,
    /// Peer went away without a closing handshake.
    #[error("Connection reset by peer: {0}")]
    Reset(String),
    #[error("Transport I/O error: {0}")]
    Io(String),
}

impl TransportError {
    /// Whether this error is an expected way for a call to end.
    pub fn is_graceful(&self) -> bool {
        matches!(self, TransportError::Closed | TransportError::Reset(_))
    }

    fn classify(message: String) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("closing handshake")
            || lower.contains("connection closed")
            || lower.contains("already closed")
            || lower.contains("going away")
        {
            TransportError::Reset(message)
        } else {
            TransportError::Io(message)
        }
    }
}

pub type FrameSink = Pin<Box<dyn Sink<WsFrame, Error = TransportError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<WsFrame, TransportError>> + Send>>;

/// Split duplex frame transport.
pub struct MediaTransport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl MediaTransport {
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }

    /// Wrap an upgraded axum WebSocket. Ping/pong frames are handled by axum
    /// and never surface here.
    pub fn from_axum(socket: axum::extract::ws::WebSocket) -> Self {
        use axum::extract::ws::Message;

        let (sink, stream) = socket.split();
        let sink = sink
            .sink_map_err(|e| TransportError::classify(e.to_string()))
            .with(|frame: WsFrame| {
                future::ready(Ok::<_, TransportError>(match frame {
                    WsFrame::Text(text) => Message::Text(text.into()),
                    WsFrame::Binary(data) => Message::Binary(data),
                    WsFrame::Close => Message::Close(None),
                }))
            });
        let stream = stream.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(WsFrame::Text(text.as_str().to_owned()))),
                Ok(Message::Binary(data)) => Some(Ok(WsFrame::Binary(data))),
                Ok(Message::Close(_)) => Some(Ok(WsFrame::Close)),
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
                Err(e) => Some(Err(TransportError::classify(e.to_string()))),
            })
        });
        Self::new(Box::pin(sink), Box::pin(stream))
    }

    /// In-memory transport and the peer end that drives it.
    pub fn pair() -> (Self, TransportPeer) {
        let (inbound_tx, inbound_rx) = fmpsc::unbounded::<Result<WsFrame, TransportError>>();
        let (outbound_tx, outbound_rx) = fmpsc::unbounded::<WsFrame>();
        let sink = outbound_tx.sink_map_err(|_| TransportError::Closed);
        let transport = Self::new(Box::pin(sink), Box::pin(inbound_rx));
        let peer = TransportPeer {
            inbound: inbound_tx,
            outbound: outbound_rx,
        };
        (transport, peer)
    }
}

/// The remote side of an in-memory [`MediaTransport`].
pub struct TransportPeer {
    inbound: fmpsc::UnboundedSender<Result<WsFrame, TransportError>>,
    outbound: fmpsc::UnboundedReceiver<WsFrame>,
}

impl TransportPeer {
    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.inbound.unbounded_send(Ok(WsFrame::Text(text.into())));
    }

    pub fn send_binary(&self, data: impl Into<Bytes>) {
        let _ = self.inbound.unbounded_send(Ok(WsFrame::Binary(data.into())));
    }

    pub fn send_error(&self, error: TransportError) {
        let _ = self.inbound.unbounded_send(Err(error));
    }

    pub fn close(&self) {
        let _ = self.inbound.unbounded_send(Ok(WsFrame::Close));
    }

    /// Next frame written by the adapter, or `None` once it dropped its sink.
    pub async fn next_frame(&mut self) -> Option<WsFrame> {
        self.outbound.next().await
    }

    /// Frames already written, without waiting.
    pub fn drain(&mut self) -> Vec<WsFrame> {
        let mut frames = Vec::new();
        while let Ok(Some(frame)) = self.outbound.try_next() {
            frames.push(frame);
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_round_trip() {
        let (mut transport, mut peer) = MediaTransport::pair();
        peer.send_text("hello");
        assert_eq!(
            transport.stream.next().await,
            Some(Ok(WsFrame::Text("hello".into())))
        );
        transport
            .sink
            .send(WsFrame::Binary(Bytes::from_static(b"abc")))
            .await
            .unwrap();
        assert_eq!(
            peer.next_frame().await,
            Some(WsFrame::Binary(Bytes::from_static(b"abc")))
        );
    }

    #[test]
    fn test_classify() {
        assert!(
            TransportError::classify("Connection reset without closing handshake".into())
                .is_graceful()
        );
        assert!(!TransportError::classify("tls failure".into()).is_graceful());
    }
}
