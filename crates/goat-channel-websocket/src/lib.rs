//! goat-channel-websocket: WebSocket channel for goat.
//!
//! Carries prost-encoded [`Rpc`] envelopes as binary WebSocket messages
//! over tokio-tungstenite. One WebSocket message is exactly one envelope,
//! so the message boundary provides the atomic-write guarantee the
//! transport relies on; ping, pong, and text frames are not envelopes and
//! are consumed silently.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use prost::Message as _;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex as AsyncMutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use goat::{ChannelError, ChannelIo, Rpc};

/// WebSocket-backed [`ChannelIo`] over any tungstenite-compatible stream
/// (TCP, TLS, or an in-memory duplex for tests).
pub struct WsChannel<S> {
    inner: Arc<WsShared<S>>,
}

struct WsShared<S> {
    /// Write half (async mutex for holding across awaits).
    sink: AsyncMutex<SplitSink<WebSocketStream<S>, Message>>,
    /// Read half (async mutex for holding across awaits).
    stream: AsyncMutex<SplitStream<WebSocketStream<S>>>,
    /// Whether the channel is closed.
    closed: AtomicBool,
}

impl<S> WsChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap an established WebSocket connection.
    pub fn new(ws: WebSocketStream<S>) -> Self {
        let (sink, stream) = ws.split();
        Self {
            inner: Arc::new(WsShared {
                sink: AsyncMutex::new(sink),
                stream: AsyncMutex::new(stream),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Check if the channel is closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl<S> ChannelIo for WsChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn read(&self) -> Result<Rpc, ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }

        let mut stream = self.inner.stream.lock().await;

        loop {
            let msg = stream
                .next()
                .await
                .ok_or(ChannelError::Closed)?
                .map_err(|e| ChannelError::Io(std::io::Error::other(e)))?;

            match msg {
                Message::Binary(data) => {
                    return Rpc::decode(data).map_err(ChannelError::Decode);
                }
                Message::Close(_) => {
                    self.inner.closed.store(true, Ordering::Release);
                    return Err(ChannelError::Closed);
                }
                // Control and text frames carry no envelope.
                Message::Ping(_) | Message::Pong(_) | Message::Text(_) | Message::Frame(_) => {
                    continue;
                }
            }
        }
    }

    async fn write(&self, rpc: Rpc) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }

        let mut sink = self.inner.sink.lock().await;
        sink.send(Message::binary(rpc.encode_to_vec()))
            .await
            .map_err(|e| ChannelError::Io(std::io::Error::other(e)))?;

        Ok(())
    }

    async fn done(&self) {
        self.inner.closed.store(true, Ordering::Release);

        // Best-effort WebSocket close frame.
        let mut sink = self.inner.sink.lock().await;
        let _ = sink.send(Message::Close(None)).await;
    }
}

// The transport's reader and call drivers share the channel across tasks.
static_assertions::assert_impl_all!(WsChannel<tokio::io::DuplexStream>: Send, Sync);

impl WsChannel<tokio::io::DuplexStream> {
    /// Create a connected pair of WebSocket channels for testing, speaking
    /// real WebSocket framing over an in-memory duplex stream.
    pub async fn pair() -> (Self, Self) {
        let (client_io, server_io) = tokio::io::duplex(256 * 1024);

        // The server must be accepting while the client handshakes.
        let accept = tokio::spawn(tokio_tungstenite::accept_async(server_io));

        let (client_ws, _response) = tokio_tungstenite::client_async("ws://goat.test/rpc", client_io)
            .await
            .expect("websocket client handshake");
        let server_ws = accept
            .await
            .expect("accept task panicked")
            .expect("websocket server handshake");

        (Self::new(client_ws), Self::new(server_ws))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use goat::{Body, RequestHeader, Trailer};

    fn envelope(id: u64, value: &[u8]) -> Rpc {
        Rpc {
            id,
            header: Some(RequestHeader {
                method: "/test.v1.Echo/Echo".into(),
                headers: Vec::new(),
                destination: None,
                source: None,
            }),
            body: Some(Body {
                data: value.to_vec().into(),
            }),
            trailer: Some(Trailer::default()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn pair_creation() {
        let (a, b) = WsChannel::pair().await;
        assert!(!a.is_closed());
        assert!(!b.is_closed());
    }

    #[tokio::test]
    async fn envelope_round_trip() {
        let (a, b) = WsChannel::pair().await;

        a.write(envelope(7, b"hello")).await.unwrap();

        let received = b.read().await.unwrap();
        assert_eq!(received, envelope(7, b"hello"));
    }

    #[tokio::test]
    async fn both_directions() {
        let (a, b) = WsChannel::pair().await;

        a.write(envelope(1, b"from a")).await.unwrap();
        b.write(envelope(2, b"from b")).await.unwrap();

        assert_eq!(b.read().await.unwrap().id, 1);
        assert_eq!(a.read().await.unwrap().id, 2);
    }

    #[tokio::test]
    async fn done_closes_channel() {
        let (a, _b) = WsChannel::pair().await;

        a.done().await;
        assert!(a.is_closed());

        assert!(matches!(
            a.write(envelope(1, b"late")).await,
            Err(ChannelError::Closed)
        ));
    }

    #[tokio::test]
    async fn peer_close_ends_reads() {
        let (a, b) = WsChannel::pair().await;

        a.done().await;
        assert!(matches!(b.read().await, Err(ChannelError::Closed)));
    }

    #[tokio::test]
    async fn unary_call_over_websocket() {
        use goat::{CallOptions, GoatTransport};
        use goat_testkit::{TestValue, TEST_METHOD};

        let (client, server) = WsChannel::pair().await;

        // Echo peer: every envelope goes straight back.
        tokio::spawn(async move {
            while let Ok(rpc) = server.read().await {
                if server.write(rpc).await.is_err() {
                    break;
                }
            }
        });

        let transport = GoatTransport::new(client);
        let response = transport
            .unary(&TEST_METHOD, TestValue { value: 42 }, CallOptions::default())
            .await
            .unwrap();
        assert_eq!(response.message.value, 42);
    }
}
