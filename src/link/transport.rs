//! Transport Layer
//!
//! The connection manager talks to the controller through a [`Transport`]
//! opened by a [`Connector`]. [`WsConnector`] opens a real WebSocket with
//! tokio-tungstenite; [`ChannelConnector`] hands out an in-memory transport
//! whose far end is driven by the caller, for tests and offline tooling.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::error::{Error as WsError, ProtocolError};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use super::error::{LinkError, LinkResult};
use super::topic::TopicKind;

/// A frame read from the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame, the only kind that carries updates
    Text(String),
    /// Binary frame, not used by the controller
    Binary(Vec<u8>),
    /// Peer closed the connection, with its reason if one was given
    Close(Option<String>),
}

/// One open, full-duplex connection to the controller
#[async_trait]
pub trait Transport: Send {
    /// Write one text frame
    async fn send_text(&mut self, text: String) -> LinkResult<()>;

    /// Read the next frame; `None` once the stream has ended
    async fn next_frame(&mut self) -> Option<LinkResult<Frame>>;

    /// Close the connection from our side
    async fn close(&mut self) -> LinkResult<()>;

    /// Called exactly once after the connection opens, before any frame is
    /// read. The wire contract has no handshake yet, so the default does
    /// nothing.
    async fn handshake(&mut self, topics: &[TopicKind]) -> LinkResult<()> {
        let _ = topics;
        Ok(())
    }
}

/// Opens transports to an endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    type Transport: Transport;

    async fn connect(&self, endpoint: &Url) -> LinkResult<Self::Transport>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens WebSocket connections (`ws://` or `wss://`)
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    type Transport = WsTransport;

    async fn connect(&self, endpoint: &Url) -> LinkResult<WsTransport> {
        let (stream, response) = connect_async(endpoint.as_str())
            .await
            .map_err(|e| LinkError::ConnectionFailed(e.to_string()))?;

        tracing::debug!(
            endpoint = %endpoint,
            status = %response.status(),
            "WebSocket upgrade accepted"
        );

        Ok(WsTransport { stream })
    }
}

/// WebSocket transport backed by tokio-tungstenite
///
/// Ping/pong is answered by tungstenite itself and never surfaces as a frame.
pub struct WsTransport {
    stream: WsStream,
}

impl WsTransport {
    fn from_tungstenite_message(message: Message) -> Option<Frame> {
        match message {
            Message::Text(text) => Some(Frame::Text(text)),
            Message::Binary(data) => Some(Frame::Binary(data)),
            Message::Close(frame) => Some(Frame::Close(
                frame
                    .map(|f| f.reason.to_string())
                    .filter(|reason| !reason.is_empty()),
            )),
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => None,
        }
    }

    fn map_error(error: WsError) -> LinkError {
        match error {
            WsError::ConnectionClosed | WsError::AlreadyClosed => {
                LinkError::ConnectionClosed { reason: None }
            }
            WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                LinkError::closed("reset without closing handshake")
            }
            WsError::Io(e) => LinkError::closed(e.to_string()),
            other => LinkError::Transport(other.to_string()),
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_text(&mut self, text: String) -> LinkResult<()> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(Self::map_error)
    }

    async fn next_frame(&mut self) -> Option<LinkResult<Frame>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(Self::map_error(e))),
            };

            if let Some(frame) = Self::from_tungstenite_message(message) {
                return Some(Ok(frame));
            }
        }
    }

    async fn close(&mut self) -> LinkResult<()> {
        match self.stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(Self::map_error(e)),
        }
    }
}

/// Create an in-memory transport and the peer end that drives it
pub fn channel_pair() -> (ChannelTransport, ChannelPeer) {
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
    let handshakes = Arc::new(AtomicUsize::new(0));

    let transport = ChannelTransport {
        frames: frames_rx,
        sent: sent_tx,
        handshakes: Arc::clone(&handshakes),
        closed: false,
    };
    let peer = ChannelPeer {
        frames: frames_tx,
        sent: sent_rx,
        handshakes,
    };

    (transport, peer)
}

/// In-memory transport; see [`channel_pair`]
pub struct ChannelTransport {
    frames: mpsc::UnboundedReceiver<Frame>,
    sent: mpsc::UnboundedSender<String>,
    handshakes: Arc<AtomicUsize>,
    closed: bool,
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send_text(&mut self, text: String) -> LinkResult<()> {
        if self.closed {
            return Err(LinkError::ConnectionClosed { reason: None });
        }
        self.sent
            .send(text)
            .map_err(|_| LinkError::closed("peer dropped"))
    }

    async fn next_frame(&mut self) -> Option<LinkResult<Frame>> {
        if self.closed {
            return None;
        }
        self.frames.recv().await.map(Ok)
    }

    async fn close(&mut self) -> LinkResult<()> {
        self.closed = true;
        self.frames.close();
        Ok(())
    }

    async fn handshake(&mut self, _topics: &[TopicKind]) -> LinkResult<()> {
        self.handshakes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Far end of a [`ChannelTransport`], standing in for the controller
pub struct ChannelPeer {
    frames: mpsc::UnboundedSender<Frame>,
    sent: mpsc::UnboundedReceiver<String>,
    handshakes: Arc<AtomicUsize>,
}

impl ChannelPeer {
    /// Queue a frame for the transport to read
    ///
    /// Returns false if the transport is gone.
    pub fn push(&self, frame: Frame) -> bool {
        self.frames.send(frame).is_ok()
    }

    pub fn push_text(&self, text: impl Into<String>) -> bool {
        self.push(Frame::Text(text.into()))
    }

    /// Next text frame written by the transport
    pub async fn recv_sent(&mut self) -> Option<String> {
        self.sent.recv().await
    }

    pub fn try_recv_sent(&mut self) -> Option<String> {
        self.sent.try_recv().ok()
    }

    /// How many times the transport's handshake ran
    pub fn handshakes(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }
}

/// Connector that yields one prepared [`ChannelTransport`]
pub struct ChannelConnector {
    transport: Mutex<Option<ChannelTransport>>,
    attempts: AtomicUsize,
}

impl ChannelConnector {
    pub fn new(transport: ChannelTransport) -> Self {
        Self {
            transport: Mutex::new(Some(transport)),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Number of connect calls made so far
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ChannelConnector {
    type Transport = ChannelTransport;

    async fn connect(&self, endpoint: &Url) -> LinkResult<ChannelTransport> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.transport.lock().await.take().ok_or_else(|| {
            LinkError::ConnectionFailed(format!("no transport available for {}", endpoint))
        })
    }
}
