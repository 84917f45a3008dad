//! Connection Manager
//!
//! Owns the one transport to the controller and its lifecycle
//! (`Connecting → Open → Closed`). Inbound frames are decoded and dispatched
//! through the [`SubscriptionRegistry`] on the run-loop task, in arrival
//! order. Callers interact through a [`LinkHandle`].
//!
//! Sends are fail-fast: a command issued while the connection is not open
//! is rejected with [`LinkError::NotOpen`] and never buffered.

use std::fmt;
use tokio::sync::{mpsc, watch};
use tracing::Instrument;
use url::Url;
use uuid::Uuid;

use super::error::{LinkError, LinkResult};
use super::messages::{SendCommand, UpdateMessage};
use super::registry::SubscriptionRegistry;
use super::topic::Topic;
use super::transport::{Connector, Frame, Transport, WsConnector, WsTransport};

/// Path of the update endpoint on the controller
pub const WS_PATH: &str = "api/ws";

/// Lifecycle of the connection; transitions only move forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

impl ConnectionState {
    /// Only `Open` accepts sends
    pub fn is_open(self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_advance_to(self, next: ConnectionState) -> bool {
        matches!(
            (self, next),
            (ConnectionState::Connecting, ConnectionState::Open)
                | (ConnectionState::Connecting, ConnectionState::Closed)
                | (ConnectionState::Open, ConnectionState::Closed)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Open => write!(f, "Open"),
            ConnectionState::Closed => write!(f, "Closed"),
        }
    }
}

/// Derive the update endpoint from the dashboard page URL
///
/// `https` pages use `wss`, `http` pages use `ws`; any other scheme is
/// rejected before anything is opened.
pub fn endpoint_for(page_url: &Url) -> LinkResult<Url> {
    let scheme = match page_url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => {
            return Err(LinkError::UnsupportedScheme {
                scheme: other.to_string(),
            })
        }
    };

    let host = page_url
        .host_str()
        .ok_or_else(|| LinkError::InvalidPageUrl(page_url.to_string()))?;

    let authority = match page_url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };

    Ok(Url::parse(&format!("{}://{}/{}", scheme, authority, WS_PATH))?)
}

/// Requests from handles to the run loop
#[derive(Debug)]
enum Outbound {
    Text(String),
    Shutdown,
}

/// Owner of the single connection to the controller
pub struct ConnectionManager<T: Transport> {
    /// Correlates log lines of one connection
    session_id: String,
    /// Derived `ws`/`wss` update endpoint
    endpoint: Url,
    /// The one open connection
    transport: T,
    /// Handlers for inbound updates
    registry: SubscriptionRegistry,
    /// Lifecycle, observed by every handle
    state: watch::Sender<ConnectionState>,
    /// Cloned into handles
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    /// Drained by the run loop
    outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    /// Set once the transport has opened
    ready: bool,
}

impl ConnectionManager<WsTransport> {
    /// Connect over a real WebSocket
    pub async fn open(page_url: &Url, registry: SubscriptionRegistry) -> LinkResult<Self> {
        Self::connect(page_url, &WsConnector, registry).await
    }
}

impl<T: Transport> ConnectionManager<T> {
    /// Derive the endpoint, open exactly one transport and run the handshake
    pub async fn connect<C>(
        page_url: &Url,
        connector: &C,
        registry: SubscriptionRegistry,
    ) -> LinkResult<Self>
    where
        C: Connector<Transport = T>,
    {
        let endpoint = endpoint_for(page_url)?;
        let session_id = Uuid::new_v4().to_string();

        let (state, _) = watch::channel(ConnectionState::Connecting);

        tracing::info!(session_id = %session_id, endpoint = %endpoint, "Connecting to controller");

        let transport = match connector.connect(&endpoint).await {
            Ok(transport) => transport,
            Err(e) => {
                state.send_replace(ConnectionState::Closed);
                tracing::error!(session_id = %session_id, error = %e, "Failed to connect");
                return Err(e);
            }
        };

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let mut manager = Self {
            session_id,
            endpoint,
            transport,
            registry,
            state,
            outbound_tx,
            outbound_rx,
            ready: false,
        };

        if let Err(e) = manager.on_open().await {
            manager.transition(ConnectionState::Closed);
            return Err(e);
        }

        Ok(manager)
    }

    async fn on_open(&mut self) -> LinkResult<()> {
        self.ready = true;
        self.transition(ConnectionState::Open);
        tracing::info!(
            session_id = %self.session_id,
            endpoint = %self.endpoint,
            "Connected to controller"
        );
        self.handshake().await
    }

    async fn handshake(&mut self) -> LinkResult<()> {
        if !self.ready {
            return Ok(());
        }
        let topics = self.registry.topics().await;
        tracing::debug!(session_id = %self.session_id, ?topics, "Handshake");
        self.transport.handshake(&topics).await
    }

    /// A handle for subscribing and sending from other tasks
    pub fn handle(&self) -> LinkHandle {
        LinkHandle {
            outbound: self.outbound_tx.clone(),
            state: self.state.subscribe(),
            registry: self.registry.clone(),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Whether the transport has opened
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// The `ws`/`wss` endpoint this manager connected to
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Identifier attached to this connection's logs
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Registry inbound updates are dispatched through
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    fn transition(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else if current.can_advance_to(next) {
                tracing::debug!(from = %current, to = %next, "Connection state changed");
                *current = next;
                true
            } else {
                tracing::warn!(from = %current, to = %next, "Ignoring invalid state transition");
                false
            }
        });
    }

    /// Encode `command` and write it directly to the transport
    pub async fn send(&mut self, command: &SendCommand) -> LinkResult<()> {
        let state = self.state();
        if !state.is_open() {
            return Err(LinkError::NotOpen { state });
        }
        let text = command.encode()?;
        self.write(text).await
    }

    async fn write(&mut self, text: String) -> LinkResult<()> {
        tracing::trace!(frame = %text, "Sending frame");
        if let Err(e) = self.transport.send_text(text).await {
            self.transition(ConnectionState::Closed);
            return Err(e);
        }
        Ok(())
    }

    /// Decode one inbound text frame and deliver it to its subscriber
    pub async fn on_frame(&self, text: &str) -> LinkResult<()> {
        route_frame(&self.registry, text).await
    }

    async fn on_transport_event(&mut self, event: Option<LinkResult<Frame>>) -> LinkResult<()> {
        match event {
            Some(Ok(Frame::Text(text))) => route_frame(&self.registry, &text).await,
            Some(Ok(Frame::Binary(data))) => {
                tracing::debug!(len = data.len(), "Ignoring binary frame");
                Ok(())
            }
            Some(Ok(Frame::Close(reason))) => {
                tracing::info!(reason = ?reason, "Controller closed the connection");
                Err(LinkError::ConnectionClosed { reason })
            }
            Some(Err(e)) => Err(e),
            None => Err(LinkError::ConnectionClosed { reason: None }),
        }
    }

    /// Drive the connection until it closes
    ///
    /// Returns `Ok(())` only after a requested shutdown. Any other ending
    /// (peer close, decode failure, missing handler, transport failure) is
    /// returned as an error and the state becomes `Closed`.
    pub async fn run(mut self) -> LinkResult<()> {
        let span = tracing::info_span!("session", session_id = %self.session_id);
        self.run_loop().instrument(span).await
    }

    async fn run_loop(&mut self) -> LinkResult<()> {
        loop {
            let result = tokio::select! {
                Some(outbound) = self.outbound_rx.recv() => match outbound {
                    Outbound::Text(text) => self.write(text).await,
                    Outbound::Shutdown => {
                        self.shutdown().await;
                        return Ok(());
                    }
                },
                event = self.transport.next_frame() => self.on_transport_event(event).await,
            };

            if let Err(e) = result {
                tracing::error!(error = %e, "Connection failed");
                self.transition(ConnectionState::Closed);
                if let Err(close_err) = self.transport.close().await {
                    tracing::debug!(error = %close_err, "Close after failure did not complete");
                }
                return Err(e);
            }
        }
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.transport.close().await {
            tracing::debug!(error = %e, "Close during shutdown did not complete");
        }
        self.transition(ConnectionState::Closed);
        tracing::info!("Connection shut down");
    }
}

impl<T: Transport> Drop for ConnectionManager<T> {
    fn drop(&mut self) {
        // Dropping the transport ends the connection; handles must see it
        self.transition(ConnectionState::Closed);
    }
}

async fn route_frame(registry: &SubscriptionRegistry, text: &str) -> LinkResult<()> {
    tracing::trace!(frame = %text, "Received frame");
    let message = UpdateMessage::decode(text)?;
    let key = message.key();
    registry.dispatch(key, message).await?;
    Ok(())
}

/// Cloneable handle used by dashboard components
#[derive(Clone)]
pub struct LinkHandle {
    outbound: mpsc::UnboundedSender<Outbound>,
    state: watch::Receiver<ConnectionState>,
    registry: SubscriptionRegistry,
}

impl LinkHandle {
    /// Current lifecycle state of the connection
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Install `handler` for `topic`, replacing any earlier one
    pub async fn subscribe<F>(&self, topic: Topic, handler: F)
    where
        F: Fn(UpdateMessage) + Send + Sync + 'static,
    {
        self.registry.subscribe(topic, handler).await;
    }

    /// Remove the handler for `topic`; true if one was registered
    pub async fn unsubscribe(&self, topic: Topic) -> bool {
        self.registry.unsubscribe(topic).await
    }

    /// Drop every subscription
    pub async fn clear_all(&self) {
        self.registry.clear_all().await;
    }

    /// Queue `command` for the run loop
    ///
    /// Fails immediately unless the connection is open.
    pub fn send(&self, command: &SendCommand) -> LinkResult<()> {
        let state = self.state();
        if !state.is_open() {
            return Err(LinkError::NotOpen { state });
        }
        let text = command.encode()?;
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| LinkError::closed("connection manager stopped"))
    }

    /// Ask the run loop to close the connection
    pub fn shutdown(&self) {
        let _ = self.outbound.send(Outbound::Shutdown);
    }

    /// Wait until the connection reaches `Closed`
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| *s == ConnectionState::Closed).await;
    }
}

impl fmt::Debug for LinkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkHandle")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::transport::{channel_pair, ChannelConnector, ChannelPeer, ChannelTransport};
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn page(url: &str) -> Url {
        Url::parse(url).unwrap()
    }

    async fn connected(
        registry: SubscriptionRegistry,
    ) -> (ConnectionManager<ChannelTransport>, ChannelPeer) {
        let (transport, peer) = channel_pair();
        let connector = ChannelConnector::new(transport);
        let manager = ConnectionManager::connect(&page("http://dash.local:8080/"), &connector, registry)
            .await
            .unwrap();
        (manager, peer)
    }

    #[test]
    fn test_endpoint_for_http_and_https() {
        let endpoint = endpoint_for(&page("http://localhost:8080/index.html")).unwrap();
        assert_eq!(endpoint.as_str(), "ws://localhost:8080/api/ws");

        let endpoint = endpoint_for(&page("https://dash.example.com/live?x=1")).unwrap();
        assert_eq!(endpoint.as_str(), "wss://dash.example.com/api/ws");
    }

    #[test]
    fn test_endpoint_for_rejects_other_schemes() {
        for url in ["file:///tmp/index.html", "ftp://host/", "ws://host/"] {
            match endpoint_for(&page(url)) {
                Err(LinkError::UnsupportedScheme { scheme }) => {
                    assert_eq!(scheme, page(url).scheme());
                }
                other => panic!("Expected UnsupportedScheme for {}, got {:?}", url, other),
            }
        }
    }

    #[test]
    fn test_state_transitions_are_monotonic() {
        use ConnectionState::*;
        assert!(Connecting.can_advance_to(Open));
        assert!(Connecting.can_advance_to(Closed));
        assert!(Open.can_advance_to(Closed));

        assert!(!Open.can_advance_to(Connecting));
        assert!(!Closed.can_advance_to(Open));
        assert!(!Closed.can_advance_to(Connecting));
        assert!(!Open.can_advance_to(Open));
    }

    #[tokio::test]
    async fn test_unsupported_scheme_opens_nothing() {
        let (transport, _peer) = channel_pair();
        let connector = ChannelConnector::new(transport);

        let result = ConnectionManager::connect(
            &page("file:///srv/dashboard/index.html"),
            &connector,
            SubscriptionRegistry::new(),
        )
        .await;

        assert!(matches!(result, Err(LinkError::UnsupportedScheme { .. })));
        assert_eq!(connector.attempts(), 0);
    }

    #[tokio::test]
    async fn test_connect_opens_and_handshakes_once() {
        let (manager, peer) = connected(SubscriptionRegistry::new()).await;

        assert_eq!(manager.state(), ConnectionState::Open);
        assert!(manager.is_ready());
        assert_eq!(manager.endpoint().as_str(), "ws://dash.local:8080/api/ws");
        assert_eq!(peer.handshakes(), 1);

        manager.handle().shutdown();
        manager.run().await.unwrap();
        assert_eq!(peer.handshakes(), 1);
    }

    #[tokio::test]
    async fn test_handshake_runs_before_first_frame() {
        let (transport, peer) = channel_pair();
        let peer = Arc::new(peer);
        peer.push_text(UpdateMessage::Heartbeat(1).encode().unwrap());
        peer.push(Frame::Close(None));

        // usize::MAX until the handler runs
        let seen_handshakes = Arc::new(AtomicUsize::new(usize::MAX));
        let registry = SubscriptionRegistry::new();
        let peer_inner = Arc::clone(&peer);
        let seen_inner = Arc::clone(&seen_handshakes);
        registry
            .subscribe(Topic::heartbeat(), move |_| {
                seen_inner.store(peer_inner.handshakes(), Ordering::SeqCst);
            })
            .await;

        let connector = ChannelConnector::new(transport);
        let manager = ConnectionManager::connect(&page("http://dash.local/"), &connector, registry)
            .await
            .unwrap();

        let err = manager.run().await.unwrap_err();
        assert!(matches!(err, LinkError::ConnectionClosed { .. }));
        assert_eq!(seen_handshakes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropping_manager_closes_handles() {
        let (manager, _peer) = connected(SubscriptionRegistry::new()).await;
        let handle = manager.handle();
        assert_eq!(handle.state(), ConnectionState::Open);

        drop(manager);
        handle.closed().await;

        assert_eq!(handle.state(), ConnectionState::Closed);
        assert!(matches!(
            handle.send(&SendCommand::select_audio_device("hw:0")),
            Err(LinkError::NotOpen {
                state: ConnectionState::Closed
            })
        ));
    }

    #[tokio::test]
    async fn test_aborted_run_closes_handles() {
        let (manager, _peer) = connected(SubscriptionRegistry::new()).await;
        let handle = manager.handle();

        let task = tokio::spawn(manager.run());
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        handle.closed().await;
        assert_eq!(handle.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_connector_failure_is_returned() {
        let (transport, _peer) = channel_pair();
        let connector = ChannelConnector::new(transport);
        let registry = SubscriptionRegistry::new();

        let first = ConnectionManager::connect(&page("http://a/"), &connector, registry.clone()).await;
        assert!(first.is_ok());

        let second = ConnectionManager::connect(&page("http://a/"), &connector, registry).await;
        assert!(matches!(second, Err(LinkError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_heartbeat_reaches_handler() {
        let registry = SubscriptionRegistry::new();
        let seen = Arc::new(AtomicU64::new(0));
        let seen_inner = Arc::clone(&seen);
        registry
            .subscribe(Topic::heartbeat(), move |msg| {
                if let UpdateMessage::Heartbeat(seq) = msg {
                    seen_inner.store(seq, Ordering::SeqCst);
                }
            })
            .await;

        let (manager, _peer) = connected(registry).await;
        manager
            .on_frame(r#"{"kind":{"kind":"Heartbeat"},"value":42}"#)
            .await
            .unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 42);
    }

    #[tokio::test]
    async fn test_payload_shape_does_not_change_routing() {
        let registry = SubscriptionRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_inner = Arc::clone(&calls);
        registry
            .subscribe(Topic::beat_tempo(), move |_| {
                calls_inner.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        let (manager, _peer) = connected(registry).await;
        manager
            .on_frame(r#"{"kind":{"kind":"bpm"},"value":{"x":1}}"#)
            .await
            .unwrap();
        manager
            .on_frame(r#"{"kind":{"kind":"bpm"},"value":{"y":2}}"#)
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_malformed_frame_invokes_nothing() {
        let registry = SubscriptionRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        for topic in Topic::ALL {
            let calls_inner = Arc::clone(&calls);
            registry
                .subscribe(topic, move |_| {
                    calls_inner.fetch_add(1, Ordering::SeqCst);
                })
                .await;
        }

        let (manager, _peer) = connected(registry).await;
        for text in ["{oops", r#"{"value":42}"#, r#"{"kind":{"kind":"Heartbeat"},"value":"x"}"#] {
            let err = manager.on_frame(text).await.unwrap_err();
            assert!(matches!(err, LinkError::Decode(_)), "{}", text);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unsubscribed_topic_fails_run() {
        let (manager, peer) = connected(SubscriptionRegistry::new()).await;
        let handle = manager.handle();

        peer.push_text(r#"{"kind":{"kind":"dmx"},"value":{}}"#);
        let err = manager.run().await.unwrap_err();

        assert!(matches!(err, LinkError::Dispatch(_)));
        assert_eq!(handle.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_frames_dispatched_in_arrival_order() {
        let registry = SubscriptionRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_inner = Arc::clone(&seen);
        registry
            .subscribe(Topic::heartbeat(), move |msg| {
                if let UpdateMessage::Heartbeat(seq) = msg {
                    seen_inner.lock().unwrap().push(seq);
                }
            })
            .await;

        let (manager, peer) = connected(registry).await;
        for seq in 1..=5 {
            peer.push_text(UpdateMessage::Heartbeat(seq).encode().unwrap());
        }
        peer.push(Frame::Close(Some("bye".to_string())));

        let err = manager.run().await.unwrap_err();
        assert!(matches!(err, LinkError::ConnectionClosed { reason: Some(_) }));
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_peer_disconnect_is_fatal() {
        let (manager, peer) = connected(SubscriptionRegistry::new()).await;
        let handle = manager.handle();
        drop(peer);

        let err = manager.run().await.unwrap_err();
        assert!(matches!(err, LinkError::ConnectionClosed { reason: None }));
        assert_eq!(handle.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_binary_frames_are_skipped() {
        let registry = SubscriptionRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_inner = Arc::clone(&calls);
        registry
            .subscribe(Topic::heartbeat(), move |_| {
                calls_inner.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        let (manager, peer) = connected(registry).await;
        peer.push(Frame::Binary(vec![0xde, 0xad]));
        peer.push_text(UpdateMessage::Heartbeat(1).encode().unwrap());
        peer.push(Frame::Close(None));

        let err = manager.run().await.unwrap_err();
        assert!(matches!(err, LinkError::ConnectionClosed { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_send_writes_exact_frame() {
        let (mut manager, mut peer) = connected(SubscriptionRegistry::new()).await;

        manager
            .send(&SendCommand::select_audio_device("hw:1"))
            .await
            .unwrap();

        assert_eq!(
            peer.try_recv_sent().as_deref(),
            Some(r#"{"kind":"SelectAudioDevice","value":"hw:1"}"#)
        );
    }

    #[tokio::test]
    async fn test_handle_send_goes_through_run_loop() {
        let (manager, mut peer) = connected(SubscriptionRegistry::new()).await;
        let handle = manager.handle();
        let task = tokio::spawn(manager.run());

        handle
            .send(&SendCommand::select_serial_device("/dev/ttyUSB0"))
            .unwrap();
        assert_eq!(
            peer.recv_sent().await.as_deref(),
            Some(r#"{"kind":"SelectSerialDevice","value":"/dev/ttyUSB0"}"#)
        );

        handle.shutdown();
        task.await.unwrap().unwrap();
        handle.closed().await;
        assert_eq!(handle.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_send_after_close_fails_fast() {
        let (manager, peer) = connected(SubscriptionRegistry::new()).await;
        let handle = manager.handle();
        drop(peer);
        let _ = manager.run().await;

        let err = handle
            .send(&SendCommand::select_audio_device("hw:0"))
            .unwrap_err();
        assert!(matches!(
            err,
            LinkError::NotOpen {
                state: ConnectionState::Closed
            }
        ));
    }

    #[tokio::test]
    async fn test_handle_subscribe_and_clear_all() {
        let (manager, peer) = connected(SubscriptionRegistry::new()).await;
        let handle = manager.handle();

        handle.subscribe(Topic::audio_device_list(), |_| {}).await;
        assert!(manager.registry().is_subscribed(Topic::audio_device_list()).await);

        handle.clear_all().await;
        peer.push_text(r#"{"kind":{"kind":"AudioDevicesView"},"value":["hw:0"]}"#);

        let err = manager.run().await.unwrap_err();
        assert!(matches!(err, LinkError::Dispatch(_)));
    }
}
