//! Dashboard Link
//!
//! Multiplexes the controller's update streams over one WebSocket and
//! routes each update to the single handler subscribed to its topic.
//!
//! ## Architecture
//!
//! - **Topic**: identity of a stream (`bpm`, `dmx`, `Heartbeat`, `AudioDevicesView`)
//! - **SubscriptionRegistry**: topic → handler, last subscription wins
//! - **ConnectionManager**: owns the transport, decodes frames, dispatches
//! - **Transport**: WebSocket client, or an in-memory pair for tests
//!
//! ## Example
//!
//! ```rust,no_run
//! use blaulicht_feed::link::*;
//! use url::Url;
//!
//! # async fn demo() -> Result<(), LinkError> {
//! let registry = SubscriptionRegistry::new();
//! registry
//!     .subscribe(Topic::heartbeat(), |msg| println!("{:?}", msg))
//!     .await;
//!
//! let page = Url::parse("http://localhost:8080/").expect("valid url");
//! let manager = ConnectionManager::open(&page, registry).await?;
//! let handle = manager.handle();
//! tokio::spawn(manager.run());
//!
//! handle.send(&SendCommand::select_audio_device("hw:1"))?;
//! # Ok(())
//! # }
//! ```

mod connection;
mod error;
mod messages;
mod registry;
mod topic;
mod transport;

pub use connection::{endpoint_for, ConnectionManager, ConnectionState, LinkHandle, WS_PATH};
pub use error::{LinkError, LinkResult};
pub use messages::{DecodeError, FixtureStateRecord, SendCommand, TempoRecord, UpdateMessage};
pub use registry::{Handler, RegistryError, SubscriptionRegistry};
pub use topic::{Topic, TopicKind};
pub use transport::{
    channel_pair, ChannelConnector, ChannelPeer, ChannelTransport, Connector, Frame, Transport,
    WsConnector, WsTransport,
};
