//! # Blaulicht Feed
//!
//! Live update channel for the Blaulicht lighting dashboard. One WebSocket
//! to the controller carries several independent streams (beat/tempo,
//! fixture state, heartbeat, audio device list); dashboard components
//! subscribe to exactly one stream each and send device-selection commands
//! back over the same connection.
//!
//! ## Modules
//!
//! - [`link`]: topics, subscription registry, connection manager, transport
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use blaulicht_feed::link::*;
//! use url::Url;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = SubscriptionRegistry::new();
//!     registry
//!         .subscribe(Topic::beat_tempo(), |msg| {
//!             if let UpdateMessage::BeatTempo(tempo) = msg {
//!                 println!("bpm: {:?}", tempo.bpm);
//!             }
//!         })
//!         .await;
//!
//!     let page = Url::parse("http://localhost:8080/")?;
//!     let manager = ConnectionManager::open(&page, registry).await?;
//!
//!     // Runs until the controller goes away
//!     manager.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod link;

pub use link::{
    ConnectionManager, ConnectionState, LinkError, LinkHandle, LinkResult, SendCommand,
    SubscriptionRegistry, Topic, TopicKind, UpdateMessage,
};

pub use config::{Config, ConfigError, DashboardConfig, LoggingConfig};
