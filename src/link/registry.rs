//! Subscription Registry
//!
//! Maps each topic to the single handler currently interested in it.
//! Subscribing again replaces the previous handler; dispatching to a topic
//! nobody subscribed to is an error rather than a silent drop.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use super::messages::UpdateMessage;
use super::topic::{Topic, TopicKind};

/// Callback invoked with every update for its topic
pub type Handler = Arc<dyn Fn(UpdateMessage) + Send + Sync>;

/// Topic → handler map, shared by cheap clones
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    handlers: Arc<RwLock<HashMap<TopicKind, Handler>>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handler` for `topic`, replacing any earlier one
    pub async fn subscribe<F>(&self, topic: Topic, handler: F)
    where
        F: Fn(UpdateMessage) + Send + Sync + 'static,
    {
        let key = topic.key();
        let replaced = self
            .handlers
            .write()
            .await
            .insert(key, Arc::new(handler))
            .is_some();

        tracing::debug!(topic = %key, replaced, "Subscribed to topic");
    }

    /// Remove the handler for a single topic
    ///
    /// Returns true if a handler was registered.
    pub async fn unsubscribe(&self, topic: Topic) -> bool {
        let key = topic.key();
        let removed = self.handlers.write().await.remove(&key).is_some();

        tracing::debug!(topic = %key, removed, "Unsubscribed from topic");
        removed
    }

    /// Deliver `message` to the handler registered under `key`
    ///
    /// The handler runs on the caller's task before this returns. The map
    /// lock is not held while it runs.
    pub async fn dispatch(&self, key: TopicKind, message: UpdateMessage) -> Result<(), RegistryError> {
        let handler = self
            .handlers
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or(RegistryError::MissingHandler { key })?;

        tracing::trace!(topic = %key, "Dispatching update");
        handler(message);
        Ok(())
    }

    /// Drop every registration
    pub async fn clear_all(&self) {
        let mut handlers = self.handlers.write().await;
        let count = handlers.len();
        handlers.clear();

        tracing::debug!(count, "Cleared all subscriptions");
    }

    /// Whether a handler is registered for `topic`
    pub async fn is_subscribed(&self, topic: Topic) -> bool {
        self.handlers.read().await.contains_key(&topic.key())
    }

    /// Subscribed topic kinds, sorted
    pub async fn topics(&self) -> Vec<TopicKind> {
        let mut kinds: Vec<_> = self.handlers.read().await.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// Number of subscribed topics
    pub async fn len(&self) -> usize {
        self.handlers.read().await.len()
    }

    /// True when nothing is subscribed
    pub async fn is_empty(&self) -> bool {
        self.handlers.read().await.is_empty()
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry").finish_non_exhaustive()
    }
}

/// Errors that can occur while dispatching
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("No handler registered for topic {key}")]
    MissingHandler { key: TopicKind },
}
