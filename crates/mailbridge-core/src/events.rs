//! Publish/subscribe notifications between the session layer and its
//! surroundings (UI, protocol server, API layer).

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tokio::sync::broadcast;
use tracing::debug;

/// Default number of undelivered payloads buffered per topic.
const DEFAULT_CAPACITY: usize = 32;

/// Notification topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// The application is too old for the API. Payload is empty.
    UpgradeApplication,
    /// The account list or an account's state changed. Payload is the account ID.
    UserRefresh,
    /// Protocol sessions for an address must be dropped. Payload is the address.
    CloseConnection,
    /// An account was logged out. Payload is the account ID.
    Logout,
}

impl Event {
    /// Returns the topic name used in logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::UpgradeApplication => "upgradeApplication",
            Self::UserRefresh => "userRefresh",
            Self::CloseConnection => "closeConnection",
            Self::Logout => "logout",
        }
    }
}

/// Event bus contract.
pub trait Listener: Send + Sync {
    /// Publishes a payload on a topic. Never blocks; undelivered payloads are dropped.
    fn emit(&self, event: Event, data: &str);

    /// Subscribes to a topic, receiving every payload emitted afterwards.
    fn subscribe(&self, event: Event) -> broadcast::Receiver<String>;
}

/// Event bus backed by one broadcast channel per topic.
pub struct EventListener {
    capacity: usize,
    channels: Mutex<HashMap<Event, broadcast::Sender<String>>>,
}

impl EventListener {
    /// Creates an event bus with the default per-topic buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates an event bus with a custom per-topic buffer.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn sender(&self, event: Event) -> broadcast::Sender<String> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(event)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for EventListener {
    fn default() -> Self {
        Self::new()
    }
}

impl Listener for EventListener {
    fn emit(&self, event: Event, data: &str) {
        match self.sender(event).send(data.to_string()) {
            Ok(receivers) => debug!(event = event.name(), receivers, "Event emitted"),
            Err(_) => debug!(event = event.name(), "Event emitted with no subscribers"),
        }
    }

    fn subscribe(&self, event: Event) -> broadcast::Receiver<String> {
        self.sender(event).subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_reaches_subscribers() {
        let events = EventListener::new();
        let mut first = events.subscribe(Event::UserRefresh);
        let mut second = events.subscribe(Event::UserRefresh);

        events.emit(Event::UserRefresh, "u1");

        assert_eq!(first.recv().await.unwrap(), "u1");
        assert_eq!(second.recv().await.unwrap(), "u1");
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let events = EventListener::new();
        let mut refresh = events.subscribe(Event::UserRefresh);

        events.emit(Event::UpgradeApplication, "");
        events.emit(Event::UserRefresh, "u2");

        assert_eq!(refresh.recv().await.unwrap(), "u2");
        assert!(refresh.try_recv().is_err());
    }

    #[test]
    fn test_emit_without_subscribers_does_not_fail() {
        let events = EventListener::new();
        events.emit(Event::CloseConnection, "a@x");
    }

    #[test]
    fn test_late_subscriber_misses_earlier_payloads() {
        let events = EventListener::new();
        events.emit(Event::Logout, "u1");
        let mut late = events.subscribe(Event::Logout);
        assert!(late.try_recv().is_err());
    }
}
