//! Subscription Registry
//!
//! Single responsibility: map subscription tokens to their inbound queues.
//!
//! Queues are unbounded so the router never waits on a slow consumer. Every
//! operation is a single critical section on the concurrent map, which lets the
//! router task and any number of consumers share one registry.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace};

use super::protocol::InboundMessage;

/// Opaque token correlating a `subscribe` frame with its inbound frames.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// A fresh random token.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriptionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Why a subscription stopped delivering messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The server sent `complete`
    Completed,
    /// The server sent a terminal `error` (delivered as the last message)
    Errored,
    /// The connection went away before the server ended the subscription
    ConnectionClosed,
}

/// One entry in a subscription queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Message(InboundMessage),
    /// End-of-stream sentinel; never yielded to consumers
    End(Termination),
}

/// Token to queue map shared by the router and the subscription streams.
///
/// Once [`Registry::close_all`] has run the registry stays closed: later
/// registrations get a queue that is already terminated with
/// `ConnectionClosed`.
#[derive(Clone, Default)]
pub struct Registry {
    queues: Arc<DashMap<SubscriptionId, UnboundedSender<Delivery>>>,
    closed: Arc<AtomicBool>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh token and queue.
    pub fn register(&self) -> (SubscriptionId, UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut id = SubscriptionId::generate();
        // Never reuse a live token
        while self.queues.contains_key(&id) {
            id = SubscriptionId::generate();
        }
        self.queues.insert(id.clone(), tx);

        // Checked after the insert so a concurrent close_all cannot miss it
        if self.is_closed() {
            self.terminate(&id, Termination::ConnectionClosed);
            debug!(id = %id, "Subscription registered on a closed connection");
        } else {
            debug!(id = %id, live = self.queues.len(), "Subscription registered");
        }
        (id, rx)
    }

    /// Remove a token. Returns false if it was not registered.
    pub fn unregister(&self, id: &SubscriptionId) -> bool {
        let removed = self.queues.remove(id).is_some();
        if removed {
            debug!(id = %id, live = self.queues.len(), "Subscription unregistered");
        }
        removed
    }

    /// Enqueue a message for a token.
    ///
    /// Messages for unknown tokens are dropped; the server may still be sending
    /// for a subscription the consumer already abandoned.
    pub fn route(&self, id: &SubscriptionId, message: InboundMessage) -> bool {
        match self.queues.get(id) {
            Some(tx) => tx.send(Delivery::Message(message)).is_ok(),
            None => {
                trace!(id = %id, "Dropping message for unknown subscription");
                false
            }
        }
    }

    /// Enqueue the end-of-stream sentinel and remove the token.
    pub fn complete(&self, id: &SubscriptionId) -> bool {
        self.terminate(id, Termination::Completed)
    }

    /// Deliver a terminal error message, then end the stream.
    pub fn fail(&self, id: &SubscriptionId, message: InboundMessage) -> bool {
        match self.queues.remove(id) {
            Some((_, tx)) => {
                let _ = tx.send(Delivery::Message(message));
                let _ = tx.send(Delivery::End(Termination::Errored));
                true
            }
            None => {
                trace!(id = %id, "Dropping error for unknown subscription");
                false
            }
        }
    }

    /// End every live subscription with `reason`, clear the map and close the
    /// registry to new subscriptions.
    pub fn close_all(&self, reason: Termination) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        let ids: Vec<SubscriptionId> = self.queues.iter().map(|e| e.key().clone()).collect();
        let count = ids
            .iter()
            .filter(|id| self.terminate(id, reason))
            .count();
        if count > 0 {
            debug!(count = count, reason = ?reason, "Terminated live subscriptions");
        }
        count
    }

    /// Whether `close_all` has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn contains(&self, id: &SubscriptionId) -> bool {
        self.queues.contains_key(id)
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    fn terminate(&self, id: &SubscriptionId, reason: Termination) -> bool {
        match self.queues.remove(id) {
            Some((_, tx)) => {
                let _ = tx.send(Delivery::End(reason));
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::protocol::MessageKind;
    use serde_json::json;

    fn next(id: &SubscriptionId, n: i64) -> InboundMessage {
        InboundMessage {
            kind: MessageKind::Next,
            id: Some(id.to_string()),
            payload: Some(json!({ "data": { "n": n } })),
        }
    }

    #[test]
    fn test_live_count_tracks_register_and_unregister() {
        let registry = Registry::new();
        let a = registry.register().0;
        let b = registry.register().0;
        let c = registry.register().0;
        assert_eq!(registry.len(), 3);

        assert!(registry.unregister(&b));
        assert_eq!(registry.len(), 2);

        // Unregistering twice, or an unknown token, is not a decrement
        assert!(!registry.unregister(&b));
        assert!(!registry.unregister(&SubscriptionId::from("never-registered")));
        assert_eq!(registry.len(), 2);

        assert!(registry.unregister(&a));
        assert!(registry.unregister(&c));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_tokens_are_unique() {
        let registry = Registry::new();
        let ids: std::collections::HashSet<_> = (0..100).map(|_| registry.register().0).collect();
        assert_eq!(ids.len(), 100);
        assert_eq!(registry.len(), 100);
    }

    #[test]
    fn test_route_unknown_token_creates_nothing() {
        let registry = Registry::new();
        let stale = SubscriptionId::from("stale");
        assert!(!registry.route(&stale, next(&stale, 1)));
        assert!(!registry.contains(&stale));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_route_preserves_order() {
        let registry = Registry::new();
        let (id, mut rx) = registry.register();
        for n in 0..5 {
            assert!(registry.route(&id, next(&id, n)));
        }
        for n in 0..5 {
            assert_eq!(rx.try_recv().unwrap(), Delivery::Message(next(&id, n)));
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_complete_sends_sentinel_and_removes() {
        let registry = Registry::new();
        let (id, mut rx) = registry.register();
        registry.route(&id, next(&id, 1));
        assert!(registry.complete(&id));
        assert!(!registry.contains(&id));

        assert_eq!(rx.try_recv().unwrap(), Delivery::Message(next(&id, 1)));
        assert_eq!(rx.try_recv().unwrap(), Delivery::End(Termination::Completed));

        // A duplicate complete is dropped
        assert!(!registry.complete(&id));
    }

    #[test]
    fn test_fail_delivers_error_then_ends() {
        let registry = Registry::new();
        let (id, mut rx) = registry.register();
        let error = InboundMessage {
            kind: MessageKind::Error,
            id: Some(id.to_string()),
            payload: Some(json!([{ "message": "denied" }])),
        };
        assert!(registry.fail(&id, error.clone()));
        assert_eq!(rx.try_recv().unwrap(), Delivery::Message(error));
        assert_eq!(rx.try_recv().unwrap(), Delivery::End(Termination::Errored));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_close_all() {
        let registry = Registry::new();
        let (_a, mut rx_a) = registry.register();
        let (_b, mut rx_b) = registry.register();

        assert_eq!(registry.close_all(Termination::ConnectionClosed), 2);
        assert!(registry.is_empty());
        assert_eq!(rx_a.try_recv().unwrap(), Delivery::End(Termination::ConnectionClosed));
        assert_eq!(rx_b.try_recv().unwrap(), Delivery::End(Termination::ConnectionClosed));
    }

    #[test]
    fn test_register_after_close_all_is_terminated() {
        let registry = Registry::new();
        assert!(!registry.is_closed());
        registry.close_all(Termination::ConnectionClosed);
        assert!(registry.is_closed());

        let (id, mut rx) = registry.register();
        assert!(!registry.contains(&id));
        assert!(registry.is_empty());
        assert_eq!(rx.try_recv().unwrap(), Delivery::End(Termination::ConnectionClosed));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_route_after_consumer_dropped() {
        let registry = Registry::new();
        let (id, rx) = registry.register();
        drop(rx);
        // Entry is still there until unregistered, but the send fails quietly
        assert!(!registry.route(&id, next(&id, 1)));
        assert!(registry.unregister(&id));
    }
}
