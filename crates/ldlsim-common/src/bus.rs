//! Topic keyed publish/subscribe.
//!
//! The bus is the only way simulated endpoints see each other. Delivery is
//! synchronous: [`EventBus::publish`] calls every handler registered for the
//! topic, in registration order, on the publisher's thread, and returns after
//! the last one. The handler list is snapshotted before dispatch, so handlers
//! may subscribe or unsubscribe while a message is being delivered without
//! disturbing the delivery in progress.
//!
//! ```rust
//! use ldlsim_common::EventBus;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let bus: EventBus<u32> = EventBus::new();
//! let seen = Arc::new(AtomicUsize::new(0));
//! let counter = seen.clone();
//! let id = bus.subscribe("numbers", move |n: &u32| {
//!     counter.fetch_add(*n as usize, Ordering::SeqCst);
//! });
//! bus.publish("numbers", &5);
//! bus.unsubscribe(id);
//! bus.publish("numbers", &7);
//! assert_eq!(seen.load(Ordering::SeqCst), 5);
//! ```

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Identifies one subscription on one bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

type Handler<M> = Arc<dyn Fn(&M) + Send + Sync>;

struct Registry<M> {
    next_id: u64,
    /// Handlers per topic, in registration order.
    topics: HashMap<String, Vec<(SubscriptionId, Handler<M>)>>,
    /// Reverse index used by `unsubscribe`.
    owners: HashMap<SubscriptionId, String>,
}

/// A cloneable handle to a shared publish/subscribe bus.
pub struct EventBus<M> {
    registry: Arc<RwLock<Registry<M>>>,
}

impl<M> Clone for EventBus<M> {
    fn clone(&self) -> Self {
        EventBus {
            registry: self.registry.clone(),
        }
    }
}

impl<M> Default for EventBus<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> fmt::Debug for EventBus<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.read();
        f.debug_struct("EventBus")
            .field("topics", &registry.topics.len())
            .field("subscriptions", &registry.owners.len())
            .finish()
    }
}

impl<M> EventBus<M> {
    /// Create an empty bus.
    pub fn new() -> Self {
        EventBus {
            registry: Arc::new(RwLock::new(Registry {
                next_id: 0,
                topics: HashMap::new(),
                owners: HashMap::new(),
            })),
        }
    }

    /// Register `handler` for `topic`.
    pub fn subscribe<F>(&self, topic: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&M) + Send + Sync + 'static,
    {
        let mut registry = self.registry.write();
        let id = SubscriptionId(registry.next_id);
        registry.next_id += 1;
        registry
            .topics
            .entry(topic.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        registry.owners.insert(id, topic.to_string());
        id
    }

    /// Remove a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.registry.write();
        let Some(topic) = registry.owners.remove(&id) else {
            return false;
        };
        if let Some(handlers) = registry.topics.get_mut(&topic) {
            handlers.retain(|(sub, _)| *sub != id);
            if handlers.is_empty() {
                registry.topics.remove(&topic);
            }
        }
        true
    }

    /// Deliver `message` to every current subscriber of `topic`.
    ///
    /// Returns the number of handlers invoked.
    pub fn publish(&self, topic: &str, message: &M) -> usize {
        let snapshot: Vec<Handler<M>> = {
            let registry = self.registry.read();
            match registry.topics.get(topic) {
                Some(handlers) => handlers.iter().map(|(_, h)| h.clone()).collect(),
                None => return 0,
            }
        };
        for handler in &snapshot {
            handler(message);
        }
        snapshot.len()
    }

    /// Number of subscriptions currently registered for `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.registry.read().topics.get(topic).map_or(0, Vec::len)
    }

    /// Total subscriptions on the bus.
    pub fn total_subscriptions(&self) -> usize {
        self.registry.read().owners.len()
    }
}
