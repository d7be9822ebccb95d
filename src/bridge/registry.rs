//! # Subscriber Registry
//!
//! Bookkeeping of connected downstream channels. Remembers the last
//! broadcast message so late joiners start from the last known state.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Per-subscriber queue depth before messages are dropped for that subscriber
pub const SUBSCRIBER_QUEUE_DEPTH: usize = 64;

/// Identifier handed out on subscribe
pub type SubscriberId = u64;

/// Shared, already-encoded outbound message
pub type Outbound = Arc<str>;

/// Receiving side of one subscription
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriberId,
    pub receiver: mpsc::Receiver<Outbound>,
}

/// Currently connected subscribers plus the last broadcast message
#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    subscribers: HashMap<SubscriberId, mpsc::Sender<Outbound>>,
    last: Option<Outbound>,
    next_id: SubscriberId,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber
    ///
    /// The last broadcast message, if any, is queued before anything else.
    pub fn subscribe(&mut self) -> Subscription {
        let (sender, receiver) = mpsc::channel(SUBSCRIBER_QUEUE_DEPTH);
        let id = self.next_id;
        self.next_id += 1;

        if let Some(last) = &self.last {
            // Fresh channel, cannot be full or closed
            let _ = sender.try_send(Arc::clone(last));
        }

        self.subscribers.insert(id, sender);
        debug!("Subscriber {} registered ({} total)", id, self.subscribers.len());
        Subscription { id, receiver }
    }

    /// Remove a subscriber; unknown ids are ignored
    pub fn unsubscribe(&mut self, id: SubscriberId) {
        if self.subscribers.remove(&id).is_some() {
            debug!("Subscriber {} removed ({} remaining)", id, self.subscribers.len());
        }
    }

    /// Send a message to every subscriber and remember it for late joiners
    ///
    /// Subscribers whose channel is closed are pruned. A subscriber whose
    /// queue is full misses this message but stays registered.
    ///
    /// # Returns
    ///
    /// * `usize` - Number of subscribers the message was queued for
    pub fn broadcast(&mut self, message: Outbound) -> usize {
        let mut delivered = 0;

        self.subscribers.retain(|id, sender| match sender.try_send(Arc::clone(&message)) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!("Subscriber {} is not keeping up, dropping message", id);
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Pruning closed subscriber {}", id);
                false
            }
        });

        self.last = Some(message);
        delivered
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Last broadcast message, if any
    pub fn last(&self) -> Option<&Outbound> {
        self.last.as_ref()
    }
}
