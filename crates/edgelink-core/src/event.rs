/*!
 * Event system for EdgeLink.
 *
 * This module provides a typed, in-process publish/subscribe bus. Publishing
 * never waits on subscribers: the bus is bounded, and a subscriber that falls
 * behind skips the oldest events rather than stalling the publisher.
 */
use std::fmt::Debug;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Maximum number of events that can be buffered in a channel
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Receiving half of an event bus subscription
pub type EventReceiver<E> = broadcast::Receiver<E>;

/// Typed event bus for publishing and subscribing to events of type `E`
#[derive(Debug)]
pub struct EventBus<E> {
    sender: broadcast::Sender<E>,
    channel_capacity: usize,
}

impl<E> EventBus<E>
where
    E: Clone + Debug + Send + 'static,
{
    /// Create a new event bus
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with a specific channel capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            channel_capacity: capacity,
        }
    }

    /// The bounded capacity of each subscriber's queue
    pub fn capacity(&self) -> usize {
        self.channel_capacity
    }

    /// Publish an event, returning the number of subscribers it was queued for
    pub fn publish(&self, event: E) -> usize {
        if self.sender.receiver_count() == 0 {
            trace!("No receivers for event");
            return 0;
        }

        match self.sender.send(event) {
            Ok(n) => {
                trace!("Published event to {} receivers", n);
                n
            }
            // All receivers dropped between the count check and the send.
            Err(_) => 0,
        }
    }

    /// Subscribe to events published after this call
    pub fn subscribe(&self) -> EventReceiver<E> {
        self.sender.subscribe()
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Attach a callback subscriber running on its own task.
    ///
    /// The handler sees events in publication order. A handler that panics
    /// only ends its own task; publishers and other subscribers carry on.
    pub fn listen<F>(&self, name: &str, mut handler: F) -> JoinHandle<()>
    where
        F: FnMut(E) + Send + 'static,
    {
        let mut rx = self.subscribe();
        let name = name.to_string();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => handler(event),
                    Err(RecvError::Lagged(missed)) => {
                        warn!(listener = %name, missed, "Event listener lagged, events dropped");
                    }
                    Err(RecvError::Closed) => {
                        debug!(listener = %name, "Event bus closed");
                        break;
                    }
                }
            }
        })
    }
}

impl<E> Default for EventBus<E>
where
    E: Clone + Debug + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            channel_capacity: self.channel_capacity,
        }
    }
}
