//! Broker handle and subscriptions
//!
//! [`Broker`] is a cheap, clonable handle to the coordinator task. Publishers
//! call [`Broker::send_event`] / [`Broker::send_message`]; each connection
//! holds a [`Subscription`] whose drop unregisters it.
//!
//! # Example
//!
//! ```rust,ignore
//! use ssebroker::{Broker, BrokerConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let cancel = CancellationToken::new();
//! let (broker, coordinator) = Broker::spawn(BrokerConfig::default(), cancel.clone());
//!
//! let mut sub = broker.subscribe()?;
//! broker.send_event("1", "currentTime", "2024-01-01T00:00:00Z")?;
//! let frame = sub.recv().await;
//! ```

use crate::config::BrokerConfig;
use crate::coordinator::{Command, Coordinator, SubscriberId};
use crate::error::BrokerError;
use crate::event::Event;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Handle to a running broker.
#[derive(Clone)]
pub struct Broker {
    commands: mpsc::UnboundedSender<Command>,
    next_id: Arc<AtomicU64>,
    queue_capacity: usize,
}

impl Broker {
    /// Start the coordinator task and return a handle to it.
    ///
    /// The coordinator runs until `cancel` fires or every handle and
    /// subscription has been dropped. Must be called within a tokio runtime.
    pub fn spawn(config: BrokerConfig, cancel: CancellationToken) -> (Self, JoinHandle<()>) {
        let (commands, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(Coordinator::new(rx, cancel).run());

        let broker = Self {
            commands,
            next_id: Arc::new(AtomicU64::new(1)),
            queue_capacity: config.queue_capacity.max(1),
        };
        (broker, handle)
    }

    /// Register a fresh delivery queue.
    ///
    /// Every frame published after this call returns is delivered to the new
    /// subscription (subject to the slow-consumer policy).
    pub fn subscribe(&self) -> Result<Subscription, BrokerError> {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (queue, frames) = mpsc::channel(self.queue_capacity);

        self.commands
            .send(Command::Register { id, queue })
            .map_err(|_| BrokerError::Closed)?;

        Ok(Subscription {
            id,
            frames,
            commands: self.commands.clone(),
        })
    }

    /// Broadcast a named event with an id.
    pub fn send_event(
        &self,
        id: impl Into<String>,
        name: impl Into<String>,
        payload: impl Into<String>,
    ) -> Result<(), BrokerError> {
        self.publish(&Event::new(payload).id(id).event(name))
    }

    /// Broadcast a plain data-only message.
    pub fn send_message(&self, payload: impl Into<String>) -> Result<(), BrokerError> {
        self.publish(&Event::new(payload))
    }

    /// Encode and broadcast an event.
    pub fn publish(&self, event: &Event) -> Result<(), BrokerError> {
        self.publish_frame(event.encode())
    }

    /// Broadcast an already encoded frame.
    pub fn publish_frame(&self, frame: Bytes) -> Result<(), BrokerError> {
        self.commands
            .send(Command::Publish(frame))
            .map_err(|_| BrokerError::Closed)
    }

    /// Number of registered subscribers, observed in command order.
    pub async fn subscriber_count(&self) -> Result<usize, BrokerError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Count(reply))
            .map_err(|_| BrokerError::Closed)?;
        rx.await.map_err(|_| BrokerError::Closed)
    }

    /// Whether the coordinator has stopped accepting commands.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// One subscriber's end of its delivery queue.
///
/// Dropping it unregisters the subscriber, whichever way the owning
/// connection ends.
pub struct Subscription {
    id: SubscriberId,
    frames: mpsc::Receiver<Bytes>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Subscription {
    /// This subscriber's identity
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next frame.
    ///
    /// Returns `None` once the broker has stopped.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.frames.recv().await
    }

    /// Take a frame if one is already queued.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.frames.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Fails only if the coordinator is gone, in which case the set is too.
        let _ = self.commands.send(Command::Unregister(self.id));
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
