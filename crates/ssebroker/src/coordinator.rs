//! The broadcast coordinator loop
//!
//! A single task owns the subscriber set. Every mutation and every broadcast
//! arrives as a [`Command`] on one FIFO queue and is handled to completion
//! before the next one is read, so the set needs no lock and each publish is
//! seen by exactly the subscribers registered when it is processed.

use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Identity of one subscriber within the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub(crate) u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub(crate) enum Command {
    Register {
        id: SubscriberId,
        queue: mpsc::Sender<Bytes>,
    },
    Unregister(SubscriberId),
    Publish(Bytes),
    Count(oneshot::Sender<usize>),
}

struct Slot {
    queue: mpsc::Sender<Bytes>,
    dropped: u64,
}

pub(crate) struct Coordinator {
    subscribers: HashMap<SubscriberId, Slot>,
    commands: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
}

impl Coordinator {
    pub(crate) fn new(commands: mpsc::UnboundedReceiver<Command>, cancel: CancellationToken) -> Self {
        Self {
            subscribers: HashMap::new(),
            commands,
            cancel,
        }
    }

    /// Process commands until cancelled or until every handle is gone.
    pub(crate) async fn run(mut self) {
        info!("event broker started");

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
        }

        // Dropping the senders closes every delivery queue, which ends each session.
        let remaining = self.subscribers.len();
        self.subscribers.clear();
        self.commands.close();
        info!(remaining, "event broker stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Register { id, queue } => {
                self.subscribers.insert(id, Slot { queue, dropped: 0 });
                info!(subscriber = %id, total = self.subscribers.len(), "new SSE client");
            }
            Command::Unregister(id) => {
                if let Some(slot) = self.subscribers.remove(&id) {
                    info!(
                        subscriber = %id,
                        total = self.subscribers.len(),
                        dropped = slot.dropped,
                        "SSE client left"
                    );
                }
            }
            Command::Publish(frame) => self.broadcast(frame),
            Command::Count(reply) => {
                let _ = reply.send(self.subscribers.len());
            }
        }
    }

    /// Offer the frame to every queue without waiting on any of them.
    ///
    /// A full queue loses this frame only; a closed queue means its session is
    /// already gone, so the subscriber is removed now rather than on unregister.
    fn broadcast(&mut self, frame: Bytes) {
        self.subscribers.retain(|id, slot| match slot.queue.try_send(frame.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                slot.dropped += 1;
                warn!(subscriber = %id, dropped = slot.dropped, "slow SSE client, frame dropped");
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!(subscriber = %id, "delivery queue closed, removing subscriber");
                false
            }
        });
    }
}
