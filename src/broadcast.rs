//! Best-effort fan-out of job output to live push subscribers.
//!
//! The broadcaster is the lossy counterpart of the event log: subscribers
//! only see messages published after they subscribed, and a subscriber whose
//! delivery fails is dropped rather than retried. Publishing goes through a
//! single bounded queue drained by a dedicated consumer task, so a hot
//! producer and a slow fan-out never block each other; if the queue is full
//! the message is dropped — job liveness wins over broadcast completeness.
//!
//! The subscriber table has its own lock, separate from the event log's, and
//! delivery uses `try_send` only, so a stalled subscriber cannot hold up the
//! consumer loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::mpsc;

use crate::job::event::OutputMessage;

/// Capacity of the internal publish queue.
const QUEUE_CAPACITY: usize = 256;

/// Capacity of each subscriber's delivery channel. A subscriber that falls
/// this far behind counts as dead on the next delivery attempt.
const SUBSCRIBER_CAPACITY: usize = 64;

struct SubscriberEntry {
    id: u64,
    tx: mpsc::Sender<OutputMessage>,
}

/// Fan-out hub for live output messages.
pub struct Broadcaster {
    subscribers: Mutex<Vec<SubscriberEntry>>,
    queue_tx: mpsc::Sender<OutputMessage>,
    next_id: AtomicU64,
    subscriber_capacity: usize,
}

impl Broadcaster {
    pub fn new() -> Arc<Self> {
        Self::with_capacities(QUEUE_CAPACITY, SUBSCRIBER_CAPACITY)
    }

    pub fn with_capacities(queue_capacity: usize, subscriber_capacity: usize) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::channel(queue_capacity);
        let broadcaster = Arc::new(Self {
            subscribers: Mutex::new(Vec::new()),
            queue_tx,
            next_id: AtomicU64::new(0),
            subscriber_capacity,
        });
        tokio::spawn(Self::process_queue(Arc::downgrade(&broadcaster), queue_rx));
        broadcaster
    }

    fn lock_subscribers(&self) -> std::sync::MutexGuard<'_, Vec<SubscriberEntry>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new subscriber. No backlog is delivered: the subscription
    /// only sees messages published after this call returns.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.subscriber_capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock_subscribers().push(SubscriberEntry { id, tx });
        tracing::debug!(subscriber = id, "push subscriber connected");
        Subscription { id, rx }
    }

    /// Remove a subscriber. Idempotent; unknown ids are ignored.
    pub fn unsubscribe(&self, id: u64) {
        self.lock_subscribers().retain(|entry| entry.id != id);
    }

    /// Enqueue a message for fan-out. Never blocks: if the queue is full the
    /// message is dropped.
    pub fn publish(&self, message: OutputMessage) {
        match self.queue_tx.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("broadcast queue full, dropping message");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("broadcast consumer gone, dropping message");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock_subscribers().len()
    }

    /// Consumer loop: pull one message at a time and attempt delivery to
    /// every current subscriber. Exits when the broadcaster is dropped.
    async fn process_queue(this: Weak<Self>, mut queue_rx: mpsc::Receiver<OutputMessage>) {
        while let Some(message) = queue_rx.recv().await {
            let Some(broadcaster) = this.upgrade() else {
                break;
            };
            broadcaster.deliver(&message);
        }
    }

    /// Deliver to all subscribers, removing any whose channel is closed or
    /// full. A failed delivery is a dead connection: no retry, no stall.
    fn deliver(&self, message: &OutputMessage) {
        self.lock_subscribers().retain(|entry| {
            match entry.tx.try_send(message.clone()) {
                Ok(()) => true,
                Err(_) => {
                    tracing::debug!(subscriber = entry.id, "dropping dead push subscriber");
                    false
                }
            }
        });
    }
}

/// A live registration with the broadcaster. The owning adapter calls
/// `unsubscribe` on disconnect; a dangling registration is also reaped on
/// its first failed delivery.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<OutputMessage>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Receive the next message. Returns `None` once unsubscribed and the
    /// in-flight buffer is drained. Cancel-safe.
    pub async fn recv(&mut self) -> Option<OutputMessage> {
        self.rx.recv().await
    }
}
