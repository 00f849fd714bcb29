//! Broadcasting operation events to any number of listeners.
//!
//! The [`EventBus`] keeps the last `capacity` events in a ring so late subscribers can
//! catch up, then forwards every new event to each subscriber's own bounded queue.
//! Publishing never waits on a subscriber: an event that does not fit a full queue is
//! dropped for that subscriber only.
use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures::Stream;
use mesh_adapter_core::Event;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};

/// Events kept for replay by default.
pub const DEFAULT_CAPACITY: usize = 10;
/// Minimum queue length of each subscriber by default.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Sizing of an [`EventBus`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// Number of events replayed to a new subscriber.
    pub capacity: usize,
    /// Queue length of each subscriber; never smaller than `capacity`.
    pub queue_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// A multi-subscriber event broadcaster with bounded replay.
///
/// Cloning yields another handle to the same bus.
///
/// ```rust
/// use mesh_adapter_core::Event;
/// use mesh_adapter_runtime::EventBus;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let bus = EventBus::new(10);
/// bus.publish(Event::info("op", "started", ""));
/// let mut sub = bus.subscribe();
/// assert_eq!(sub.recv().await.unwrap().summary, "started");
/// # }
/// ```
#[derive(Clone)]
pub struct EventBus {
    shared: Arc<Shared>,
}

struct Shared {
    queue_capacity: usize,
    history: Mutex<History>,
    /// Registration list, taken by `subscribe` and pruning only.
    subscribers: Mutex<Vec<Arc<Subscriber>>>,
    /// The copy of `subscribers` that publishers deliver to.
    live: RwLock<Arc<[Arc<Subscriber>]>>,
}

struct History {
    slots: Vec<Option<Event>>,
    published: u64,
}

struct Subscriber {
    /// Sequence number of the next event to deliver, unset until the replay.
    cursor: Mutex<Option<u64>>,
    tx: mpsc::Sender<Event>,
}

impl History {
    fn push(&mut self, event: Event) -> u64 {
        let seq = self.published;
        let slot = (seq % self.slots.len() as u64) as usize;
        self.slots[slot] = Some(event);
        self.published += 1;
        seq
    }

    fn oldest(&self) -> u64 {
        self.published.saturating_sub(self.slots.len() as u64)
    }

    fn ordered(&self) -> impl Iterator<Item = &Event> {
        self.since(self.oldest()).1
    }

    /// Buffered events numbered `from` or later, with the sequence number of the first.
    fn since(&self, from: u64) -> (u64, impl Iterator<Item = &Event>) {
        let len = self.slots.len() as u64;
        let start = from.max(self.oldest());
        let events = (start..self.published).filter_map(move |seq| self.slots[(seq % len) as usize].as_ref());
        (start, events)
    }
}

impl Subscriber {
    /// Send every buffered event this subscriber has not seen yet.
    ///
    /// Returns `false` once the receiving end is gone.
    fn catch_up(&self, history: &Mutex<History>) -> bool {
        let mut cursor = self.cursor.lock();
        let (start, pending) = {
            let history = history.lock();
            let (start, events) = history.since(cursor.unwrap_or(0));
            let pending: Vec<Event> = events.cloned().collect();
            (start, pending)
        };
        if let Some(missed) = cursor.map(|next| start.saturating_sub(next)).filter(|n| *n > 0) {
            tracing::warn!(missed, "subscriber fell behind the history");
        }

        let mut next = start;
        for event in pending {
            match self.tx.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(seq = next, "subscriber queue full, dropping event");
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(seq = next, "subscriber closed");
                    return false;
                }
            }
            next += 1;
        }
        *cursor = Some(next);
        true
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_config(EventBusConfig::default())
    }
}

impl EventBus {
    /// A bus replaying the last `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self::with_config(EventBusConfig {
            capacity,
            ..EventBusConfig::default()
        })
    }

    /// A bus sized by `config`.
    ///
    /// A zero capacity is raised to one.
    pub fn with_config(config: EventBusConfig) -> Self {
        let capacity = config.capacity.max(1);
        Self {
            shared: Arc::new(Shared {
                queue_capacity: config.queue_capacity.max(capacity),
                history: Mutex::new(History {
                    slots: vec![None; capacity],
                    published: 0,
                }),
                subscribers: Mutex::new(Vec::new()),
                live: RwLock::new(Vec::new().into()),
            }),
        }
    }

    /// Record `event` and forward it to every subscriber.
    ///
    /// Never waits for a subscriber that is being registered; that subscriber picks the
    /// event up from the history instead.
    pub fn publish(&self, event: Event) {
        tracing::trace!(operation_id = %event.operation_id, kind = ?event.kind, "publishing event");
        let seq = self.shared.history.lock().push(event);

        let live = self.shared.live.read().clone();
        let closed = live
            .iter()
            .filter(|sub| !sub.catch_up(&self.shared.history))
            .count();
        if closed > 0 {
            self.prune(seq);
        }
    }

    /// Drop closed subscribers unless a registration is in progress, which prunes on its own.
    fn prune(&self, seq: u64) {
        if let Some(mut subscribers) = self.shared.subscribers.try_lock() {
            subscribers.retain(|sub| !sub.tx.is_closed());
            *self.shared.live.write() = subscribers.as_slice().into();
            tracing::debug!(seq, subscribers = subscribers.len(), "removed closed subscribers");
        }
    }

    /// Register a new listener.
    ///
    /// The subscription first yields the buffered history, oldest first, then every
    /// event published afterwards.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.shared.queue_capacity);
        let sub = Arc::new(Subscriber {
            cursor: Mutex::new(None),
            tx,
        });
        {
            let mut subscribers = self.shared.subscribers.lock();
            subscribers.retain(|sub| !sub.tx.is_closed());
            subscribers.push(sub.clone());
            *self.shared.live.write() = subscribers.as_slice().into();
            tracing::debug!(subscribers = subscribers.len(), "added subscriber");
        }
        // Replay. A publisher that already sees `sub` may have done this first.
        sub.catch_up(&self.shared.history);
        Subscription { rx }
    }

    /// The buffered events, oldest first.
    pub fn history(&self) -> Vec<Event> {
        self.shared.history.lock().ordered().cloned().collect()
    }

    /// Number of events published so far.
    pub fn published(&self) -> u64 {
        self.shared.history.lock().published
    }

    /// Number of registered subscribers, including ones not yet pruned.
    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.lock().len()
    }
}

/// The receiving end of [`EventBus::subscribe`].
///
/// Ends once every handle to the bus is dropped.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<Event>,
}

impl Subscription {
    /// Wait for the next event.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Take the next event if one is queued.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.rx.poll_recv(cx)
    }
}
