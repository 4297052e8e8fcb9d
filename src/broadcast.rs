//! One-to-many fan-out with per-subscriber bounded queues.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};
use tokio::sync::mpsc;

/// Fan-out publisher.
///
/// Each subscriber owns a bounded queue sized at subscribe time.
/// Publishing never blocks and never waits for slow consumers: a full
/// queue silently drops the value *for that subscriber only*; that is
/// the contract, not an accident. Values a subscriber does receive arrive
/// in publish order; nothing is guaranteed across subscribers.
///
/// Handles are cheap to clone and share one subscriber set.
///
/// # Examples
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use zzz_web::broadcast::Broadcast;
///
/// let feed = Broadcast::new(8);
/// let mut ticks = feed.subscribe(4);
///
/// feed.send(0u32);
/// feed.send(1u32);
///
/// assert_eq!(ticks.recv().await, Some(0));
/// assert_eq!(ticks.recv().await, Some(1));
/// feed.unsubscribe(ticks);
/// # }
/// ```
pub struct Broadcast<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    subscribers: Mutex<Vec<Subscriber<T>>>,
    next_id: AtomicU64,
}

struct Subscriber<T> {
    id: u64,
    sender: mpsc::Sender<T>,
}

impl<T: Clone + Send + 'static> Broadcast<T> {
    /// Creates a publisher with room for `capacity` subscribers before
    /// the set reallocates.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: Mutex::new(Vec::with_capacity(capacity)),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Registers a fresh channel holding at most `queue_capacity`
    /// undelivered values. The caller owns the handle and passes it to
    /// [`unsubscribe`](Self::unsubscribe) exactly once when done.
    pub fn subscribe(&self, queue_capacity: usize) -> Channel<T> {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        self.inner
            .subscribers
            .lock()
            .unwrap()
            .push(Subscriber { id, sender });

        Channel { id, receiver }
    }

    /// Removes `channel` from the set. Consuming the handle means no
    /// `recv` can outlive the subscription; removing an already-pruned
    /// channel is a no-op.
    pub fn unsubscribe(&self, channel: Channel<T>) {
        self.inner
            .subscribers
            .lock()
            .unwrap()
            .retain(|sub| sub.id != channel.id);
    }

    /// Delivers `value` to every current subscriber. Full queues drop
    /// the value for their subscriber; disconnected subscribers (the
    /// receiving side went away without unsubscribing) are pruned.
    pub fn send(&self, value: T) {
        let mut subscribers = self.inner.subscribers.lock().unwrap();

        subscribers.retain(|sub| match sub.sender.try_send(value.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().unwrap().len()
    }
}

impl<T> Clone for Broadcast<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// The subscriber end of one broadcast subscription.
pub struct Channel<T> {
    id: u64,
    receiver: mpsc::Receiver<T>,
}

impl<T> Channel<T> {
    /// Waits for the next value. `None` means closed: the publisher went
    /// away (or this channel was pruned after its queue disconnected),
    /// and no further values will arrive.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }
}
