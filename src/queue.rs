//! Queue (connector): the only conduit for batches between node workers.
//!
//! Backed by `crossbeam_channel::bounded`, a true MPMC channel: a segment
//! with `N` replicas means `N` threads may all be producing into, or
//! consuming from, the same queue, which a single-consumer
//! `std::sync::mpsc` cannot express.
//!
//! Both `InGroup` and `CrossGroup` queues carry an explicit [`Sentinel`]
//! distinct from any user batch; `finish_producing` enqueues exactly one
//! sentinel per registered consumer, posted once its producer has finished.

use crossbeam_channel::{Receiver, RecvError, SendError, Sender};

use crate::item::Item;

/// Where a queue's two endpoints live relative to each other.
///
/// Both scopes share one implementation in this crate (see
/// `worker::segment_worker` docs on why segments are always thread-groups),
/// but the tag is kept because cross-group queues are additionally capped
/// against a platform semaphore ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueScope {
    InGroup,
    CrossGroup,
}

/// Ceiling a cross-group queue's capacity is capped against
/// (`SEM_VALUE_MAX` is 32767 on most POSIX platforms).
const SEM_VALUE_MAX: usize = 32_767;

/// One slot of a queue: either a batch of items, or the end-of-stream sentinel.
#[derive(Debug, Clone)]
pub enum QueueItem<I: Item> {
    Batch(Vec<I>),
    Sentinel,
}

/// A bounded, sentinel-terminated, multi-producer/multi-consumer queue.
///
/// Cloning a `Queue` is cheap (it clones the underlying channel handles) and
/// is how multiple producer/consumer replicas share one queue.
#[derive(Clone)]
pub struct Queue<I: Item> {
    scope: QueueScope,
    capacity: usize,
    sender: Sender<QueueItem<I>>,
    receiver: Receiver<QueueItem<I>>,
}

impl<I: Item> Queue<I> {
    /// Build a new bounded queue. `requested_capacity` is clamped to the
    /// platform ceiling for `CrossGroup` queues, logging a warning when
    /// clamped (mirroring `InterProcessConnector.__init__`).
    pub fn bounded(scope: QueueScope, requested_capacity: usize) -> Self {
        let capacity = match scope {
            QueueScope::CrossGroup if requested_capacity > SEM_VALUE_MAX => {
                tracing::warn!(
                    target: "conflux::queue",
                    requested = requested_capacity,
                    limit = SEM_VALUE_MAX,
                    "clamping cross-group queue capacity to the platform semaphore ceiling"
                );
                SEM_VALUE_MAX
            }
            _ => requested_capacity,
        };

        let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));

        Self {
            scope,
            capacity,
            sender,
            receiver,
        }
    }

    pub fn scope(&self) -> QueueScope {
        self.scope
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Push a batch onto the queue, blocking while it's at capacity.
    pub fn produce(&self, batch: Vec<I>) -> std::result::Result<(), SendError<QueueItem<I>>> {
        self.sender.send(QueueItem::Batch(batch))
    }

    /// Pop the next batch, blocking while the queue is empty. Returns
    /// `Ok(None)` on the end-of-stream sentinel.
    pub fn consume(&self) -> std::result::Result<Option<Vec<I>>, RecvError> {
        match self.receiver.recv()? {
            QueueItem::Batch(batch) => Ok(Some(batch)),
            QueueItem::Sentinel => Ok(None),
        }
    }

    /// Enqueue exactly one sentinel per expected consumer.
    pub fn finish_producing(&self, num_consumers: usize) {
        for _ in 0..num_consumers {
            // A closed/full-forever queue here would mean every consumer
            // already gave up; dropping the sentinel is harmless.
            let _ = self.sender.send(QueueItem::Sentinel);
        }
    }

    pub fn len(&self) -> usize {
        self.sender.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sender.is_empty()
    }
}
