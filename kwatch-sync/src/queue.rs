//! Delta queue: ordered, bounded hand-off between reflector and dispatcher.
//!
//! One producer, one consumer. `push` waits while the queue is full instead
//! of dropping anything; `pop` waits while it is empty. Closing is
//! idempotent, and dropping either half closes the queue so the other side
//! never waits forever.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::Notify;

use kwatch_core::ChangeEvent;

/// Default number of pending events before `push` applies backpressure.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Whether pending same-key updates may be merged before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoalescePolicy {
    /// Every event is dispatched as received.
    #[default]
    Never,
    /// While at least this many events are pending, an incoming `Modified`
    /// is folded into the tail entry when that entry is a `Modified` for the
    /// same key. Entries behind other keys' events are never merged, so the
    /// global order is kept.
    AtDepth(usize),
}

impl CoalescePolicy {
    /// `None` disables coalescing.
    pub fn from_bound(bound: Option<usize>) -> Self {
        bound.map_or(CoalescePolicy::Never, CoalescePolicy::AtDepth)
    }
}

/// Returned by [`DeltaProducer::push`] once the queue is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("delta queue is closed")]
pub struct QueueClosed;

/// Result of [`DeltaConsumer::pop`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Popped {
    Event(ChangeEvent),
    /// The queue is closed and fully drained.
    Closed,
}

struct State {
    items: VecDeque<ChangeEvent>,
    closed: bool,
}

struct Shared {
    state: Mutex<State>,
    capacity: usize,
    policy: CoalescePolicy,
    not_empty: Notify,
    not_full: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close(&self) {
        self.lock().closed = true;
        // Single waiter per side; `notify_one` stores a permit if the
        // waiter has not parked yet.
        self.not_empty.notify_one();
        self.not_full.notify_one();
    }
}

/// Create a bounded queue and return its two halves.
pub fn delta_queue(capacity: usize, policy: CoalescePolicy) -> (DeltaProducer, DeltaConsumer) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            items: VecDeque::new(),
            closed: false,
        }),
        capacity: capacity.max(1),
        policy,
        not_empty: Notify::new(),
        not_full: Notify::new(),
    });
    (
        DeltaProducer {
            shared: shared.clone(),
        },
        DeltaConsumer { shared },
    )
}

/// Producing half, owned by the reflector.
pub struct DeltaProducer {
    shared: Arc<Shared>,
}

impl DeltaProducer {
    /// Enqueue `event`, waiting while the queue is at capacity.
    pub async fn push(&self, event: ChangeEvent) -> Result<(), QueueClosed> {
        let mut pending = Some(event);
        loop {
            {
                let mut state = self.shared.lock();
                if state.closed {
                    return Err(QueueClosed);
                }
                let Some(event) = pending.take() else {
                    return Ok(());
                };
                let event = match self.shared.policy {
                    CoalescePolicy::AtDepth(depth) if state.items.len() >= depth => {
                        match coalesce(&mut state.items, event) {
                            None => return Ok(()),
                            Some(event) => event,
                        }
                    }
                    _ => event,
                };
                if state.items.len() < self.shared.capacity {
                    state.items.push_back(event);
                    drop(state);
                    self.shared.not_empty.notify_one();
                    return Ok(());
                }
                pending = Some(event);
            }
            self.shared.not_full.notified().await;
        }
    }

    /// Close the queue. The consumer still drains what is pending.
    pub fn close(&self) {
        self.shared.close();
    }

    pub fn len(&self) -> usize {
        self.shared.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }
}

impl Drop for DeltaProducer {
    fn drop(&mut self) {
        self.shared.close();
    }
}

/// Consuming half, owned by the dispatcher.
pub struct DeltaConsumer {
    shared: Arc<Shared>,
}

impl DeltaConsumer {
    /// Take the oldest event, waiting until one arrives or the queue closes.
    pub async fn pop(&mut self) -> Popped {
        loop {
            if let Some(popped) = self.try_pop_inner() {
                return popped;
            }
            self.shared.not_empty.notified().await;
        }
    }

    /// Non-blocking variant of [`pop`](Self::pop); `None` when nothing is
    /// pending and the queue is still open.
    pub fn try_pop(&mut self) -> Option<Popped> {
        self.try_pop_inner()
    }

    fn try_pop_inner(&self) -> Option<Popped> {
        let mut state = self.shared.lock();
        if let Some(event) = state.items.pop_front() {
            drop(state);
            self.shared.not_full.notify_one();
            return Some(Popped::Event(event));
        }
        state.closed.then_some(Popped::Closed)
    }

    pub fn close(&self) {
        self.shared.close();
    }

    pub fn len(&self) -> usize {
        self.shared.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }
}

impl Drop for DeltaConsumer {
    fn drop(&mut self) {
        self.shared.close();
    }
}

/// Fold an incoming `Modified` into the tail entry when both are updates of
/// the same key. Returns the event back when it cannot be merged.
fn coalesce(items: &mut VecDeque<ChangeEvent>, event: ChangeEvent) -> Option<ChangeEvent> {
    match (items.back_mut(), event) {
        (Some(ChangeEvent::Modified { new, .. }), ChangeEvent::Modified { new: incoming, .. })
            if new.key() == incoming.key() =>
        {
            *new = incoming;
            None
        }
        (_, event) => Some(event),
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
