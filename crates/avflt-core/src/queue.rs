//! FIFO request queue and admission gate.
//!
//! A plain `VecDeque` behind a `parking_lot::Mutex` plus a `Condvar` for
//! "request available", rather than a bounded channel: the broker needs
//! arbitrary-position removal (`remove`, for timeout cancellation) and
//! head-reinsertion (`readd`, for agent handback), neither of which a
//! multi-producer/multi-consumer channel supports.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::event::{Event, EventId, Interrupt};

/// How long `pop` sleeps between checks of the admission gate / interrupt
/// flag while waiting for a request to arrive. See
/// [`crate::event::Completion::wait`] for the same trade-off.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Monotonic event-id allocator (`avflt_event_ids`).
#[derive(Default)]
pub struct IdAllocator(AtomicU64);

impl IdAllocator {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn next(&self) -> EventId {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    NotAccepted,
}

pub enum PopOutcome {
    Event(Arc<Event>),
    /// The gate is closed and the queue is empty; the agent should stop
    /// polling rather than block forever.
    Stopped,
    Interrupted,
}

struct QueueInner {
    items: VecDeque<Arc<Event>>,
    accepting: bool,
}

pub struct RequestQueue {
    inner: Mutex<QueueInner>,
    available: Condvar,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                accepting: false,
            }),
            available: Condvar::new(),
        }
    }

    pub fn start_accepting(&self) {
        self.inner.lock().accepting = true;
        debug!("admission gate opened");
    }

    /// Closes the gate unless `agents_registered` is true, in which case
    /// this is a no-op: the gate stays open so in-flight work can drain
    /// through the agents that remain. This mirrors the source filter's
    /// `avflt_stop_accept`, which only closes the gate when its process
    /// table is empty.
    pub fn stop_accepting(&self, agents_registered: bool) {
        if agents_registered {
            trace!("stop_accepting is a no-op while agents remain registered");
            return;
        }
        self.inner.lock().accepting = false;
        debug!("admission gate closed");
    }

    pub fn is_stopped(&self) -> bool {
        !self.inner.lock().accepting
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Links `event` at the tail (FIFO arrival order) or the head.
    pub fn submit(&self, event: Arc<Event>, at_tail: bool) -> Result<(), SubmitError> {
        let mut g = self.inner.lock();
        if !g.accepting {
            return Err(SubmitError::NotAccepted);
        }
        if at_tail {
            g.items.push_back(event);
        } else {
            g.items.push_front(event);
        }
        self.available.notify_all();
        Ok(())
    }

    /// Hands an event back to the head of the queue, used when an agent
    /// fails to encode it. If the gate is closed (no agent left to retry
    /// it), the event is completed immediately with its current result so
    /// the submitter does not wait forever.
    pub fn readd(&self, event: &Arc<Event>) {
        if self.submit(Arc::clone(event), false).is_err() && event.completion.try_claim() {
            event.completion.signal();
        }
    }

    /// Blocks until a request is available, the gate is closed with nothing
    /// queued, or `interrupt` is set. On success assigns the event's id.
    pub fn pop(&self, ids: &IdAllocator, interrupt: &Interrupt) -> PopOutcome {
        let mut g = self.inner.lock();
        loop {
            if let Some(event) = g.items.pop_front() {
                event.set_id(ids.next());
                return PopOutcome::Event(event);
            }
            if !g.accepting {
                return PopOutcome::Stopped;
            }
            if interrupt.is_set() {
                return PopOutcome::Interrupted;
            }
            self.available.wait_for(&mut g, POLL_INTERVAL);
        }
    }

    /// Idempotently unlinks `event` from the queue, e.g. on submitter
    /// timeout. Returns whether it was actually present.
    pub fn remove(&self, event: &Arc<Event>) -> bool {
        let mut g = self.inner.lock();
        if let Some(pos) = g.items.iter().position(|e| Arc::ptr_eq(e, event)) {
            g.items.remove(pos);
            true
        } else {
            false
        }
    }

    /// If the gate is open, this is a no-op: live requests are never
    /// discarded while an agent might still pick them up. If closed, every
    /// queued event is completed with its default result (0 = continue) so
    /// no submitter is left blocked on an agent that will never arrive.
    /// Returns the number of events drained.
    pub fn drain(&self) -> usize {
        let drained: Vec<_> = {
            let mut g = self.inner.lock();
            if g.accepting {
                return 0;
            }
            g.items.drain(..).collect()
        };
        let n = drained.len();
        for event in drained {
            if event.completion.try_claim() {
                event.completion.signal();
            }
        }
        if n > 0 {
            debug!(count = n, "drained queued events on shutdown");
        }
        n
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new()
    }
}
