//! Priority-ordered timed events.
//!
//! Events are totally ordered by expiry, with stable FIFO among ties: a
//! monotonically increasing sequence number breaks equal expiry times in
//! insertion order. The orchestrator drains due events with [`EventQueue::pop_due`]
//! and dispatches each synchronously, which is the whole scheduling model —
//! "blocking" anywhere in the pipeline means scheduling a future event and
//! bailing out of the tick.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::config::RETRY_DELAY;
use crate::transaction::{EventKind, TransactionEvent};

#[derive(Debug)]
struct Queued {
    event: TransactionEvent,
    seq: u64,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.event.expire_time == other.event.expire_time && self.seq == other.seq
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.event.expire_time, self.seq).cmp(&(other.event.expire_time, other.seq))
    }
}

/// Expiry-ordered event sequence with stable FIFO among equal expiry times.
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<Reverse<Queued>>,
    next_seq: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an event, preserving expiry order and tie FIFO.
    pub fn add(&mut self, event: TransactionEvent) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(Queued { event, seq }));
    }

    /// Remove and return the head if it has expired at `now`.
    ///
    /// Call in a loop to drain everything due this tick; dispatch is the
    /// caller's job and runs synchronously between pops.
    pub fn pop_due(&mut self, now: u64) -> Option<TransactionEvent> {
        if self.heap.peek()?.0.event.expire_time <= now {
            Some(self.heap.pop().unwrap().0.event)
        } else {
            None
        }
    }

    /// Reschedule a refused event [`RETRY_DELAY`] ticks later.
    ///
    /// No current collaborator refuses a submission, but the capability is
    /// part of the scheduler contract. The retried event receives a fresh
    /// sequence number, so among events with equal expiry it queues last.
    pub fn retry(&mut self, mut event: TransactionEvent) {
        event.expire_time += RETRY_DELAY;
        self.add(event);
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Number of queued events of one kind. The transport busy flags must
    /// agree with these counts between ticks.
    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.heap
            .iter()
            .filter(|queued| queued.0.event.kind == kind)
            .count()
    }
}
