//! Pipelined transport layer over one physical link.
//!
//! A [`Layer`] owns a send queue (toward the device) and a return queue
//! (toward the host), plus one busy flag per direction. Each internal tick it
//! starts at most one transfer per free direction by scheduling a timed
//! completion event; the orchestrator clears the busy flag when that event
//! fires and routes the transaction onward.
//!
//! Within a tick the return path is checked first, so returns have strict
//! priority over sends. In half-duplex mode a single in-flight transfer in
//! either direction blocks both.

use std::collections::VecDeque;

use log::debug;

use crate::config::LinkConfig;
use crate::event_queue::EventQueue;
use crate::transaction::{EventKind, Transaction, TransactionEvent};

/// One direction of a pipelined link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Send,
    Return,
}

/// Half/full-duplex pipelined channel with lane-scaled delay.
#[derive(Debug)]
pub struct Layer {
    name: &'static str,
    data_delay: u64,
    command_delay: u64,
    num_lanes: u64,
    full_duplex: bool,
    send_kind: EventKind,
    return_kind: EventKind,

    pub(crate) send_busy: bool,
    pub(crate) return_busy: bool,
    send_queue: VecDeque<Transaction>,
    return_queue: VecDeque<Transaction>,
}

impl Layer {
    pub fn new(
        name: &'static str,
        link: &LinkConfig,
        send_kind: EventKind,
        return_kind: EventKind,
    ) -> Self {
        Self {
            name,
            data_delay: link.data_delay(),
            command_delay: link.command_delay(),
            num_lanes: link.lanes,
            full_duplex: link.full_duplex,
            send_kind,
            return_kind,
            send_busy: false,
            return_busy: false,
            send_queue: VecDeque::new(),
            return_queue: VecDeque::new(),
        }
    }

    /// Start at most one transfer per free direction, return first.
    pub fn update(&mut self, events: &mut EventQueue, now: u64) {
        let mut half_duplex_busy = !self.full_duplex && (self.send_busy || self.return_busy);

        if !(half_duplex_busy || self.return_busy) {
            if let Some(trans) = self.return_queue.pop_front() {
                self.start(trans, Direction::Return, events, now);
            }
        }

        // A return started above occupies a half-duplex link for this tick.
        half_duplex_busy = !self.full_duplex && (self.send_busy || self.return_busy);

        if !(half_duplex_busy || self.send_busy) {
            if let Some(trans) = self.send_queue.pop_front() {
                self.start(trans, Direction::Send, events, now);
            }
        }
    }

    /// Queue a transaction toward the device.
    pub fn push_send(&mut self, trans: Transaction) {
        debug!(
            "{}: queued send ({}, {:#x})",
            self.name,
            if trans.is_write { "write" } else { "read" },
            trans.addr
        );
        self.send_queue.push_back(trans);
    }

    /// Queue a transaction back toward the host.
    pub fn push_return(&mut self, trans: Transaction) {
        debug!(
            "{}: queued return ({}, {:#x})",
            self.name,
            if trans.is_write { "write" } else { "read" },
            trans.addr
        );
        self.return_queue.push_back(trans);
    }

    /// The send transfer's completion event fired.
    pub fn send_done(&mut self) {
        debug_assert!(self.send_busy);
        self.send_busy = false;
    }

    /// The return transfer's completion event fired.
    pub fn return_done(&mut self) {
        debug_assert!(self.return_busy);
        self.return_busy = false;
    }

    pub fn send_queue_len(&self) -> usize {
        self.send_queue.len()
    }

    pub fn return_queue_len(&self) -> usize {
        self.return_queue.len()
    }

    /// Transfer time for one transaction in one direction.
    ///
    /// A write carries its payload on the forward path and a short completion
    /// on the return path; a read is the mirror. One payload per sector, and
    /// lanes divide the total (integer division — zero is legal and means the
    /// transfer completes in the tick it starts).
    fn delay(&self, trans: &Transaction, direction: Direction) -> u64 {
        let base = match direction {
            Direction::Send => {
                if trans.is_write {
                    self.data_delay
                } else {
                    self.command_delay
                }
            }
            Direction::Return => {
                if trans.is_write {
                    self.command_delay
                } else {
                    self.data_delay
                }
            }
        };
        base * u64::from(trans.num_sectors) / self.num_lanes
    }

    fn start(
        &mut self,
        trans: Transaction,
        direction: Direction,
        events: &mut EventQueue,
        now: u64,
    ) {
        let delay = self.delay(&trans, direction);
        let (kind, label) = match direction {
            Direction::Send => {
                self.send_busy = true;
                (self.send_kind, "send")
            }
            Direction::Return => {
                self.return_busy = true;
                (self.return_kind, "return")
            }
        };
        debug!(
            "{}: starting {} ({}, {:#x}) for {} ticks",
            self.name,
            label,
            if trans.is_write { "write" } else { "read" },
            trans.addr,
            delay
        );
        events.add(TransactionEvent::new(kind, trans, now + delay));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NO_LINK, PCIE3};

    fn layer(bytes_per_sec: u64, lanes: u64, full_duplex: bool) -> Layer {
        let link = LinkConfig {
            bytes_per_sec,
            lanes,
            full_duplex,
        };
        Layer::new("test link", &link, EventKind::HostSend, EventKind::HostReturn)
    }

    fn trans(is_write: bool, num_sectors: u32) -> Transaction {
        Transaction::new(is_write, 0, 0, num_sectors, Vec::new())
    }

    #[test]
    fn send_schedules_event_and_sets_busy() {
        let mut l = layer(NO_LINK, 1, true);
        let mut events = EventQueue::new();

        l.push_send(trans(true, 1));
        l.update(&mut events, 0);

        assert!(l.send_busy);
        assert!(!l.return_busy);
        let e = events.pop_due(0).unwrap();
        assert_eq!(e.kind, EventKind::HostSend);
        assert_eq!(e.expire_time, 0);
    }

    #[test]
    fn full_duplex_starts_both_directions() {
        let mut l = layer(NO_LINK, 1, true);
        let mut events = EventQueue::new();

        l.push_send(trans(true, 1));
        l.push_return(trans(false, 1));
        l.update(&mut events, 0);

        assert!(l.send_busy);
        assert!(l.return_busy);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn half_duplex_return_blocks_send() {
        let mut l = layer(NO_LINK, 1, false);
        let mut events = EventQueue::new();

        l.push_send(trans(true, 1));
        l.push_return(trans(false, 1));
        l.update(&mut events, 0);

        // Return has priority; the send must wait for the return to finish.
        assert!(l.return_busy);
        assert!(!l.send_busy);
        assert_eq!(events.count_kind(EventKind::HostReturn), 1);
        assert_eq!(events.count_kind(EventKind::HostSend), 0);
        assert_eq!(l.send_queue_len(), 1);

        // Once the return completes, the next update starts the send.
        l.return_done();
        l.update(&mut events, 1);
        assert!(l.send_busy);
        assert_eq!(events.count_kind(EventKind::HostSend), 1);
    }

    #[test]
    fn half_duplex_inflight_send_blocks_return() {
        let mut l = layer(NO_LINK, 1, false);
        let mut events = EventQueue::new();

        l.push_send(trans(true, 1));
        l.update(&mut events, 0);
        assert!(l.send_busy);

        l.push_return(trans(false, 1));
        l.update(&mut events, 1);
        assert!(!l.return_busy);
        assert_eq!(l.return_queue_len(), 1);
    }

    #[test]
    fn busy_direction_does_not_double_start() {
        let mut l = layer(NO_LINK, 1, true);
        let mut events = EventQueue::new();

        l.push_send(trans(true, 1));
        l.push_send(trans(true, 1));
        l.update(&mut events, 0);
        l.update(&mut events, 1);

        // Second send waits until send_done.
        assert_eq!(events.len(), 1);
        assert_eq!(l.send_queue_len(), 1);

        l.send_done();
        l.update(&mut events, 2);
        assert_eq!(events.len(), 2);
        assert_eq!(l.send_queue_len(), 0);
    }

    #[test]
    fn delay_scales_with_sectors_and_divides_by_lanes() {
        let link = LinkConfig {
            bytes_per_sec: PCIE3,
            lanes: 16,
            full_duplex: true,
        };
        let mut l = Layer::new("x16", &link, EventKind::HostSend, EventKind::HostReturn);
        let mut events = EventQueue::new();

        // PCIe 3.0 data delay is 587 ticks per sector: 587 * 4 / 16 = 146.
        l.push_send(trans(true, 4));
        l.update(&mut events, 100);
        let e = events.pop_due(u64::MAX).unwrap();
        assert_eq!(e.expire_time, 100 + 587 * 4 / 16);
    }

    #[test]
    fn read_uses_command_delay_forward_and_data_delay_back() {
        let link = LinkConfig {
            bytes_per_sec: PCIE3,
            lanes: 1,
            full_duplex: true,
        };
        let mut l = Layer::new("x1", &link, EventKind::HostSend, EventKind::HostReturn);
        let mut events = EventQueue::new();

        l.push_send(trans(false, 1));
        l.push_return(trans(false, 1));
        l.update(&mut events, 0);

        let first = events.pop_due(u64::MAX).unwrap();
        let second = events.pop_due(u64::MAX).unwrap();
        // Return (data, 587) sorts after send (command, 18).
        assert_eq!(first.kind, EventKind::HostSend);
        assert_eq!(first.expire_time, 18);
        assert_eq!(second.kind, EventKind::HostReturn);
        assert_eq!(second.expire_time, 587);
    }
}
