//! Pending-state bookkeeping for fan-out stages.
//!
//! Both fan-out boundaries — the backing store and the host-memory DMA
//! side-channel — split one sector request into many fixed-size sub-requests
//! and reassemble it when the last one completes. A [`PendingTable`] tracks
//! one entry per in-flight base address (the held transaction plus its
//! outstanding sub-addresses) and a reverse index from sub-address to base
//! for completion routing.
//!
//! Every violation here is a collaborator protocol error and aborts the
//! simulation: a completion for an unknown sub-address, a direction that
//! disagrees with the held transaction, or a double-started base address
//! cannot arise from valid input.

use std::collections::{HashMap, HashSet};

use crate::transaction::Transaction;

#[derive(Debug)]
struct PendingEntry {
    trans: Transaction,
    outstanding: HashSet<u64>,
}

/// In-flight fan-out state for one collaborator boundary.
#[derive(Debug)]
pub struct PendingTable {
    label: &'static str,
    entries: HashMap<u64, PendingEntry>,
    base_by_sub: HashMap<u64, u64>,
}

impl PendingTable {
    /// `label` names the boundary in panic and log messages.
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            entries: HashMap::new(),
            base_by_sub: HashMap::new(),
        }
    }

    /// Hold `trans` while its sub-requests are in flight under `base`.
    pub fn begin(&mut self, base: u64, trans: Transaction) {
        let prev = self.entries.insert(
            base,
            PendingEntry {
                trans,
                outstanding: HashSet::new(),
            },
        );
        assert!(
            prev.is_none(),
            "{}: base address {base:#x} already has an in-flight request",
            self.label
        );
    }

    /// Record one outstanding sub-request under a started base address.
    pub fn add_sub(&mut self, base: u64, sub: u64) {
        let entry = self
            .entries
            .get_mut(&base)
            .unwrap_or_else(|| panic!("{}: base address {base:#x} was never started", self.label));
        assert!(
            entry.outstanding.insert(sub),
            "{}: duplicate sub-request {sub:#x} under base {base:#x}",
            self.label
        );
        let prev = self.base_by_sub.insert(sub, base);
        assert!(
            prev.is_none(),
            "{}: sub-address {sub:#x} already in flight for base {:#x}",
            self.label,
            prev.unwrap_or(0)
        );
    }

    /// Mark one sub-request complete. Returns the held transaction when its
    /// last sub-request drains, removing all state for the base address in
    /// the same step.
    ///
    /// `is_write` must match the held transaction's direction; for the DMA
    /// boundary the caller inverts the memory-side direction first.
    pub fn complete(&mut self, sub: u64, is_write: bool) -> Option<Transaction> {
        let base = self
            .base_by_sub
            .remove(&sub)
            .unwrap_or_else(|| panic!("{}: completion for unknown sub-address {sub:#x}", self.label));
        let entry = self
            .entries
            .get_mut(&base)
            .unwrap_or_else(|| panic!("{}: no entry for base address {base:#x}", self.label));
        assert_eq!(
            is_write, entry.trans.is_write,
            "{}: completion direction disagrees with held request at {base:#x}",
            self.label
        );
        assert!(
            entry.outstanding.remove(&sub),
            "{}: sub-address {sub:#x} not outstanding under base {base:#x}",
            self.label
        );

        if entry.outstanding.is_empty() {
            Some(self.entries.remove(&base).unwrap().trans)
        } else {
            None
        }
    }

    /// Whether `sub` is an outstanding sub-request of any held transaction.
    pub fn contains_sub(&self, sub: u64) -> bool {
        self.base_by_sub.contains_key(&sub)
    }

    /// In-flight base addresses.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Outstanding sub-requests across all base addresses.
    pub fn sub_count(&self) -> usize {
        self.base_by_sub.len()
    }

    /// Assert the structural invariants that must hold between ticks: every
    /// entry has a non-empty outstanding set whose members map back to it,
    /// and every reverse-index row points at a set containing it.
    pub fn check_invariants(&self) {
        for (base, entry) in &self.entries {
            assert!(
                !entry.outstanding.is_empty(),
                "{}: drained entry {base:#x} was not removed",
                self.label
            );
            for sub in &entry.outstanding {
                assert_eq!(
                    self.base_by_sub.get(sub),
                    Some(base),
                    "{}: reverse index disagrees for sub {sub:#x}",
                    self.label
                );
            }
        }
        for (sub, base) in &self.base_by_sub {
            let entry = self
                .entries
                .get(base)
                .unwrap_or_else(|| panic!("{}: reverse index points at missing base {base:#x}", self.label));
            assert!(
                entry.outstanding.contains(sub),
                "{}: reverse index row {sub:#x} missing from its set",
                self.label
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trans(is_write: bool, addr: u64) -> Transaction {
        Transaction::new(is_write, addr, addr, 1, Vec::new())
    }

    fn table_with_subs(base: u64, subs: &[u64]) -> PendingTable {
        let mut t = PendingTable::new("test");
        t.begin(base, trans(true, base));
        for &sub in subs {
            t.add_sub(base, sub);
        }
        t
    }

    #[test]
    fn completes_when_last_sub_drains() {
        let mut t = table_with_subs(512, &[512, 576, 640]);
        assert!(t.complete(576, true).is_none());
        assert!(t.complete(512, true).is_none());
        let done = t.complete(640, true).unwrap();
        assert_eq!(done.addr, 512);
        assert!(t.is_empty());
        assert_eq!(t.sub_count(), 0);
    }

    #[test]
    fn completion_order_does_not_matter() {
        let mut t = table_with_subs(0, &[0, 64, 128]);
        assert!(t.complete(128, true).is_none());
        assert!(t.complete(0, true).is_none());
        assert!(t.complete(64, true).is_some());
    }

    #[test]
    fn tracks_multiple_bases_independently() {
        let mut t = PendingTable::new("test");
        t.begin(0, trans(false, 0));
        t.add_sub(0, 0);
        t.begin(512, trans(false, 512));
        t.add_sub(512, 512);

        assert_eq!(t.len(), 2);
        assert!(t.complete(512, false).is_some());
        assert_eq!(t.len(), 1);
        assert!(t.contains_sub(0));
        assert!(!t.contains_sub(512));
    }

    #[test]
    fn invariants_hold_mid_flight() {
        let t = table_with_subs(1024, &[1024, 1088]);
        t.check_invariants();
    }

    #[test]
    #[should_panic(expected = "already has an in-flight request")]
    fn double_begin_panics() {
        let mut t = PendingTable::new("test");
        t.begin(0, trans(true, 0));
        t.begin(0, trans(true, 0));
    }

    #[test]
    #[should_panic(expected = "unknown sub-address")]
    fn unknown_completion_panics() {
        let mut t = table_with_subs(0, &[0]);
        t.complete(64, true);
    }

    #[test]
    #[should_panic(expected = "direction disagrees")]
    fn direction_mismatch_panics() {
        let mut t = table_with_subs(0, &[0]);
        t.complete(0, false);
    }

    #[test]
    #[should_panic(expected = "already in flight")]
    fn cross_base_sub_collision_panics() {
        let mut t = PendingTable::new("test");
        t.begin(0, trans(true, 0));
        t.add_sub(0, 64);
        t.begin(512, trans(true, 512));
        t.add_sub(512, 64);
    }
}
