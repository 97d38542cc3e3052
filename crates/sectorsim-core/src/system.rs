//! System orchestrator.
//!
//! [`SsdSystem`] wires the event scheduler, the two link layers, the two
//! clock-domain crossers, the backing-store fan-out, and the DMA side-channel
//! into the public device model. All mutable state lives here and is touched
//! only from the single-threaded tick handlers; transactions move by value.
//!
//! Pipeline for a write:
//! host → [DMA read of host memory] → host link → device link → backing
//! fan-out → device link return → host link return → host callback.
//! A read runs the same path without the leading DMA; instead the DMA (a
//! write to host memory) happens after the host-link return, immediately
//! before the callback.

use std::collections::HashSet;

use log::{debug, trace, warn};

use crate::clock::ClockCrosser;
use crate::config::{
    sector_align, Config, ConfigError, BACKING_TXN_SIZE, DMA_TXN_SIZE, MAX_SECTORS, MIN_SECTORS,
    SECTOR_SIZE,
};
use crate::event_queue::EventQueue;
use crate::layer::Layer;
use crate::pending::PendingTable;
use crate::transaction::{EventKind, SgEntry, Transaction, TransactionEvent};

/// One finished sub-request reported by the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub is_write: bool,
    pub addr: u64,
}

/// The external NAND/memory-subsystem simulator behind the device link.
///
/// Completions returned from [`BackingSim::update`] are handled synchronously
/// inside the internal tick that drains them, in the order returned.
pub trait BackingSim {
    /// Submit one sub-request. The contract says this never refuses; a
    /// refusal aborts the simulation (the scheduler's retry path exists for
    /// future collaborators that do refuse).
    fn add_transaction(&mut self, is_write: bool, addr: u64) -> bool;

    /// Advance one backing-store clock tick and report finished sub-requests.
    fn update(&mut self) -> Vec<Completion>;
}

/// Host completion callback: `(system_id, orig_addr, cycle)`.
pub type CompletionCallback = Box<dyn FnMut(u32, u64, u64)>;

/// Memory-simulator submission callback: `(is_write, addr, cycle)`.
pub type DmaRequestCallback = Box<dyn FnMut(bool, u64, u64)>;

/// Queue depths and busy state of one link layer.
#[derive(Debug, Clone, Copy)]
pub struct LinkStats {
    pub send_queue: usize,
    pub return_queue: usize,
    pub send_busy: bool,
    pub return_busy: bool,
}

/// Point-in-time snapshot of simulator state.
#[derive(Debug, Clone)]
pub struct SystemStats {
    pub current_cycle: u64,
    pub events_queued: usize,
    pub pending_sectors: usize,
    pub backing_in_flight: usize,
    pub backing_outstanding: usize,
    pub dma_in_flight: usize,
    pub dma_outstanding: usize,
    pub host_link: LinkStats,
    pub device_link: LinkStats,
    pub completed_reads: u64,
    pub completed_writes: u64,
}

/// The device model: a PCIe-attached SSD measured end to end.
pub struct SsdSystem {
    system_id: u32,
    config: Config,
    current_cycle: u64,

    external_crosser: ClockCrosser,
    backing_crosser: ClockCrosser,
    host_link: Layer,
    device_link: Layer,
    events: EventQueue,

    backing: Box<dyn BackingSim>,
    backing_pending: PendingTable,
    dma_pending: PendingTable,
    pending_sectors: HashSet<u64>,

    sg_buffer: Vec<SgEntry>,
    read_done: Option<CompletionCallback>,
    write_done: Option<CompletionCallback>,
    dma_request: Option<DmaRequestCallback>,
    dma_memory_size: u64,

    completed_reads: u64,
    completed_writes: u64,
}

impl SsdSystem {
    /// Build a system from a validated configuration and a backing store.
    pub fn new(
        system_id: u32,
        config: Config,
        backing: Box<dyn BackingSim>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            system_id,
            external_crosser: ClockCrosser::new(config.internal_clock, config.external_clock),
            backing_crosser: ClockCrosser::new(config.backing_clock_num, config.backing_clock_denom),
            host_link: Layer::new(
                "host link",
                &config.host_link,
                EventKind::HostSend,
                EventKind::HostReturn,
            ),
            device_link: Layer::new(
                "device link",
                &config.device_link,
                EventKind::DeviceSend,
                EventKind::DeviceReturn,
            ),
            events: EventQueue::new(),
            backing,
            backing_pending: PendingTable::new("backing store"),
            dma_pending: PendingTable::new("dma"),
            pending_sectors: HashSet::new(),
            sg_buffer: Vec::new(),
            read_done: None,
            write_done: None,
            dma_request: None,
            dma_memory_size: 0,
            completed_reads: 0,
            completed_writes: 0,
            current_cycle: 0,
            config,
        })
    }

    /// Whether a new request would be accepted right now. Always true — the
    /// queues are unbounded; backpressure is not part of this model.
    pub fn will_accept(&self) -> bool {
        true
    }

    /// Register host completion callbacks. `None` swallows that direction's
    /// completions.
    pub fn register_completion(
        &mut self,
        read_done: Option<CompletionCallback>,
        write_done: Option<CompletionCallback>,
    ) {
        self.read_done = read_done;
        self.write_done = write_done;
    }

    /// Register the memory-simulator submission callback and the size of
    /// host memory. Required before any transaction that carries
    /// scatter/gather entries.
    pub fn register_dma(&mut self, dma_request: DmaRequestCallback, memory_size: u64) {
        self.dma_request = Some(dma_request);
        self.dma_memory_size = memory_size;
    }

    /// Append one scatter/gather entry to the list consumed by the next
    /// [`SsdSystem::add_transaction`] call.
    pub fn add_sg_entry(&mut self, base: u64, len: u64) {
        self.sg_buffer.push(SgEntry { base, len });
    }

    /// Submit one host I/O request covering `num_sectors` sectors at `addr`.
    ///
    /// The address is sector-aligned internally; the completion callback
    /// reports `addr` exactly as submitted. Every sector touched must be
    /// idle — an overlapping in-flight request is a caller protocol
    /// violation and aborts. The buffered scatter/gather list is consumed.
    pub fn add_transaction(&mut self, is_write: bool, addr: u64, num_sectors: u32) -> bool {
        assert!(
            (MIN_SECTORS..=MAX_SECTORS).contains(&num_sectors),
            "sector count {num_sectors} outside [{MIN_SECTORS}, {MAX_SECTORS}]"
        );

        let aligned = sector_align(addr);
        if aligned != addr {
            debug!(
                "{}: unaligned submission (orig {addr:#x}, aligned {aligned:#x})",
                self.current_cycle
            );
        }

        let buffered = std::mem::take(&mut self.sg_buffer);
        let sg = if self.config.enable_dma {
            self.validate_sg(buffered)
        } else {
            Vec::new()
        };

        let trans = Transaction::new(is_write, aligned, addr, num_sectors, sg);

        for sector in trans.sectors() {
            assert!(
                !self.pending_sectors.contains(&sector),
                "sector {sector:#x} already has an in-flight request"
            );
        }
        for sector in trans.sectors() {
            self.pending_sectors.insert(sector);
        }

        if self.config.enable_dma && trans.is_write && self.start_dma(&trans) {
            // Write payloads are pulled out of host memory first; the
            // transaction enters the host link when the last DMA sub-request
            // drains (see complete_dma).
        } else {
            self.host_link.push_send(trans);
        }
        true
    }

    /// Whether `addr` is an outstanding DMA sub-request of this system. Lets
    /// a host sharing one memory simulator route completions.
    pub fn is_dma_transaction(&self, addr: u64) -> bool {
        self.dma_pending.contains_sub(addr)
    }

    /// Report one finished memory-simulator sub-request.
    ///
    /// `is_write` is the memory-side direction, which is inverted relative to
    /// the SSD direction: an SSD write reads host memory and vice versa.
    pub fn complete_dma(&mut self, is_write: bool, addr: u64) {
        if let Some(trans) = self.dma_pending.complete(addr, !is_write) {
            debug!(
                "{}: DMA drained for base {:#x}",
                self.current_cycle, trans.addr
            );
            if trans.is_write {
                self.host_link.push_send(trans);
            } else {
                self.issue_host_callback(&trans);
            }
        }
    }

    /// Advance external time by one tick.
    pub fn update(&mut self) {
        for _ in 0..self.external_crosser.step() {
            self.update_internal();
        }
    }

    /// Internal ticks elapsed so far.
    pub fn current_cycle(&self) -> u64 {
        self.current_cycle
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether every queue, link, and pending map has drained.
    pub fn is_idle(&self) -> bool {
        self.events.is_empty()
            && self.pending_sectors.is_empty()
            && self.backing_pending.is_empty()
            && self.dma_pending.is_empty()
            && self.host_link.send_queue_len() == 0
            && self.host_link.return_queue_len() == 0
            && self.device_link.send_queue_len() == 0
            && self.device_link.return_queue_len() == 0
    }

    /// Snapshot queue depths, busy flags, and completion totals.
    pub fn stats(&self) -> SystemStats {
        SystemStats {
            current_cycle: self.current_cycle,
            events_queued: self.events.len(),
            pending_sectors: self.pending_sectors.len(),
            backing_in_flight: self.backing_pending.len(),
            backing_outstanding: self.backing_pending.sub_count(),
            dma_in_flight: self.dma_pending.len(),
            dma_outstanding: self.dma_pending.sub_count(),
            host_link: LinkStats {
                send_queue: self.host_link.send_queue_len(),
                return_queue: self.host_link.return_queue_len(),
                send_busy: self.host_link.send_busy,
                return_busy: self.host_link.return_busy,
            },
            device_link: LinkStats {
                send_queue: self.device_link.send_queue_len(),
                return_queue: self.device_link.return_queue_len(),
                send_busy: self.device_link.send_busy,
                return_busy: self.device_link.return_busy,
            },
            completed_reads: self.completed_reads,
            completed_writes: self.completed_writes,
        }
    }

    /// Assert every structural invariant that must hold between ticks.
    /// Cheap enough for test harnesses to call at every tick boundary.
    pub fn assert_invariants(&self) {
        self.backing_pending.check_invariants();
        self.dma_pending.check_invariants();
        assert_eq!(
            self.host_link.send_busy as usize,
            self.events.count_kind(EventKind::HostSend),
            "host link send busy flag disagrees with scheduled events"
        );
        assert_eq!(
            self.host_link.return_busy as usize,
            self.events.count_kind(EventKind::HostReturn),
            "host link return busy flag disagrees with scheduled events"
        );
        assert_eq!(
            self.device_link.send_busy as usize,
            self.events.count_kind(EventKind::DeviceSend),
            "device link send busy flag disagrees with scheduled events"
        );
        assert_eq!(
            self.device_link.return_busy as usize,
            self.events.count_kind(EventKind::DeviceReturn),
            "device link return busy flag disagrees with scheduled events"
        );
    }

    /// One internal tick: device link, host link, due events, backing store,
    /// then the cycle counter. Running the scheduler after the link updates
    /// lets zero-delay transfers complete in the tick they start, and
    /// checking each link's return queue first keeps return priority.
    fn update_internal(&mut self) {
        self.device_link.update(&mut self.events, self.current_cycle);
        self.host_link.update(&mut self.events, self.current_cycle);

        while let Some(event) = self.events.pop_due(self.current_cycle) {
            self.dispatch(event);
        }

        for _ in 0..self.backing_crosser.step() {
            for completion in self.backing.update() {
                self.handle_backing_completion(completion.is_write, completion.addr);
            }
        }

        self.current_cycle += 1;

        if self.current_cycle % 10_000 == 0 {
            trace!(
                "{}: events={} host={}/{} device={}/{} backing={} dma={}",
                self.current_cycle,
                self.events.len(),
                self.host_link.send_queue_len(),
                self.host_link.return_queue_len(),
                self.device_link.send_queue_len(),
                self.device_link.return_queue_len(),
                self.backing_pending.sub_count(),
                self.dma_pending.sub_count(),
            );
        }
    }

    fn dispatch(&mut self, event: TransactionEvent) {
        match event.kind {
            EventKind::HostSend => {
                self.host_link.send_done();
                self.device_link.push_send(event.trans);
            }
            EventKind::HostReturn => {
                self.host_link.return_done();
                for sector in event.trans.sectors() {
                    assert!(
                        self.pending_sectors.remove(&sector),
                        "sector {sector:#x} finished without a pending entry"
                    );
                }
                if self.config.enable_dma && !event.trans.is_write && self.start_dma(&event.trans) {
                    // Read payloads land in host memory last; the callback
                    // fires when the DMA write drains (see complete_dma).
                } else {
                    self.issue_host_callback(&event.trans);
                }
            }
            EventKind::DeviceSend => {
                self.device_link.send_done();
                self.start_backing(event.trans);
            }
            EventKind::DeviceReturn => {
                self.device_link.return_done();
                self.host_link.push_return(event.trans);
            }
        }
    }

    /// Split one sector request into backing-store sub-requests.
    fn start_backing(&mut self, trans: Transaction) {
        let base = trans.addr;
        let count = u64::from(trans.num_sectors) * SECTOR_SIZE / BACKING_TXN_SIZE;
        let is_write = trans.is_write;

        self.backing_pending.begin(base, trans);
        for i in 0..count {
            let sub = base + i * BACKING_TXN_SIZE;
            self.backing_pending.add_sub(base, sub);
            let accepted = self.backing.add_transaction(is_write, sub);
            assert!(accepted, "backing store refused sub-request {sub:#x}");
        }
        debug!(
            "{}: fanned out {count} backing sub-requests for base {base:#x}",
            self.current_cycle
        );
    }

    fn handle_backing_completion(&mut self, is_write: bool, sub: u64) {
        if let Some(trans) = self.backing_pending.complete(sub, is_write) {
            debug!(
                "{}: backing store finished base {:#x}",
                self.current_cycle, trans.addr
            );
            self.device_link.push_return(trans);
        }
    }

    /// Expand the transaction's scatter/gather list into memory-simulator
    /// sub-requests. Returns false (and records nothing) when the list
    /// expands to nothing, in which case the pipeline advances immediately.
    fn start_dma(&mut self, trans: &Transaction) -> bool {
        let subs: Vec<u64> = trans
            .sg
            .iter()
            .flat_map(|entry| (0..entry.len / DMA_TXN_SIZE).map(move |j| entry.base + j * DMA_TXN_SIZE))
            .collect();
        if subs.is_empty() {
            debug!(
                "{}: no scatter/gather regions for base {:#x}, skipping DMA",
                self.current_cycle, trans.addr
            );
            return false;
        }

        // An SSD write reads host memory; an SSD read writes it.
        let mem_is_write = !trans.is_write;
        let cycle = self.current_cycle;
        let count = subs.len();

        self.dma_pending.begin(trans.addr, trans.clone());
        for sub in subs {
            self.dma_pending.add_sub(trans.addr, sub);
            let dma_request = self
                .dma_request
                .as_mut()
                .expect("DMA callback must be registered before DMA transactions");
            dma_request(mem_is_write, sub, cycle);
        }
        debug!(
            "{}: issued {count} DMA sub-requests for base {:#x}",
            self.current_cycle, trans.addr
        );
        true
    }

    /// Drop invalid scatter/gather entries, keeping the rest. A request
    /// whose whole list is dropped still runs — it just skips the DMA stage.
    fn validate_sg(&self, entries: Vec<SgEntry>) -> Vec<SgEntry> {
        if entries.is_empty() {
            return entries;
        }
        assert!(
            self.dma_request.is_some(),
            "DMA callback must be registered before submitting scatter/gather entries"
        );

        let max_len = u64::from(MAX_SECTORS) * SECTOR_SIZE;
        let mut seen: HashSet<u64> = HashSet::new();
        let mut kept = Vec::with_capacity(entries.len());

        for entry in entries {
            if entry.base >= self.dma_memory_size {
                warn!(
                    "dropping scatter/gather entry ({:#x}, {}): base outside host memory",
                    entry.base, entry.len
                );
                continue;
            }
            if entry.len > max_len {
                warn!(
                    "dropping scatter/gather entry ({:#x}, {}): longer than {max_len} bytes",
                    entry.base, entry.len
                );
                continue;
            }
            if entry.base % DMA_TXN_SIZE != 0 || entry.len % DMA_TXN_SIZE != 0 {
                warn!(
                    "dropping scatter/gather entry ({:#x}, {}): not {DMA_TXN_SIZE}-byte aligned",
                    entry.base, entry.len
                );
                continue;
            }
            let subs: Vec<u64> = (0..entry.len / DMA_TXN_SIZE)
                .map(|j| entry.base + j * DMA_TXN_SIZE)
                .collect();
            if subs.iter().any(|sub| seen.contains(sub)) {
                warn!(
                    "dropping scatter/gather entry ({:#x}, {}): duplicate host address in list",
                    entry.base, entry.len
                );
                continue;
            }
            seen.extend(subs);
            kept.push(entry);
        }
        kept
    }

    fn issue_host_callback(&mut self, trans: &Transaction) {
        if trans.is_write {
            self.completed_writes += 1;
        } else {
            self.completed_reads += 1;
        }
        debug!(
            "{}: completing ({}, {:#x})",
            self.current_cycle,
            if trans.is_write { "write" } else { "read" },
            trans.orig_addr
        );

        let system_id = self.system_id;
        let cycle = self.current_cycle;
        let callback = if trans.is_write {
            self.write_done.as_mut()
        } else {
            self.read_done.as_mut()
        };
        if let Some(callback) = callback {
            callback(system_id, trans.orig_addr, cycle);
        }
    }
}
