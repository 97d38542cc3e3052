//! Value records carried through the pipeline.
//!
//! A [`Transaction`] is created at submission, cloned into queues and pending
//! maps as it moves, and retired when its host callback fires. Nothing in the
//! pipeline holds a reference to a transaction in flight; everything is
//! by-value.

use crate::config::SECTOR_SIZE;

/// One contiguous region of host memory involved in a DMA transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SgEntry {
    /// Host memory base address.
    pub base: u64,
    /// Region length in bytes.
    pub len: u64,
}

/// A host I/O request as it moves through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Direction: `true` moves data host → device.
    pub is_write: bool,
    /// Sector-aligned base address in bytes.
    pub addr: u64,
    /// Address exactly as the host submitted it; returned verbatim in the
    /// completion callback.
    pub orig_addr: u64,
    /// Sectors covered, in `[MIN_SECTORS, MAX_SECTORS]`.
    pub num_sectors: u32,
    /// Validated scatter/gather list; empty means no DMA for this request.
    pub sg: Vec<SgEntry>,
}

impl Transaction {
    pub fn new(is_write: bool, addr: u64, orig_addr: u64, num_sectors: u32, sg: Vec<SgEntry>) -> Self {
        Self {
            is_write,
            addr,
            orig_addr,
            num_sectors,
            sg,
        }
    }

    /// Sector-aligned addresses this request touches.
    pub fn sectors(&self) -> impl Iterator<Item = u64> {
        let addr = self.addr;
        (0..u64::from(self.num_sectors)).map(move |i| addr + i * SECTOR_SIZE)
    }
}

/// Which link stage completion an event marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Host-link forward transfer finished.
    HostSend,
    /// Host-link return transfer finished.
    HostReturn,
    /// Device-link forward transfer finished.
    DeviceSend,
    /// Device-link return transfer finished.
    DeviceReturn,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HostSend => write!(f, "host send"),
            Self::HostReturn => write!(f, "host return"),
            Self::DeviceSend => write!(f, "device send"),
            Self::DeviceReturn => write!(f, "device return"),
        }
    }
}

/// A timed completion scheduled on the event queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionEvent {
    pub kind: EventKind,
    pub trans: Transaction,
    /// Internal tick at which the event fires.
    pub expire_time: u64,
}

impl TransactionEvent {
    pub fn new(kind: EventKind, trans: Transaction, expire_time: u64) -> Self {
        Self {
            kind,
            trans,
            expire_time,
        }
    }
}
