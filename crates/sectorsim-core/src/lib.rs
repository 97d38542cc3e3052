//! # sectorsim-core
//!
//! **Cycle-accurate latency modeling for PCIe-attached SSDs.**
//!
//! `sectorsim-core` is a discrete-event simulator core that sits between a
//! host workload generator and an external backing-store simulator, and
//! measures the end-to-end latency of host I/O requests. It models two
//! serialized transport layers (a host-side link such as PCIe or DMI, and a
//! device-side link such as SATA), the fan-out of each sector request into
//! backing-store sub-requests, and optional scatter/gather DMA traffic on a
//! host memory simulator running at its own clock.
//!
//! ## Quick start
//!
//! ```no_run
//! use sectorsim_core::{BackingSim, Completion, Config, SsdSystem};
//!
//! struct Nand;
//! impl BackingSim for Nand {
//!     fn add_transaction(&mut self, _is_write: bool, _addr: u64) -> bool { true }
//!     fn update(&mut self) -> Vec<Completion> { Vec::new() }
//! }
//!
//! let mut system = SsdSystem::new(0, Config::default(), Box::new(Nand)).unwrap();
//! system.register_completion(
//!     Some(Box::new(|id, addr, cycle| println!("read {addr:#x} done at {cycle} on {id}"))),
//!     None,
//! );
//! system.add_transaction(false, 0x1000, 4);
//! loop {
//!     system.update(); // one external tick
//!     if system.is_idle() {
//!         break;
//!     }
//! }
//! ```
//!
//! ## Architecture
//!
//! Submission → host link → device link → backing fan-out → device link
//! return → host link return → completion callback, with DMA gating the
//! pipeline entry for writes and the callback for reads.
//!
//! Everything is single-threaded and cooperative: each call to
//! [`SsdSystem::update`] advances external time by one tick, a clock-domain
//! crosser turns external ticks into internal ticks, and all handlers run to
//! completion inside a tick. Time is the tick count; there is no real-time
//! clock anywhere.

pub mod clock;
pub mod config;
pub mod event_queue;
pub mod layer;
pub mod pending;
pub mod system;
pub mod trace;
pub mod transaction;

pub use clock::ClockCrosser;
pub use config::{
    interface_delay, sector_align, Config, ConfigError, LinkConfig, BACKING_TXN_SIZE,
    COMMAND_SIZE, DMA_TXN_SIZE, DMI2, MAX_SECTORS, MIN_SECTORS, NO_LINK, PCIE2, PCIE3,
    PROTOCOL_EFFICIENCY, RETRY_DELAY, SATA2, SATA3, SECTOR_SIZE, VALID_LANE_COUNTS,
};
pub use event_queue::EventQueue;
pub use layer::Layer;
pub use system::{
    BackingSim, Completion, CompletionCallback, DmaRequestCallback, LinkStats, SsdSystem,
    SystemStats,
};
pub use trace::{LatencyRecord, RunMeta, RunSummary, RunWriter};
pub use transaction::{EventKind, SgEntry, Transaction, TransactionEvent};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
