//! Configuration surface and derived timing parameters.
//!
//! All timing derives from a small set of fixed constants plus a [`Config`]
//! record accepted at construction. Delays are expressed in internal clock
//! ticks; the internal clock is assumed to run at 1 GHz, so one tick is one
//! nanosecond and link delays fall straight out of bytes-per-second ratings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Host-visible I/O granularity in bytes.
pub const SECTOR_SIZE: u64 = 512;

/// Granularity of the backing-store simulator in bytes.
pub const BACKING_TXN_SIZE: u64 = 64;

/// Granularity of host-memory DMA sub-requests in bytes.
pub const DMA_TXN_SIZE: u64 = 64;

/// Smallest sector count accepted in one request.
pub const MIN_SECTORS: u32 = 1;

/// Largest sector count accepted in one request.
pub const MAX_SECTORS: u32 = 256;

/// Size of a bare command packet on a link, in bytes.
pub const COMMAND_SIZE: u64 = 16;

/// Fraction of raw link bandwidth left after protocol overhead, in percent.
pub const PROTOCOL_EFFICIENCY: u64 = 90;

/// Ticks added to an event's expiry when a refused submission is retried.
pub const RETRY_DELAY: u64 = 10;

// Link speed presets, in bytes per second.

/// SATA 2.0 (300 MB/s; also usable for first-generation SAS).
pub const SATA2: u64 = 300_000_000;
/// SATA 3.0 (600 MB/s).
pub const SATA3: u64 = 600_000_000;
/// PCIe 2.0, per lane.
pub const PCIE2: u64 = 500_000_000;
/// PCIe 3.0, per lane.
pub const PCIE3: u64 = 1_000_000_000;
/// Intel Direct Media Interface 2.0.
pub const DMI2: u64 = 2_500_000_000;
/// Absent link: every delay on the layer collapses to zero.
pub const NO_LINK: u64 = 0;

/// Lane counts a link layer accepts.
pub const VALID_LANE_COUNTS: [u64; 5] = [1, 2, 4, 8, 16];

/// Configuration rejected at construction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} clock ratio term must be positive")]
    ZeroClock(&'static str),
    #[error("{link} lane count must be 1, 2, 4, 8, or 16 (got {lanes})")]
    BadLaneCount { link: &'static str, lanes: u64 },
}

/// Parameters of one physical link layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Raw link bandwidth in bytes per second; [`NO_LINK`] (0) models an
    /// absent layer with zero delay.
    pub bytes_per_sec: u64,
    /// Parallel physical channels; delay divides by this (integer division).
    pub lanes: u64,
    /// Independent send and return paths when true; a shared channel that
    /// carries one direction at a time when false.
    pub full_duplex: bool,
}

impl LinkConfig {
    /// Ticks to move one sector's payload (command framing included) over one
    /// lane of this link.
    pub fn data_delay(&self) -> u64 {
        interface_delay(
            COMMAND_SIZE + SECTOR_SIZE,
            self.bytes_per_sec,
            PROTOCOL_EFFICIENCY,
        )
    }

    /// Ticks to move a bare command packet over one lane of this link.
    pub fn command_delay(&self) -> u64 {
        interface_delay(COMMAND_SIZE, self.bytes_per_sec, PROTOCOL_EFFICIENCY)
    }

    fn validate(&self, link: &'static str) -> Result<(), ConfigError> {
        if !VALID_LANE_COUNTS.contains(&self.lanes) {
            return Err(ConfigError::BadLaneCount {
                link,
                lanes: self.lanes,
            });
        }
        Ok(())
    }
}

/// Simulator configuration, accepted at construction and validated before any
/// state is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Internal ticks per `external_clock` external ticks.
    pub internal_clock: u64,
    /// External ticks per `internal_clock` internal ticks.
    pub external_clock: u64,
    /// Backing-store updates per `backing_clock_denom` internal ticks.
    pub backing_clock_num: u64,
    /// Internal ticks per `backing_clock_num` backing-store updates.
    pub backing_clock_denom: u64,
    /// Host-side link (PCIe/DMI): the layer between host and controller.
    pub host_link: LinkConfig,
    /// Device-side link (SATA/SAS): the layer between controller and media.
    pub device_link: LinkConfig,
    /// Model host-memory DMA traffic when true; skip the stage when false.
    pub enable_dma: bool,
}

impl Default for Config {
    /// A 1 GHz device model driven by a 2 GHz host, PCIe 3.0 ×16 host link,
    /// no device link, backing store at 667 MHz, DMA modeled.
    fn default() -> Self {
        Self {
            internal_clock: 1,
            external_clock: 2,
            backing_clock_num: 2,
            backing_clock_denom: 3,
            host_link: LinkConfig {
                bytes_per_sec: PCIE3,
                lanes: 16,
                full_duplex: true,
            },
            device_link: LinkConfig {
                bytes_per_sec: NO_LINK,
                lanes: 1,
                full_duplex: false,
            },
            enable_dma: true,
        }
    }
}

impl Config {
    /// Reject out-of-range values before any simulator state is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.internal_clock == 0 {
            return Err(ConfigError::ZeroClock("internal"));
        }
        if self.external_clock == 0 {
            return Err(ConfigError::ZeroClock("external"));
        }
        if self.backing_clock_num == 0 || self.backing_clock_denom == 0 {
            return Err(ConfigError::ZeroClock("backing"));
        }
        self.host_link.validate("host link")?;
        self.device_link.validate("device link")?;
        Ok(())
    }
}

/// Round an address down to its sector base.
pub fn sector_align(addr: u64) -> u64 {
    addr / SECTOR_SIZE * SECTOR_SIZE
}

/// Ticks (at 1 GHz) to move `num_bytes` over a link rated `bytes_per_sec`,
/// derated to `efficiency` percent. A rating of zero means no link at all and
/// yields zero delay.
pub fn interface_delay(num_bytes: u64, bytes_per_sec: u64, efficiency: u64) -> u64 {
    if bytes_per_sec == 0 {
        return 0;
    }
    let effective_bytes = num_bytes as f64 / (efficiency as f64 / 100.0);
    (effective_bytes / bytes_per_sec as f64 * 1e9).ceil() as u64
}
