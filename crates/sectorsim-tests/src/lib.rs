//! Reference collaborators and measurement harness for sectorsim.
//!
//! Provides the pieces a workload driver needs around an
//! [`SsdSystem`](sectorsim_core::SsdSystem): a deterministic backing-store
//! model, a host memory model for the DMA side-channel, a seeded workload
//! generator, a drive-to-drain harness, and order-statistics over the
//! resulting latencies.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use sectorsim_core::{
    BackingSim, Completion, DmaRequestCallback, LatencyRecord, SsdSystem, DMA_TXN_SIZE,
    MAX_SECTORS, SECTOR_SIZE,
};

// ═══════════════════════════════════════════════════════════════════════════════
// Reference backing store
// ═══════════════════════════════════════════════════════════════════════════════

/// Backing store that completes every sub-request a fixed number of its own
/// updates after submission.
///
/// Latency 1 completes on the backing update in the same internal tick the
/// sub-request arrived — the fastest possible store. Submissions are
/// recorded for inspection.
pub struct FixedLatencyBacking {
    latency: u32,
    in_flight: VecDeque<(u32, Completion)>,
    submissions: Vec<(bool, u64)>,
}

impl FixedLatencyBacking {
    pub fn new(latency: u32) -> Self {
        assert!(latency > 0, "latency is counted in updates and must be positive");
        Self {
            latency,
            in_flight: VecDeque::new(),
            submissions: Vec::new(),
        }
    }

    /// Every sub-request submitted so far, in order.
    pub fn submissions(&self) -> &[(bool, u64)] {
        &self.submissions
    }
}

impl BackingSim for FixedLatencyBacking {
    fn add_transaction(&mut self, is_write: bool, addr: u64) -> bool {
        self.submissions.push((is_write, addr));
        self.in_flight
            .push_back((self.latency, Completion { is_write, addr }));
        true
    }

    fn update(&mut self) -> Vec<Completion> {
        let mut done = Vec::new();
        for (remaining, completion) in &mut self.in_flight {
            *remaining -= 1;
            if *remaining == 0 {
                done.push(*completion);
            }
        }
        self.in_flight.retain(|(remaining, _)| *remaining > 0);
        done
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Host memory model (DMA side-channel collaborator)
// ═══════════════════════════════════════════════════════════════════════════════

struct MemoryInner {
    pending: VecDeque<(u32, bool, u64)>,
    traffic: Vec<(bool, u64, u64)>,
}

/// Host memory simulator for the DMA side-channel.
///
/// Collects sub-requests emitted through the system's DMA callback and
/// replays each completion into [`SsdSystem::complete_dma`] a fixed number
/// of [`HostMemoryModel::update`] calls later.
pub struct HostMemoryModel {
    latency: u32,
    inner: Rc<RefCell<MemoryInner>>,
}

impl HostMemoryModel {
    pub fn new(latency: u32) -> Self {
        assert!(latency > 0, "latency is counted in updates and must be positive");
        Self {
            latency,
            inner: Rc::new(RefCell::new(MemoryInner {
                pending: VecDeque::new(),
                traffic: Vec::new(),
            })),
        }
    }

    /// Callback to hand to [`SsdSystem::register_dma`].
    pub fn dma_callback(&self) -> DmaRequestCallback {
        let inner = Rc::clone(&self.inner);
        let latency = self.latency;
        Box::new(move |is_write, addr, cycle| {
            let mut inner = inner.borrow_mut();
            inner.traffic.push((is_write, addr, cycle));
            inner.pending.push_back((latency, is_write, addr));
        })
    }

    /// Advance one memory tick, delivering due completions to the system.
    pub fn update(&mut self, system: &mut SsdSystem) {
        let due: Vec<(bool, u64)> = {
            let mut inner = self.inner.borrow_mut();
            let mut due = Vec::new();
            for (remaining, is_write, addr) in &mut inner.pending {
                *remaining -= 1;
                if *remaining == 0 {
                    due.push((*is_write, *addr));
                }
            }
            inner.pending.retain(|(remaining, _, _)| *remaining > 0);
            due
        };
        for (is_write, addr) in due {
            system.complete_dma(is_write, addr);
        }
    }

    /// Every DMA sub-request seen so far: `(is_write, addr, cycle)`.
    pub fn traffic(&self) -> Vec<(bool, u64, u64)> {
        self.inner.borrow().traffic.clone()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Workload generation
// ═══════════════════════════════════════════════════════════════════════════════

/// Parameters for a synthetic workload.
#[derive(Debug, Clone)]
pub struct WorkloadSpec {
    /// Total requests to generate.
    pub requests: usize,
    /// Fraction of requests that are reads, in `[0, 1]`.
    pub read_fraction: f64,
    /// Upper bound on sectors per request (inclusive).
    pub max_sectors: u32,
    /// Address space size in sectors.
    pub address_sectors: u64,
    /// Submit addresses with a random intra-sector offset.
    pub unaligned: bool,
    /// Attach a scatter/gather region to every request.
    pub dma: bool,
    /// RNG seed; equal seeds generate equal workloads.
    pub seed: u64,
}

impl Default for WorkloadSpec {
    fn default() -> Self {
        Self {
            requests: 1000,
            read_fraction: 0.5,
            max_sectors: 8,
            address_sectors: 1 << 20,
            unaligned: false,
            dma: false,
            seed: 1,
        }
    }
}

impl WorkloadSpec {
    /// Host memory to pass to `register_dma` so that every generated
    /// scatter/gather region is in range.
    pub fn dma_memory_span(&self) -> u64 {
        self.requests as u64 * self.region_stride()
    }

    /// Per-request host memory stride: the largest request payload, rounded
    /// up to the DMA granularity.
    fn region_stride(&self) -> u64 {
        let bytes = u64::from(self.max_sectors.min(MAX_SECTORS)) * SECTOR_SIZE;
        bytes.next_multiple_of(DMA_TXN_SIZE)
    }
}

/// One generated request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub is_write: bool,
    pub addr: u64,
    pub num_sectors: u32,
    /// Scatter/gather region `(base, len)` to buffer before submission.
    pub sg: Option<(u64, u64)>,
}

/// Generate a workload. Deterministic in the seed.
pub fn generate(spec: &WorkloadSpec) -> Vec<Request> {
    assert!(spec.max_sectors >= 1 && spec.max_sectors <= MAX_SECTORS);
    assert!(spec.address_sectors > 0);

    let mut rng = StdRng::seed_from_u64(spec.seed);
    let stride = spec.region_stride();

    (0..spec.requests)
        .map(|i| {
            let is_write = !rng.random_bool(spec.read_fraction.clamp(0.0, 1.0));
            let num_sectors = rng.random_range(1..=spec.max_sectors);
            let sector = rng.random_range(0..spec.address_sectors);
            let offset = if spec.unaligned {
                rng.random_range(0..SECTOR_SIZE)
            } else {
                0
            };
            let sg = spec.dma.then(|| {
                let len = u64::from(num_sectors) * SECTOR_SIZE;
                (i as u64 * stride, len)
            });
            Request {
                is_write,
                addr: sector * SECTOR_SIZE + offset,
                num_sectors,
                sg,
            }
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Drive-to-drain harness
// ═══════════════════════════════════════════════════════════════════════════════

/// Everything measured over one workload run.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// One row per retired request, in completion order.
    pub records: Vec<LatencyRecord>,
    /// Internal ticks consumed by the whole run.
    pub total_cycles: u64,
    pub reads: u64,
    pub writes: u64,
}

impl RunResult {
    /// Completion latencies in completion order.
    pub fn latencies(&self) -> Vec<u64> {
        self.records.iter().map(LatencyRecord::latency).collect()
    }
}

struct Pending {
    submit_cycle: u64,
    is_write: bool,
    num_sectors: u32,
    sectors: Vec<u64>,
}

/// Drive a workload through the system until every request completes.
///
/// Keeps up to `queue_depth` requests outstanding, holding back any request
/// that would overlap an in-flight sector range (the simulator treats
/// overlap as a caller protocol violation). Registers its own completion
/// callbacks. `memory` must be supplied when the system was built with DMA
/// enabled and the workload carries scatter/gather regions. Raising `stop`
/// halts submission; the run drains what is in flight and returns early.
///
/// Panics if the workload does not drain within `max_updates` external ticks.
pub fn run_workload(
    system: &mut SsdSystem,
    requests: &[Request],
    queue_depth: usize,
    max_updates: u64,
    mut memory: Option<&mut HostMemoryModel>,
    stop: Option<&AtomicBool>,
) -> RunResult {
    assert!(queue_depth > 0);

    let completions: Rc<RefCell<Vec<(u64, u64)>>> = Rc::new(RefCell::new(Vec::new()));
    let read_log = Rc::clone(&completions);
    let write_log = Rc::clone(&completions);
    system.register_completion(
        Some(Box::new(move |_, addr, cycle| {
            read_log.borrow_mut().push((addr, cycle));
        })),
        Some(Box::new(move |_, addr, cycle| {
            write_log.borrow_mut().push((addr, cycle));
        })),
    );

    let mut next = 0usize;
    let mut in_flight_sectors: HashSet<u64> = HashSet::new();
    let mut in_flight: HashMap<u64, Pending> = HashMap::new();
    let mut result = RunResult {
        records: Vec::with_capacity(requests.len()),
        total_cycles: 0,
        reads: 0,
        writes: 0,
    };

    for _ in 0..max_updates {
        let stopped = stop.is_some_and(|flag| flag.load(Ordering::Relaxed));

        // Submit as much of the window as currently fits.
        while !stopped && next < requests.len() && in_flight.len() < queue_depth {
            let request = &requests[next];
            let base = sectorsim_core::sector_align(request.addr);
            let sectors: Vec<u64> = (0..u64::from(request.num_sectors))
                .map(|i| base + i * SECTOR_SIZE)
                .collect();
            if sectors.iter().any(|s| in_flight_sectors.contains(s))
                || in_flight.contains_key(&request.addr)
            {
                break;
            }

            if let Some((sg_base, sg_len)) = request.sg {
                system.add_sg_entry(sg_base, sg_len);
            }
            system.add_transaction(request.is_write, request.addr, request.num_sectors);
            in_flight_sectors.extend(sectors.iter().copied());
            in_flight.insert(
                request.addr,
                Pending {
                    submit_cycle: system.current_cycle(),
                    is_write: request.is_write,
                    num_sectors: request.num_sectors,
                    sectors,
                },
            );
            next += 1;
        }

        system.update();
        if let Some(memory) = memory.as_deref_mut() {
            memory.update(system);
        }

        for (addr, cycle) in completions.borrow_mut().drain(..) {
            let pending = in_flight
                .remove(&addr)
                .expect("completion for a request the harness never submitted");
            for sector in pending.sectors {
                in_flight_sectors.remove(&sector);
            }
            result.records.push(LatencyRecord {
                submit_cycle: pending.submit_cycle,
                complete_cycle: cycle,
                is_write: pending.is_write,
                orig_addr: addr,
                num_sectors: pending.num_sectors,
            });
            if pending.is_write {
                result.writes += 1;
            } else {
                result.reads += 1;
            }
        }

        if (next == requests.len() || stopped) && in_flight.is_empty() && system.is_idle() {
            result.total_cycles = system.current_cycle();
            return result;
        }
    }

    panic!("workload did not drain within {max_updates} updates");
}

// ═══════════════════════════════════════════════════════════════════════════════
// Latency statistics
// ═══════════════════════════════════════════════════════════════════════════════

/// Order statistics over a set of completion latencies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyStats {
    pub count: usize,
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
}

impl LatencyStats {
    pub fn from_latencies(latencies: &[u64]) -> Self {
        if latencies.is_empty() {
            return Self {
                count: 0,
                min: 0,
                max: 0,
                mean: 0.0,
                p50: 0,
                p95: 0,
                p99: 0,
            };
        }
        let mut sorted = latencies.to_vec();
        sorted.sort_unstable();
        let sum: u64 = sorted.iter().sum();
        Self {
            count: sorted.len(),
            min: sorted[0],
            max: *sorted.last().unwrap(),
            mean: sum as f64 / sorted.len() as f64,
            p50: percentile(&sorted, 50),
            p95: percentile(&sorted, 95),
            p99: percentile(&sorted, 99),
        }
    }
}

/// Nearest-rank percentile over an ascending-sorted slice.
fn percentile(sorted: &[u64], pct: u32) -> u64 {
    debug_assert!(!sorted.is_empty() && pct <= 100);
    let rank = (u64::from(pct) * sorted.len() as u64).div_ceil(100);
    sorted[(rank.max(1) - 1) as usize]
}
