//! Run recording for latency analysis.
//!
//! Records one row per retired transaction, for offline analysis of how a
//! configuration behaves under a workload.
//!
//! # Storage format
//!
//! Each run is a directory containing:
//! - `run.json` — metadata (run id, start time, full simulator configuration)
//! - `latencies.csv` — per-transaction rows (`submit_cycle, complete_cycle,
//!   latency, is_write, orig_addr, num_sectors`)
//! - `summary.json` — aggregate counts and latency bounds, written by
//!   [`RunWriter::finish`], or best-effort on drop if `finish` was never
//!   reached

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;

/// Rows between periodic flushes, balancing crash-safety against syscalls.
const FLUSH_INTERVAL: u64 = 64;

/// One retired transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyRecord {
    pub submit_cycle: u64,
    pub complete_cycle: u64,
    pub is_write: bool,
    pub orig_addr: u64,
    pub num_sectors: u32,
}

impl LatencyRecord {
    /// End-to-end latency in internal ticks.
    pub fn latency(&self) -> u64 {
        self.complete_cycle - self.submit_cycle
    }
}

/// Run metadata written to run.json when recording starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMeta {
    pub version: u32,
    pub id: String,
    pub started_unix_ms: u64,
    pub config: Config,
    pub sectorsim_version: String,
}

/// Aggregate results written to summary.json by [`RunWriter::finish`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub transactions: u64,
    pub reads: u64,
    pub writes: u64,
    pub min_latency: u64,
    pub max_latency: u64,
    pub mean_latency: f64,
}

/// Handles incremental file I/O for one recorded run.
///
/// Implements `Drop` to flush the CSV buffer and write a best-effort
/// summary.json if [`RunWriter::finish`] was never called (e.g., due to a
/// panic or early exit).
pub struct RunWriter {
    run_dir: PathBuf,
    csv_writer: BufWriter<File>,
    rows: u64,
    reads: u64,
    writes: u64,
    min_latency: u64,
    max_latency: u64,
    latency_sum: u64,
    /// Set to true after `finish()` succeeds so `Drop` doesn't double-write.
    finished: bool,
}

impl RunWriter {
    /// Create the run directory, write run.json, and open latencies.csv.
    pub fn new(output_dir: &Path, config: &Config) -> std::io::Result<Self> {
        let id = Uuid::new_v4().to_string();
        let started_unix_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        let run_dir = output_dir.join(format!("run-{}", &id[..8]));
        fs::create_dir_all(&run_dir)?;

        let meta = RunMeta {
            version: 1,
            id,
            started_unix_ms,
            config: config.clone(),
            sectorsim_version: env!("CARGO_PKG_VERSION").to_string(),
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(std::io::Error::other)?;
        fs::write(run_dir.join("run.json"), meta_json)?;

        let csv_file = File::create(run_dir.join("latencies.csv"))?;
        let mut csv_writer = BufWriter::new(csv_file);
        writeln!(
            csv_writer,
            "submit_cycle,complete_cycle,latency,is_write,orig_addr,num_sectors"
        )?;
        csv_writer.flush()?;

        Ok(Self {
            run_dir,
            csv_writer,
            rows: 0,
            reads: 0,
            writes: 0,
            min_latency: u64::MAX,
            max_latency: 0,
            latency_sum: 0,
            finished: false,
        })
    }

    /// Directory this run is recorded into.
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Append one retired transaction.
    pub fn record(&mut self, record: &LatencyRecord) -> std::io::Result<()> {
        let latency = record.latency();
        writeln!(
            self.csv_writer,
            "{},{},{latency},{},{},{}",
            record.submit_cycle,
            record.complete_cycle,
            u8::from(record.is_write),
            record.orig_addr,
            record.num_sectors,
        )?;

        self.rows += 1;
        if record.is_write {
            self.writes += 1;
        } else {
            self.reads += 1;
        }
        self.min_latency = self.min_latency.min(latency);
        self.max_latency = self.max_latency.max(latency);
        self.latency_sum += latency;

        if self.rows % FLUSH_INTERVAL == 0 {
            self.csv_writer.flush()?;
        }
        Ok(())
    }

    /// Build the aggregate summary from current state.
    fn build_summary(&self) -> RunSummary {
        RunSummary {
            transactions: self.rows,
            reads: self.reads,
            writes: self.writes,
            min_latency: if self.rows == 0 { 0 } else { self.min_latency },
            max_latency: self.max_latency,
            mean_latency: if self.rows == 0 {
                0.0
            } else {
                self.latency_sum as f64 / self.rows as f64
            },
        }
    }

    /// Write summary.json to disk.
    fn write_summary_json(&self, summary: &RunSummary) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(summary).map_err(std::io::Error::other)?;
        fs::write(self.run_dir.join("summary.json"), json)
    }

    /// Flush everything, write summary.json, and return the summary. Call
    /// this on graceful shutdown.
    pub fn finish(mut self) -> std::io::Result<RunSummary> {
        self.csv_writer.flush()?;
        let summary = self.build_summary();
        self.write_summary_json(&summary)?;
        self.finished = true;
        Ok(summary)
    }
}

impl Drop for RunWriter {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // Best-effort: flush the CSV buffer and write summary.json so data
        // isn't lost on panic/early-exit. Errors are silently ignored since
        // we're in Drop.
        let _ = self.csv_writer.flush();
        let summary = self.build_summary();
        let _ = self.write_summary_json(&summary);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(submit: u64, complete: u64, is_write: bool) -> LatencyRecord {
        LatencyRecord {
            submit_cycle: submit,
            complete_cycle: complete,
            is_write,
            orig_addr: 519,
            num_sectors: 2,
        }
    }

    #[test]
    fn latency_is_cycle_delta() {
        assert_eq!(record(10, 35, false).latency(), 25);
    }

    #[test]
    fn writes_run_directory_and_summary() {
        let tmp = tempfile::tempdir().unwrap();
        let mut writer = RunWriter::new(tmp.path(), &Config::default()).unwrap();

        writer.record(&record(0, 10, false)).unwrap();
        writer.record(&record(5, 45, true)).unwrap();
        let run_dir = writer.run_dir().to_path_buf();
        let summary = writer.finish().unwrap();

        assert_eq!(summary.transactions, 2);
        assert_eq!(summary.reads, 1);
        assert_eq!(summary.writes, 1);
        assert_eq!(summary.min_latency, 10);
        assert_eq!(summary.max_latency, 40);
        assert!((summary.mean_latency - 25.0).abs() < f64::EPSILON);

        assert!(run_dir.join("run.json").exists());
        assert!(run_dir.join("summary.json").exists());
        let csv = std::fs::read_to_string(run_dir.join("latencies.csv")).unwrap();
        assert_eq!(csv.lines().count(), 3); // header + 2 rows
        assert!(csv.lines().nth(1).unwrap().starts_with("0,10,10,0,519,2"));
    }

    #[test]
    fn meta_round_trips_through_json() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = RunWriter::new(tmp.path(), &Config::default()).unwrap();
        let meta_json = std::fs::read_to_string(writer.run_dir().join("run.json")).unwrap();
        let meta: RunMeta = serde_json::from_str(&meta_json).unwrap();
        assert_eq!(meta.version, 1);
        assert_eq!(meta.config, Config::default());
    }

    #[test]
    fn drop_without_finish_flushes_and_writes_summary() {
        let tmp = tempfile::tempdir().unwrap();
        let mut writer = RunWriter::new(tmp.path(), &Config::default()).unwrap();

        // Fewer rows than FLUSH_INTERVAL, so they only exist in the buffer.
        writer.record(&record(0, 10, false)).unwrap();
        writer.record(&record(2, 30, true)).unwrap();
        let run_dir = writer.run_dir().to_path_buf();
        drop(writer);

        let csv = std::fs::read_to_string(run_dir.join("latencies.csv")).unwrap();
        assert_eq!(csv.lines().count(), 3); // header + 2 rows survived the drop
        let summary_json = std::fs::read_to_string(run_dir.join("summary.json")).unwrap();
        let summary: RunSummary = serde_json::from_str(&summary_json).unwrap();
        assert_eq!(summary.transactions, 2);
        assert_eq!(summary.max_latency, 28);
    }

    #[test]
    fn finish_leaves_final_summary_in_place() {
        let tmp = tempfile::tempdir().unwrap();
        let mut writer = RunWriter::new(tmp.path(), &Config::default()).unwrap();
        writer.record(&record(0, 10, false)).unwrap();
        let run_dir = writer.run_dir().to_path_buf();
        let finished = writer.finish().unwrap();

        // Drop after finish must not rewrite the summary.
        let summary_json = std::fs::read_to_string(run_dir.join("summary.json")).unwrap();
        let on_disk: RunSummary = serde_json::from_str(&summary_json).unwrap();
        assert_eq!(on_disk.transactions, finished.transactions);
        assert_eq!(on_disk.max_latency, finished.max_latency);
    }

    #[test]
    fn empty_run_summary_is_zeroed() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = RunWriter::new(tmp.path(), &Config::default()).unwrap();
        let summary = writer.finish().unwrap();
        assert_eq!(summary.transactions, 0);
        assert_eq!(summary.min_latency, 0);
        assert_eq!(summary.max_latency, 0);
    }
}
