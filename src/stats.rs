//! Statistics collected while reading delegation files.
//!
//! Counters are atomics so every section task can update the same
//! collector without locking.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::parser::LineOutcome;
use crate::record::Entity;

/// Thread-safe line counters for one or more reads.
#[derive(Debug)]
pub struct ParseStats {
    /// Total number of lines scanned
    pub lines: AtomicU64,

    /// Blank and comment lines
    pub ignored_lines: AtomicU64,

    /// Version lines seen (more than one per file is an error)
    pub version_lines: AtomicU64,

    /// Summary lines seen
    pub summary_lines: AtomicU64,

    /// IPv4 and IPv6 records parsed
    pub ip_records: AtomicU64,

    /// ASN records parsed
    pub asn_records: AtomicU64,

    /// Record lines of an unknown type that were dropped
    pub dropped_lines: AtomicU64,

    /// Total bytes of raw input handed to the reader
    pub bytes_processed: AtomicU64,

    /// When stats collection started
    start_time: Instant,
}

impl ParseStats {
    /// Create a new statistics collector.
    pub fn new() -> Self {
        Self {
            lines: AtomicU64::new(0),
            ignored_lines: AtomicU64::new(0),
            version_lines: AtomicU64::new(0),
            summary_lines: AtomicU64::new(0),
            ip_records: AtomicU64::new(0),
            asn_records: AtomicU64::new(0),
            dropped_lines: AtomicU64::new(0),
            bytes_processed: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record the outcome of one scanned line.
    pub fn record_line(&self, outcome: &LineOutcome) {
        self.lines.fetch_add(1, Ordering::Relaxed);

        let counter = match outcome {
            LineOutcome::Ignored => &self.ignored_lines,
            LineOutcome::Dropped => &self.dropped_lines,
            LineOutcome::Entity(Entity::Version(_)) => &self.version_lines,
            LineOutcome::Entity(Entity::Summary(_)) => &self.summary_lines,
            LineOutcome::Entity(Entity::Ip(_)) => &self.ip_records,
            LineOutcome::Entity(Entity::Asn(_)) => &self.asn_records,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record bytes handed to the reader.
    pub fn record_bytes(&self, bytes: u64) {
        self.bytes_processed.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Get the elapsed time since stats collection started.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Generate a summary report.
    pub fn summary(&self) -> StatsSummary {
        StatsSummary {
            elapsed_secs: self.elapsed().as_secs_f64(),
            lines: self.lines.load(Ordering::Relaxed),
            ignored_lines: self.ignored_lines.load(Ordering::Relaxed),
            version_lines: self.version_lines.load(Ordering::Relaxed),
            summary_lines: self.summary_lines.load(Ordering::Relaxed),
            ip_records: self.ip_records.load(Ordering::Relaxed),
            asn_records: self.asn_records.load(Ordering::Relaxed),
            dropped_lines: self.dropped_lines.load(Ordering::Relaxed),
            bytes_processed: self.bytes_processed.load(Ordering::Relaxed),
        }
    }
}

impl Default for ParseStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of collected statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSummary {
    pub elapsed_secs: f64,
    pub lines: u64,
    pub ignored_lines: u64,
    pub version_lines: u64,
    pub summary_lines: u64,
    pub ip_records: u64,
    pub asn_records: u64,
    pub dropped_lines: u64,
    pub bytes_processed: u64,
}

impl fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Parse statistics ({:.3}s)", self.elapsed_secs)?;
        writeln!(f, "  Bytes:    {}", self.bytes_processed)?;
        writeln!(f, "  Lines:    {}", self.lines)?;
        writeln!(f, "  Ignored:  {}", self.ignored_lines)?;
        writeln!(f, "  Version:  {}", self.version_lines)?;
        writeln!(f, "  Summary:  {}", self.summary_lines)?;
        writeln!(f, "  IP:       {}", self.ip_records)?;
        writeln!(f, "  ASN:      {}", self.asn_records)?;
        write!(f, "  Dropped:  {}", self.dropped_lines)
    }
}
