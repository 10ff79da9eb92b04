//! # Memory probes.
//!
//! A [`MemoryProbe`] reports the process's current memory usage and offers a
//! reclaim hook that the monitor calls before each sample. Rust has no collector to
//! run, so the default hook does nothing; an application can override it to trim
//! allocator arenas or evict caches.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Source of memory figures.
pub trait MemoryProbe: Send + Sync + 'static {
    /// Current usage in bytes.
    fn current_bytes(&self) -> u64;

    /// Releases reclaimable memory before a sample.
    fn reclaim(&self) {}
}

/// Resident set size of this process.
///
/// Reads `VmRSS` from `/proc/self/status` on Linux; reports `0` elsewhere or when
/// the file cannot be parsed.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessMemory;

impl MemoryProbe for ProcessMemory {
    fn current_bytes(&self) -> u64 {
        resident_bytes().unwrap_or(0)
    }
}

#[cfg(target_os = "linux")]
fn resident_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_rss(&status)
}

#[cfg(not(target_os = "linux"))]
fn resident_bytes() -> Option<u64> {
    None
}

/// Extracts `VmRSS` (reported in kB) as bytes.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb * 1024)
}

/// Probe whose reading is set by hand (tests, simulations).
#[derive(Debug, Default, Clone)]
pub struct ManualProbe {
    bytes: Arc<AtomicU64>,
    reclaims: Arc<AtomicU64>,
}

impl ManualProbe {
    /// Creates a probe reporting `mb` megabytes.
    pub fn with_mb(mb: u64) -> Self {
        let probe = Self::default();
        probe.set_mb(mb);
        probe
    }

    /// Sets the reading in bytes.
    pub fn set_bytes(&self, bytes: u64) {
        self.bytes.store(bytes, Ordering::SeqCst);
    }

    /// Sets the reading in megabytes.
    pub fn set_mb(&self, mb: u64) {
        self.set_bytes(mb.saturating_mul(BYTES_PER_MB));
    }

    /// Number of reclaim calls received.
    pub fn reclaims(&self) -> u64 {
        self.reclaims.load(Ordering::SeqCst)
    }
}

impl MemoryProbe for ManualProbe {
    fn current_bytes(&self) -> u64 {
        self.bytes.load(Ordering::SeqCst)
    }

    fn reclaim(&self) {
        self.reclaims.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vm_rss() {
        let status = "Name:\tdemo\nVmPeak:\t  9000 kB\nVmRSS:\t   2048 kB\nThreads:\t4\n";
        assert_eq!(parse_vm_rss(status), Some(2048 * 1024));
        assert_eq!(parse_vm_rss("Name:\tdemo\n"), None);
    }

    #[test]
    fn test_manual_probe_shares_reading_between_clones() {
        let probe = ManualProbe::with_mb(3);
        let other = probe.clone();
        assert_eq!(other.current_bytes(), 3 * BYTES_PER_MB);
        other.reclaim();
        assert_eq!(probe.reclaims(), 1);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_process_memory_reports_something_on_linux() {
        assert!(ProcessMemory.current_bytes() > 0);
    }
}
