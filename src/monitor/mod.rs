//! Process health monitoring.
//!
//! ## Contents
//! - [`MemoryMonitor`] periodic collection pass, tiered threshold checks, auto-restart
//! - [`MemoryProbe`] where memory figures come from ([`ProcessMemory`], [`ManualProbe`])
//! - [`MemoryStats`] current and peak usage
//! - [`MemoryVerdict`] what the coordinator should do after a monitor tick

mod memory;
mod probe;

pub use memory::{MemoryMonitor, MemoryStats, MemoryVerdict};
pub use probe::{ManualProbe, MemoryProbe, ProcessMemory};
