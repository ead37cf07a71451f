/// Source of the process's resident memory, sampled by the batch indexer.
pub trait MemoryProbe: Send + Sync {
    /// Resident set size in bytes, or `None` when it cannot be measured.
    fn resident_bytes(&self) -> Option<u64>;
}

/// Physical memory of the current process as reported by the OS
/// (`memory-stats`; procfs on Linux, task info on macOS, working set on Windows).
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessMemory;

impl MemoryProbe for ProcessMemory {
    fn resident_bytes(&self) -> Option<u64> {
        memory_stats::memory_stats().map(|s| s.physical_mem as u64)
    }
}

/// Fixed reading, for tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedMemory(pub Option<u64>);

impl MemoryProbe for FixedMemory {
    fn resident_bytes(&self) -> Option<u64> { self.0 }
}
