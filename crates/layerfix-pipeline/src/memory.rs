//! Resident memory sampling for batch backpressure.

/// Reports the process's resident memory.
pub trait MemorySampler: Send + Sync {
    /// Resident set size in bytes, or `None` when it cannot be measured.
    fn resident_bytes(&self) -> Option<u64>;
}

/// Reads resident memory from `/proc/self/statm`.
///
/// On platforms without procfs every sample is `None`, which the batch
/// runner treats as "below threshold".
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcMemorySampler;

impl MemorySampler for ProcMemorySampler {
    #[cfg(target_os = "linux")]
    fn resident_bytes(&self) -> Option<u64> {
        let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
        let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
        resident_pages.checked_mul(page_size()?)
    }

    #[cfg(not(target_os = "linux"))]
    fn resident_bytes(&self) -> Option<u64> {
        None
    }
}

#[cfg(target_os = "linux")]
fn page_size() -> Option<u64> {
    // SAFETY: `sysconf` has no preconditions and only reads system state.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    u64::try_from(size).ok().filter(|size| *size > 0)
}
