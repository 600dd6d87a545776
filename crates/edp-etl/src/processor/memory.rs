//! Process memory sampling for the backpressure gate
//!
//! The admission gate only needs a coarse resident-set figure, so this reads
//! `/proc/self/status` directly instead of pulling in a system-information
//! dependency. Platforms without procfs report zero, which disables
//! backpressure rather than failing jobs on an unsupported host.

use tracing::warn;

/// Source of the current process resident-set size.
///
/// The chunk processor samples this before admitting each chunk; tests
/// inject fixed or scripted probes.
pub trait MemoryProbe: Send + Sync {
    /// Current resident set size in megabytes
    fn rss_mb(&self) -> u64;
}

/// Probe backed by `/proc/self/status` (VmRSS)
#[derive(Debug, Default)]
pub struct ProcStatusProbe;

impl MemoryProbe for ProcStatusProbe {
    #[cfg(target_os = "linux")]
    fn rss_mb(&self) -> u64 {
        match std::fs::read_to_string("/proc/self/status") {
            Ok(status) => parse_vmrss_kb(&status).map(|kb| kb / 1024).unwrap_or(0),
            Err(e) => {
                warn!(error = %e, "failed to sample process memory");
                0
            },
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn rss_mb(&self) -> u64 {
        0
    }
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_vmrss_kb(status: &str) -> Option<u64> {
    status
        .lines()
        .find(|line| line.starts_with("VmRSS:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse().ok())
}
