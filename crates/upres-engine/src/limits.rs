//! Device memory limits and budgets.
//!
//! The memory manager asks its backend for a maximum single-allocation
//! size and an estimated total; the safe ceiling is 70% of the estimated
//! total. When a backend cannot report, conservative defaults apply
//! (1 GiB max allocation, 2 GiB total).
//!
//! # Environment Variables
//!
//! - `UPRES_MEM_MB` - Explicit memory limit in megabytes
//! - `UPRES_RAM_MAX` - Maximum RAM usage in bytes
//! - `UPRES_RAM_PCT` - Maximum RAM as percentage (10-95)
//! - `UPRES_TILE_SIZE` - Override tile size
//! - `UPRES_BACKEND` - Backend override ("cpu" or "gpu")

use std::env;
use std::sync::OnceLock;

/// Fraction of estimated device memory treated as safe to allocate.
pub const SAFE_MEMORY_FRACTION: f64 = 0.70;

/// Default maximum single allocation when the backend cannot report.
pub const DEFAULT_MAX_ALLOCATION: u64 = 1024 * 1024 * 1024; // 1 GiB

/// Default estimated total memory when the backend cannot report.
pub const DEFAULT_TOTAL_MEMORY: u64 = 2 * 1024 * 1024 * 1024; // 2 GiB

/// Cache for host memory detection.
static HOST_MEMORY: OnceLock<u64> = OnceLock::new();

/// Memory limits reported by a compute backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Maximum single-allocation size in bytes.
    pub max_single_allocation: u64,
    /// Estimated total device memory in bytes.
    pub total_memory: u64,
    /// Safe allocation ceiling: [`SAFE_MEMORY_FRACTION`] of the total.
    pub safe_limit: u64,
    /// Whether values were probed vs defaults.
    pub detected: bool,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self::from_probe(DEFAULT_MAX_ALLOCATION, DEFAULT_TOTAL_MEMORY, false)
    }
}

impl DeviceLimits {
    /// Builds limits from a probe result, applying the safety fraction.
    pub fn from_probe(max_single_allocation: u64, total_memory: u64, detected: bool) -> Self {
        Self {
            max_single_allocation,
            total_memory,
            safe_limit: (total_memory as f64 * SAFE_MEMORY_FRACTION) as u64,
            detected,
        }
    }

    /// Builds limits with an explicit safe ceiling, bypassing the
    /// fraction. Used for caller-supplied budgets.
    pub fn with_budget(budget: u64) -> Self {
        Self {
            max_single_allocation: budget,
            total_memory: budget,
            safe_limit: budget,
            detected: true,
        }
    }

    /// Probes host RAM for the CPU backend, honoring environment
    /// overrides.
    pub fn detect_host() -> Self {
        if let Some(bytes) = env_override_bytes() {
            return Self::with_budget(bytes);
        }
        let total = host_memory();
        Self::from_probe(total / 2, total, true)
    }
}

/// Total host RAM in bytes, cached after the first probe.
pub fn host_memory() -> u64 {
    *HOST_MEMORY.get_or_init(|| {
        sys_info::mem_info()
            .map(|m| m.total * 1024) // KB to bytes
            .unwrap_or(DEFAULT_TOTAL_MEMORY)
    })
}

/// Explicit memory override from the environment, if any.
///
/// Priority: `UPRES_MEM_MB`, then `UPRES_RAM_MAX`, then `UPRES_RAM_PCT`.
fn env_override_bytes() -> Option<u64> {
    if let Some(mb) = env_u64("UPRES_MEM_MB") {
        return Some(mb * 1024 * 1024);
    }
    if let Some(bytes) = env_u64("UPRES_RAM_MAX") {
        return Some(bytes);
    }
    if let Some(pct) = env_u64("UPRES_RAM_PCT") {
        let pct = pct.clamp(10, 95);
        return Some(host_memory() * pct / 100);
    }
    None
}

/// Tile size override from the environment.
pub fn tile_size_override() -> Option<u32> {
    env::var("UPRES_TILE_SIZE")
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|&s: &u32| (64..=4096).contains(&s))
}

/// Backend override from the environment.
pub fn backend_override() -> Option<String> {
    env::var("UPRES_BACKEND").ok()
}

fn env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Formats bytes as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes >= 1024 * 1024 * 1024 {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    } else if bytes >= 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{} KB", bytes / 1024)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits_are_conservative() {
        let limits = DeviceLimits::default();
        assert_eq!(limits.max_single_allocation, DEFAULT_MAX_ALLOCATION);
        assert_eq!(limits.total_memory, DEFAULT_TOTAL_MEMORY);
        assert!(!limits.detected);
    }

    #[test]
    fn test_safe_limit_is_70_percent() {
        let limits = DeviceLimits::from_probe(512, 1000, true);
        assert_eq!(limits.safe_limit, 700);
    }

    #[test]
    fn test_explicit_budget() {
        let limits = DeviceLimits::with_budget(12345);
        assert_eq!(limits.safe_limit, 12345);
        assert!(limits.detected);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1500), "1 KB");
        assert_eq!(format_bytes(1_500_000), "1.4 MB");
        assert_eq!(format_bytes(1_500_000_000), "1.40 GB");
    }
}
