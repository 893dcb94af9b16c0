//! Pool state: free lists, accounting, pressure rules.
//!
//! Private to the pool; the owning task in
//! [`super::handle`] is the only caller.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use upres_core::{Error, Result};

use crate::limits::{format_bytes, DeviceLimits};

/// Pressure at or above which releases destroy instead of pooling.
const RELEASE_DESTROY_PRESSURE: f64 = 0.80;

/// Pressure band thresholds for the background sweep.
const PRESSURE_IDLE_EXPIRY: f64 = 0.60;
const PRESSURE_RELEASE_HALF: f64 = 0.75;
const PRESSURE_DESTROY_ALL: f64 = 0.90;

/// Buffer usage class. Pools are segregated by class so tile inputs,
/// outputs, and GPU transfer buffers never mix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsageClass {
    /// Tile extraction buffers.
    Input,
    /// Output canvases.
    Output,
    /// Small parameter buffers for GPU dispatch.
    Uniform,
    /// Host-device transfer staging.
    Staging,
    /// Kernel working buffers (tile and stage outputs).
    Compute,
}

/// Scale bucket for fractional working sets.
///
/// Progressive plans cycle through the same step sizes, so buffers sized
/// for a 1.1x, 1.5x, or 2.0x working set are tracked separately for
/// faster exact-size reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ScaleBucket {
    /// Buffers sized for 1.1x steps.
    Step1_1x,
    /// Buffers sized for 1.5x steps.
    Step1_5x,
    /// Buffers sized for 2.0x steps.
    Step2x,
    /// Everything else.
    #[default]
    Generic,
}

impl ScaleBucket {
    /// Bucket for a progressive step scale.
    pub fn for_step(step: f64) -> Self {
        if (step - 1.1).abs() < 1e-9 {
            Self::Step1_1x
        } else if (step - 1.5).abs() < 1e-9 {
            Self::Step1_5x
        } else if (step - 2.0).abs() < 1e-9 {
            Self::Step2x
        } else {
            Self::Generic
        }
    }
}

/// Identity of a pooled buffer: accounted size, class, and bucket.
///
/// The accounted size is fixed at allocation and never changes, even when
/// a reused buffer is handed out for a smaller request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDescriptor {
    /// Accounted size in bytes.
    pub bytes: u64,
    /// Usage class.
    pub class: UsageClass,
    /// Scale bucket.
    pub bucket: ScaleBucket,
}

/// Memory accounting counters.
///
/// Invariants: `in_use + pooled = allocated`; `peak` only grows; all
/// counters non-negative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryAccounting {
    /// Bytes currently backed by live allocations.
    pub allocated: u64,
    /// Bytes exclusively owned by callers.
    pub in_use: u64,
    /// Bytes idle in free lists.
    pub pooled: u64,
    /// High-water mark of `allocated`.
    pub peak: u64,
    /// Count of fresh allocations.
    pub allocations: u64,
    /// Count of destructions (including detached buffers).
    pub deallocations: u64,
}

impl MemoryAccounting {
    /// Checks the `in_use + pooled = allocated` invariant.
    pub fn is_consistent(&self) -> bool {
        self.in_use + self.pooled == self.allocated
    }
}

/// Point-in-time view of the pool, returned by snapshot queries.
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    /// Counter values.
    pub accounting: MemoryAccounting,
    /// Current pressure: allocated / safe limit.
    pub pressure: f64,
    /// Number of idle buffers across all free lists.
    pub idle_buffers: usize,
    /// Safe-memory ceiling in effect.
    pub safe_limit: u64,
}

/// Tunables for the pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Free-list cap per usage class.
    pub max_pool_size: usize,
    /// Idle age beyond which the sweep expires buffers.
    pub max_idle_time: Duration,
    /// Background sweep period.
    pub sweep_period: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: 50,
            max_idle_time: Duration::from_secs(45),
            sweep_period: Duration::from_secs(10),
        }
    }
}

/// An idle buffer waiting for reuse.
struct IdleEntry {
    data: Vec<f32>,
    bytes: u64,
    since: Instant,
}

/// The pool itself. Single-owner; see module docs.
pub(super) struct PoolCore {
    /// Free lists keyed by (class, bucket), then by accounted size.
    pools: HashMap<(UsageClass, ScaleBucket), BTreeMap<u64, Vec<IdleEntry>>>,
    accounting: MemoryAccounting,
    limits: DeviceLimits,
    config: PoolConfig,
}

impl PoolCore {
    pub(super) fn new(limits: DeviceLimits, config: PoolConfig) -> Self {
        Self {
            pools: HashMap::new(),
            accounting: MemoryAccounting::default(),
            limits,
            config,
        }
    }

    /// Current pressure: allocated bytes over the safe ceiling.
    pub(super) fn pressure(&self) -> f64 {
        if self.limits.safe_limit == 0 {
            return 1.0;
        }
        self.accounting.allocated as f64 / self.limits.safe_limit as f64
    }

    /// Acquires a buffer of `bytes` bytes.
    ///
    /// Budget check first (with progressive cleanup on pressure), then
    /// reuse of a pooled buffer of the same class/bucket sized between
    /// `bytes` and `2 * bytes`, then a fresh allocation.
    pub(super) fn acquire(
        &mut self,
        class: UsageClass,
        bucket: ScaleBucket,
        bytes: u64,
    ) -> Result<(Vec<f32>, BufferDescriptor)> {
        if bytes > self.limits.max_single_allocation {
            return Err(Error::out_of_budget(bytes, self.limits.max_single_allocation));
        }

        if self.accounting.allocated + bytes > self.limits.safe_limit {
            self.progressive_cleanup(bytes);
            if self.accounting.allocated + bytes > self.limits.safe_limit {
                warn!(
                    requested = bytes,
                    allocated = self.accounting.allocated,
                    limit = self.limits.safe_limit,
                    "allocation over budget after cleanup"
                );
                return Err(Error::out_of_budget(bytes, self.limits.safe_limit));
            }
        }

        let floats = (bytes / 4) as usize;

        // Reuse: exact size up to 2x.
        if let Some((mut data, accounted)) = self.take_pooled(class, bucket, bytes) {
            data.resize(floats, 0.0);
            self.accounting.pooled -= accounted;
            self.accounting.in_use += accounted;
            return Ok((
                data,
                BufferDescriptor {
                    bytes: accounted,
                    class,
                    bucket,
                },
            ));
        }

        // Fresh allocation.
        let data = vec![0.0f32; floats];
        self.accounting.allocated += bytes;
        self.accounting.in_use += bytes;
        self.accounting.allocations += 1;
        self.accounting.peak = self.accounting.peak.max(self.accounting.allocated);
        debug_assert!(self.accounting.is_consistent());
        Ok((
            data,
            BufferDescriptor {
                bytes,
                class,
                bucket,
            },
        ))
    }

    /// Returns a buffer to the pool or destroys it, per the release rules.
    pub(super) fn release(&mut self, data: Vec<f32>, desc: BufferDescriptor) {
        self.accounting.in_use = self.accounting.in_use.saturating_sub(desc.bytes);

        let class_count = self.class_count(desc.class);
        if class_count >= self.config.max_pool_size || self.pressure() > RELEASE_DESTROY_PRESSURE {
            drop(data);
            self.accounting.allocated = self.accounting.allocated.saturating_sub(desc.bytes);
            self.accounting.deallocations += 1;
        } else {
            self.accounting.pooled += desc.bytes;
            self.pools
                .entry((desc.class, desc.bucket))
                .or_default()
                .entry(desc.bytes)
                .or_default()
                .push(IdleEntry {
                    data,
                    bytes: desc.bytes,
                    since: Instant::now(),
                });
        }
        debug_assert!(self.accounting.is_consistent());
    }

    /// Removes a buffer from accounting entirely; ownership has moved out
    /// of the pool's domain (e.g. the final output canvas).
    pub(super) fn forget(&mut self, desc: BufferDescriptor) {
        self.accounting.in_use = self.accounting.in_use.saturating_sub(desc.bytes);
        self.accounting.allocated = self.accounting.allocated.saturating_sub(desc.bytes);
        self.accounting.deallocations += 1;
        debug_assert!(self.accounting.is_consistent());
    }

    /// Applies the pressure bands. Called by the background sweep.
    pub(super) fn sweep(&mut self) {
        let pressure = self.pressure();
        if pressure >= PRESSURE_DESTROY_ALL {
            debug!(pressure, "pressure critical, destroying all pooled buffers");
            self.destroy_all_pooled();
        } else if pressure >= PRESSURE_RELEASE_HALF {
            debug!(pressure, "pressure high, releasing oldest half");
            self.destroy_oldest_fraction(0.5);
        } else if pressure >= PRESSURE_IDLE_EXPIRY {
            self.expire_idle(self.config.max_idle_time);
        }
    }

    /// Escalating cleanup used when an acquire exceeds the budget:
    /// idle expiry, then oldest half, then everything pooled.
    fn progressive_cleanup(&mut self, needed: u64) {
        self.expire_idle(self.config.max_idle_time);
        if self.accounting.allocated + needed <= self.limits.safe_limit {
            return;
        }
        self.destroy_oldest_fraction(0.5);
        if self.accounting.allocated + needed <= self.limits.safe_limit {
            return;
        }
        self.destroy_all_pooled();
    }

    /// Destroys every pooled buffer.
    pub(super) fn destroy_all_pooled(&mut self) {
        let mut destroyed = 0u64;
        for list in self.pools.values_mut() {
            for entries in list.values_mut() {
                for entry in entries.drain(..) {
                    destroyed += entry.bytes;
                    self.accounting.deallocations += 1;
                }
            }
            list.retain(|_, v| !v.is_empty());
        }
        self.accounting.pooled -= destroyed;
        self.accounting.allocated -= destroyed;
        debug_assert!(self.accounting.is_consistent());
    }

    /// Destroys the oldest `fraction` of pooled buffers across all
    /// classes.
    fn destroy_oldest_fraction(&mut self, fraction: f64) {
        let mut ages: Vec<Instant> = self
            .pools
            .values()
            .flat_map(|list| list.values())
            .flatten()
            .map(|e| e.since)
            .collect();
        if ages.is_empty() {
            return;
        }
        ages.sort();
        let keep_from = (ages.len() as f64 * fraction).ceil() as usize;
        if keep_from == 0 {
            return;
        }
        // Everything at or before the cutoff age goes.
        let cutoff = ages[keep_from - 1];
        self.destroy_matching(|entry| entry.since <= cutoff);
    }

    /// Destroys pooled buffers idle for longer than `max_idle`.
    fn expire_idle(&mut self, max_idle: Duration) {
        let now = Instant::now();
        self.destroy_matching(|entry| now.duration_since(entry.since) > max_idle);
    }

    fn destroy_matching(&mut self, predicate: impl Fn(&IdleEntry) -> bool) {
        let mut destroyed_bytes = 0u64;
        let mut destroyed_count = 0u64;
        for list in self.pools.values_mut() {
            for entries in list.values_mut() {
                entries.retain(|entry| {
                    if predicate(entry) {
                        destroyed_bytes += entry.bytes;
                        destroyed_count += 1;
                        false
                    } else {
                        true
                    }
                });
            }
            list.retain(|_, v| !v.is_empty());
        }
        self.accounting.pooled -= destroyed_bytes;
        self.accounting.allocated -= destroyed_bytes;
        self.accounting.deallocations += destroyed_count;
        debug_assert!(self.accounting.is_consistent());
    }

    /// Pops a pooled buffer of size in `[bytes, 2 * bytes]`, exact size
    /// preferred.
    fn take_pooled(
        &mut self,
        class: UsageClass,
        bucket: ScaleBucket,
        bytes: u64,
    ) -> Option<(Vec<f32>, u64)> {
        let list = self.pools.get_mut(&(class, bucket))?;
        let size = list
            .range(bytes..=bytes.saturating_mul(2))
            .find(|(_, v)| !v.is_empty())
            .map(|(&size, _)| size)?;
        let entries = list.get_mut(&size)?;
        let entry = entries.pop()?;
        if entries.is_empty() {
            list.remove(&size);
        }
        Some((entry.data, entry.bytes))
    }

    fn class_count(&self, class: UsageClass) -> usize {
        self.pools
            .iter()
            .filter(|((c, _), _)| *c == class)
            .flat_map(|(_, list)| list.values())
            .map(|v| v.len())
            .sum()
    }

    pub(super) fn stats(&self) -> PoolStats {
        PoolStats {
            accounting: self.accounting,
            pressure: self.pressure(),
            idle_buffers: self
                .pools
                .values()
                .flat_map(|list| list.values())
                .map(|v| v.len())
                .sum(),
            safe_limit: self.limits.safe_limit,
        }
    }

    #[cfg(test)]
    pub(super) fn limits(&self) -> &DeviceLimits {
        &self.limits
    }
}

impl std::fmt::Debug for PoolCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolCore")
            .field("accounting", &self.accounting)
            .field("pressure", &self.pressure())
            .field("safe_limit", &format_bytes(self.limits.safe_limit))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with_limit(limit: u64) -> PoolCore {
        PoolCore::new(DeviceLimits::with_budget(limit), PoolConfig::default())
    }

    #[test]
    fn test_acquire_release_accounting() {
        let mut pool = pool_with_limit(10_000);
        let (data, desc) = pool.acquire(UsageClass::Input, ScaleBucket::Generic, 400).unwrap();
        assert_eq!(data.len(), 100);
        assert_eq!(pool.stats().accounting.in_use, 400);
        assert_eq!(pool.stats().accounting.allocated, 400);

        pool.release(data, desc);
        let acc = pool.stats().accounting;
        assert_eq!(acc.in_use, 0);
        assert_eq!(acc.pooled, 400);
        assert!(acc.is_consistent());
    }

    #[test]
    fn test_reuse_exact_and_double() {
        let mut pool = pool_with_limit(100_000);
        let (data, desc) = pool.acquire(UsageClass::Compute, ScaleBucket::Generic, 800).unwrap();
        pool.release(data, desc);

        // A 400-byte request may reuse the 800-byte buffer (2x rule).
        let (data, desc) = pool.acquire(UsageClass::Compute, ScaleBucket::Generic, 400).unwrap();
        assert_eq!(data.len(), 100);
        assert_eq!(desc.bytes, 800);
        assert_eq!(pool.stats().accounting.allocations, 1);
        pool.release(data, desc);

        // A 2000-byte request may not; it allocates fresh.
        let (_, desc) = pool.acquire(UsageClass::Compute, ScaleBucket::Generic, 2000).unwrap();
        assert_eq!(desc.bytes, 2000);
        assert_eq!(pool.stats().accounting.allocations, 2);
    }

    #[test]
    fn test_buckets_do_not_mix() {
        let mut pool = pool_with_limit(100_000);
        let (data, desc) = pool
            .acquire(UsageClass::Compute, ScaleBucket::Step2x, 400)
            .unwrap();
        pool.release(data, desc);

        let (_, desc) = pool
            .acquire(UsageClass::Compute, ScaleBucket::Step1_5x, 400)
            .unwrap();
        // Fresh allocation; the 2.0x bucket entry was not touched.
        assert_eq!(pool.stats().accounting.allocations, 2);
        assert_eq!(desc.bucket, ScaleBucket::Step1_5x);
    }

    #[test]
    fn test_out_of_budget_after_cleanup() {
        let mut pool = pool_with_limit(1000);
        let (a, da) = pool.acquire(UsageClass::Input, ScaleBucket::Generic, 600).unwrap();
        let err = pool
            .acquire(UsageClass::Input, ScaleBucket::Generic, 600)
            .unwrap_err();
        assert!(err.is_out_of_budget());

        // Releasing frees budget via cleanup on the next acquire.
        pool.release(a, da);
        assert!(pool.acquire(UsageClass::Input, ScaleBucket::Generic, 600).is_ok());
    }

    #[test]
    fn test_max_single_allocation() {
        let mut pool = PoolCore::new(
            DeviceLimits::from_probe(500, 10_000, true),
            PoolConfig::default(),
        );
        assert!(pool
            .acquire(UsageClass::Output, ScaleBucket::Generic, 600)
            .unwrap_err()
            .is_out_of_budget());
        assert_eq!(pool.limits().max_single_allocation, 500);
    }

    #[test]
    fn test_release_destroys_at_high_pressure() {
        let mut pool = pool_with_limit(1000);
        // 840 / 1000 = 0.84 pressure while in use.
        let (data, desc) = pool.acquire(UsageClass::Input, ScaleBucket::Generic, 840).unwrap();
        pool.release(data, desc);
        let acc = pool.stats().accounting;
        // Destroyed, not pooled: pressure during release was > 0.80.
        assert_eq!(acc.pooled, 0);
        assert_eq!(acc.allocated, 0);
        assert_eq!(acc.deallocations, 1);
    }

    #[test]
    fn test_release_pools_at_low_pressure() {
        let mut pool = pool_with_limit(10_000);
        let (data, desc) = pool.acquire(UsageClass::Input, ScaleBucket::Generic, 840).unwrap();
        pool.release(data, desc);
        assert_eq!(pool.stats().accounting.pooled, 840);
    }

    #[test]
    fn test_sweep_destroys_all_at_090() {
        // Pool two buffers at low pressure, then push allocated to
        // exactly 90% of the limit: the sweep must empty the free lists.
        let mut pool = pool_with_limit(10_000);
        let (a, da) = pool.acquire(UsageClass::Input, ScaleBucket::Generic, 1000).unwrap();
        let (b, db) = pool.acquire(UsageClass::Input, ScaleBucket::Generic, 1000).unwrap();
        pool.release(a, da);
        std::thread::sleep(Duration::from_millis(2));
        pool.release(b, db);
        let (_c, _dc) = pool.acquire(UsageClass::Output, ScaleBucket::Generic, 7000).unwrap();

        assert_eq!(pool.pressure(), 0.90);
        pool.sweep();
        let acc = pool.stats().accounting;
        assert_eq!(acc.pooled, 0);
        assert_eq!(acc.allocated, 7000);
    }

    #[test]
    fn test_sweep_spares_newest_below_090() {
        // At 0.899 the sweep is in the release-half band: the newest
        // pooled buffer must survive.
        let mut pool = pool_with_limit(10_000);
        let (a, da) = pool.acquire(UsageClass::Input, ScaleBucket::Generic, 1000).unwrap();
        let (b, db) = pool.acquire(UsageClass::Input, ScaleBucket::Generic, 1000).unwrap();
        pool.release(a, da);
        std::thread::sleep(Duration::from_millis(2));
        pool.release(b, db);
        let (_c, _dc) = pool.acquire(UsageClass::Output, ScaleBucket::Generic, 6990).unwrap();

        assert!(pool.pressure() < 0.90);
        pool.sweep();
        let acc = pool.stats().accounting;
        assert_eq!(acc.pooled, 1000);
        assert_eq!(acc.allocated, 7990);
    }

    #[test]
    fn test_peak_tracks_high_water() {
        let mut pool = pool_with_limit(10_000);
        let (a, da) = pool.acquire(UsageClass::Input, ScaleBucket::Generic, 3000).unwrap();
        let (b, db) = pool.acquire(UsageClass::Input, ScaleBucket::Generic, 2000).unwrap();
        pool.release(a, da);
        pool.release(b, db);
        pool.destroy_all_pooled();
        let acc = pool.stats().accounting;
        assert_eq!(acc.peak, 5000);
        assert_eq!(acc.allocated, 0);
    }

    #[test]
    fn test_forget_removes_from_accounting() {
        let mut pool = pool_with_limit(10_000);
        let (data, desc) = pool.acquire(UsageClass::Output, ScaleBucket::Generic, 1200).unwrap();
        drop(data); // caller took ownership elsewhere
        pool.forget(desc);
        let acc = pool.stats().accounting;
        assert_eq!(acc.allocated, 0);
        assert_eq!(acc.in_use, 0);
        assert_eq!(acc.deallocations, 1);
    }

    #[test]
    fn test_bucket_for_step() {
        assert_eq!(ScaleBucket::for_step(1.1), ScaleBucket::Step1_1x);
        assert_eq!(ScaleBucket::for_step(1.5), ScaleBucket::Step1_5x);
        assert_eq!(ScaleBucket::for_step(2.0), ScaleBucket::Step2x);
        assert_eq!(ScaleBucket::for_step(1.37), ScaleBucket::Generic);
    }
}
