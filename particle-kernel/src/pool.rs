// Copyright 2025 John Brosnihan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Fixed-capacity particle pool
//!
//! The pool pre-allocates every particle slot up front and hands out
//! [`ParticleHandle`]s (plain slot indices) instead of references. Freed
//! slots go onto a LIFO stack so the most recently released, and most likely
//! cached, slot is reused first.
//!
//! # Invariants
//!
//! - `active_count() + free_count() == capacity()` after every operation
//! - every free index appears on the free stack exactly once
//! - a slot is flagged active iff its index is not on the free stack
//!
//! Allocation and release are O(1). Iteration is O(capacity) in the worst
//! case but only yields active slots, in ascending slot order.

use crate::error::{KernelError, Result};
use crate::particle::Particle;
use std::fmt;
use std::time::Instant;

/// Configuration for particle pool behavior
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of particle slots to pre-allocate
    pub capacity: usize,
    /// Measure allocate/free latency for [`PoolStats`]
    pub track_timing: bool,
    /// Whether to log allocation failures and rejected frees
    pub log_events: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            capacity: 1024,
            track_timing: true,
            log_events: false,
        }
    }
}

impl PoolConfig {
    /// Create a pool configuration with the given capacity
    pub fn new(capacity: usize) -> Self {
        PoolConfig {
            capacity,
            ..Self::default()
        }
    }

    /// Enable logging for allocation failures and rejected frees
    pub fn with_logging(mut self) -> Self {
        self.log_events = true;
        self
    }

    /// Skip latency measurement on the allocate/free paths
    pub fn without_timing(mut self) -> Self {
        self.track_timing = false;
        self
    }
}

/// Statistics for monitoring pool usage
///
/// Purely observational. Latencies are running averages in nanoseconds and
/// stay at zero when timing is disabled.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Successful allocations
    pub allocations: u64,
    /// Successful frees
    pub frees: u64,
    /// Allocation attempts that found the pool exhausted
    pub allocation_failures: u64,
    /// Frees rejected because the handle was foreign or already free
    pub rejected_frees: u64,
    /// Running average allocation latency (ns)
    pub avg_allocate_ns: f64,
    /// Running average free latency (ns)
    pub avg_free_ns: f64,
    /// Highest number of simultaneously active slots
    pub peak_active: usize,
}

impl PoolStats {
    /// Calculate the allocation failure rate as a percentage
    pub fn failure_rate(&self) -> f64 {
        let total = self.allocations + self.allocation_failures;
        if total == 0 {
            0.0
        } else {
            (self.allocation_failures as f64 / total as f64) * 100.0
        }
    }

    fn record_allocate(&mut self, started: Option<Instant>) {
        self.allocations += 1;
        if let Some(start) = started {
            let sample = start.elapsed().as_nanos() as f64;
            self.avg_allocate_ns += (sample - self.avg_allocate_ns) / self.allocations as f64;
        }
    }

    fn record_free(&mut self, started: Option<Instant>) {
        self.frees += 1;
        if let Some(start) = started {
            let sample = start.elapsed().as_nanos() as f64;
            self.avg_free_ns += (sample - self.avg_free_ns) / self.frees as f64;
        }
    }
}

/// Index of a particle slot inside a [`ParticlePool`]
///
/// Handles are only meaningful for the pool that issued them and only while
/// the slot stays allocated. The pool rejects frees of stale handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticleHandle(u32);

impl ParticleHandle {
    /// Wrap a raw slot index
    pub fn new(index: u32) -> Self {
        ParticleHandle(index)
    }

    /// Slot index as `usize`
    pub fn index(&self) -> usize {
        self.0 as usize
    }

    /// Raw slot index
    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ParticleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slot({})", self.0)
    }
}

/// Fixed-capacity store of particle records
pub struct ParticlePool {
    slots: Box<[Particle]>,
    active: Box<[bool]>,
    free_stack: Vec<u32>,
    active_count: usize,
    config: PoolConfig,
    stats: PoolStats,
}

fn reserve<T: Clone>(len: usize, fill: T, what: &str) -> Result<Vec<T>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|e| {
        KernelError::allocation_failure(format!("pool {} for {} slots: {}", what, len, e))
    })?;
    buf.resize(len, fill);
    Ok(buf)
}

impl ParticlePool {
    /// Create a pool with `capacity` slots and default settings
    ///
    /// # Errors
    ///
    /// `InvalidParameter` if `capacity` is zero or does not fit a `u32` slot
    /// index; `AllocationFailure` if the backing storage cannot be reserved.
    pub fn new(capacity: usize) -> Result<Self> {
        Self::with_config(PoolConfig::new(capacity))
    }

    /// Create a pool from a full configuration
    pub fn with_config(config: PoolConfig) -> Result<Self> {
        let capacity = config.capacity;
        if capacity == 0 {
            return Err(KernelError::invalid_parameter("pool capacity must be > 0"));
        }
        if capacity > u32::MAX as usize {
            return Err(KernelError::invalid_parameter(format!(
                "pool capacity {} exceeds the u32 slot index range",
                capacity
            )));
        }

        let slots = reserve(capacity, Particle::default(), "slots")?;
        let active = reserve(capacity, false, "active flags")?;
        let mut free_stack = reserve(capacity, 0u32, "free stack")?;
        // Popping from the end hands out the highest index first
        for (i, slot) in free_stack.iter_mut().enumerate() {
            *slot = i as u32;
        }

        log::debug!("particle pool created with {} slots", capacity);

        Ok(ParticlePool {
            slots: slots.into_boxed_slice(),
            active: active.into_boxed_slice(),
            free_stack,
            active_count: 0,
            config,
            stats: PoolStats::default(),
        })
    }

    /// Allocate a zeroed slot
    ///
    /// # Errors
    ///
    /// `OutOfRange` when every slot is in use.
    pub fn allocate(&mut self) -> Result<ParticleHandle> {
        match self.try_allocate() {
            Some(handle) => Ok(handle),
            None => Err(KernelError::out_of_range(format!(
                "particle pool exhausted (capacity {})",
                self.capacity()
            ))),
        }
    }

    /// Allocate a zeroed slot, returning `None` when the pool is full
    ///
    /// Use [`allocate`](Self::allocate) when exhaustion has to be told apart
    /// from other failures.
    pub fn try_allocate(&mut self) -> Option<ParticleHandle> {
        let started = self.config.track_timing.then(Instant::now);
        let Some(index) = self.free_stack.pop() else {
            self.stats.allocation_failures += 1;
            if self.config.log_events {
                log::debug!(
                    "particle pool exhausted after {} allocations ({:.1}% failures)",
                    self.stats.allocations,
                    self.stats.failure_rate()
                );
            }
            return None;
        };

        let i = index as usize;
        self.slots[i] = Particle::default();
        self.active[i] = true;
        self.active_count += 1;
        if self.active_count > self.stats.peak_active {
            self.stats.peak_active = self.active_count;
        }
        self.stats.record_allocate(started);
        Some(ParticleHandle(index))
    }

    /// Return a slot to the pool
    ///
    /// # Errors
    ///
    /// `InvalidParameter` if the handle is outside this pool or the slot is
    /// not currently allocated (double free).
    pub fn free(&mut self, handle: ParticleHandle) -> Result<()> {
        let started = self.config.track_timing.then(Instant::now);
        let i = handle.index();
        if i >= self.slots.len() {
            self.stats.rejected_frees += 1;
            if self.config.log_events {
                log::warn!("rejected free of foreign handle {}", handle);
            }
            return Err(KernelError::invalid_parameter(format!(
                "{} does not belong to a pool of capacity {}",
                handle,
                self.slots.len()
            )));
        }
        if !self.active[i] {
            self.stats.rejected_frees += 1;
            if self.config.log_events {
                log::warn!("rejected double free of {}", handle);
            }
            return Err(KernelError::invalid_parameter(format!(
                "{} is not allocated",
                handle
            )));
        }

        self.active[i] = false;
        self.free_stack.push(handle.raw());
        self.active_count -= 1;
        self.stats.record_free(started);
        Ok(())
    }

    /// Free every active slot
    pub fn clear(&mut self) {
        self.stats.frees += self.active_count as u64;
        self.active.iter_mut().for_each(|flag| *flag = false);
        self.free_stack.clear();
        self.free_stack.extend(0..self.slots.len() as u32);
        self.active_count = 0;
    }

    /// Total number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of allocated slots
    pub fn active_count(&self) -> usize {
        self.active_count
    }

    /// Number of free slots
    pub fn free_count(&self) -> usize {
        self.free_stack.len()
    }

    /// Check if no slot is allocated
    pub fn is_empty(&self) -> bool {
        self.active_count == 0
    }

    /// Check if every slot is allocated
    pub fn is_full(&self) -> bool {
        self.free_stack.is_empty()
    }

    /// Check if `handle` names an allocated slot of this pool
    pub fn is_active(&self, handle: ParticleHandle) -> bool {
        self.active.get(handle.index()).copied().unwrap_or(false)
    }

    /// Read an allocated slot
    pub fn get(&self, handle: ParticleHandle) -> Option<&Particle> {
        if self.is_active(handle) {
            self.slots.get(handle.index())
        } else {
            None
        }
    }

    /// Mutate an allocated slot
    pub fn get_mut(&mut self, handle: ParticleHandle) -> Option<&mut Particle> {
        if self.is_active(handle) {
            self.slots.get_mut(handle.index())
        } else {
            None
        }
    }

    /// Iterate over active slots in ascending slot order
    ///
    /// Each call starts a fresh scan, so the sequence can be restarted at any
    /// time and always reflects the flags at the moment it is advanced.
    pub fn iter(&self) -> ActiveIter<'_> {
        ActiveIter {
            slots: &self.slots,
            active: &self.active,
            next: 0,
            remaining: self.active_count,
        }
    }

    /// Iterate mutably over active slots in ascending slot order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ParticleHandle, &mut Particle)> + '_ {
        self.slots
            .iter_mut()
            .zip(self.active.iter())
            .enumerate()
            .filter(|(_, (_, active))| **active)
            .map(|(i, (particle, _))| (ParticleHandle(i as u32), particle))
    }

    /// Handles of all active slots in ascending order
    pub fn handles(&self) -> impl Iterator<Item = ParticleHandle> + '_ {
        self.iter().map(|(handle, _)| handle)
    }

    /// Get current pool statistics
    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Mutably borrow two distinct allocated slots at once
    ///
    /// Returns `None` if the handles are equal or either slot is free.
    pub fn get_pair_mut(
        &mut self,
        a: ParticleHandle,
        b: ParticleHandle,
    ) -> Option<(&mut Particle, &mut Particle)> {
        if a == b || !self.is_active(a) || !self.is_active(b) {
            return None;
        }
        let (lo, hi) = (a.index().min(b.index()), a.index().max(b.index()));
        let (head, tail) = self.slots.split_at_mut(hi);
        let (low, high) = (&mut head[lo], &mut tail[0]);
        if a.index() < b.index() {
            Some((low, high))
        } else {
            Some((high, low))
        }
    }

    #[cfg(test)]
    pub(crate) fn free_stack(&self) -> &[u32] {
        &self.free_stack
    }
}

impl fmt::Debug for ParticlePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParticlePool")
            .field("capacity", &self.capacity())
            .field("active", &self.active_count)
            .field("free", &self.free_stack.len())
            .finish()
    }
}

/// Iterator over the active slots of a [`ParticlePool`]
#[derive(Clone)]
pub struct ActiveIter<'a> {
    slots: &'a [Particle],
    active: &'a [bool],
    next: usize,
    remaining: usize,
}

impl<'a> Iterator for ActiveIter<'a> {
    type Item = (ParticleHandle, &'a Particle);

    fn next(&mut self) -> Option<Self::Item> {
        while self.remaining > 0 && self.next < self.slots.len() {
            let i = self.next;
            self.next += 1;
            if self.active[i] {
                self.remaining -= 1;
                return Some((ParticleHandle(i as u32), &self.slots[i]));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for ActiveIter<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn assert_invariants(pool: &ParticlePool) {
        assert_eq!(pool.active_count() + pool.free_count(), pool.capacity());
        let mut seen = vec![false; pool.capacity()];
        for &index in pool.free_stack() {
            let i = index as usize;
            assert!(!seen[i], "slot {} on the free stack twice", i);
            seen[i] = true;
            assert!(!pool.active[i], "free slot {} flagged active", i);
        }
        let flagged = pool.active.iter().filter(|a| **a).count();
        assert_eq!(flagged, pool.active_count());
    }

    #[test]
    fn test_pool_config_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.capacity, 1024);
        assert!(config.track_timing);
        assert!(!config.log_events);
    }

    #[test]
    fn test_pool_config_custom() {
        let config = PoolConfig::new(128).with_logging().without_timing();
        assert_eq!(config.capacity, 128);
        assert!(!config.track_timing);
        assert!(config.log_events);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = ParticlePool::new(0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    }

    #[test]
    fn test_highest_index_allocated_first() {
        let mut pool = ParticlePool::new(4).unwrap();
        assert_eq!(pool.allocate().unwrap().index(), 3);
        assert_eq!(pool.allocate().unwrap().index(), 2);
    }

    #[test]
    fn test_lifo_reuse() {
        let mut pool = ParticlePool::new(8).unwrap();
        let a = pool.allocate().unwrap();
        let _b = pool.allocate().unwrap();
        pool.free(a).unwrap();
        assert_eq!(pool.allocate().unwrap(), a);
    }

    #[test]
    fn test_allocate_zeroes_slot() {
        let mut pool = ParticlePool::new(1).unwrap();
        let h = pool.allocate().unwrap();
        *pool.get_mut(h).unwrap() = Particle::new(1.0, 2.0, 3.0, 4.0);
        pool.free(h).unwrap();
        let h = pool.allocate().unwrap();
        assert_eq!(*pool.get(h).unwrap(), Particle::default());
    }

    #[test]
    fn test_exhaustion_reports_out_of_range() {
        let mut pool = ParticlePool::new(2).unwrap();
        pool.allocate().unwrap();
        pool.allocate().unwrap();
        assert!(pool.is_full());
        let err = pool.allocate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfRange);
        assert!(pool.try_allocate().is_none());
        assert_eq!(pool.stats().allocation_failures, 2);
    }

    #[test]
    fn test_double_free_rejected() {
        let mut pool = ParticlePool::new(4).unwrap();
        let h = pool.allocate().unwrap();
        pool.free(h).unwrap();
        let err = pool.free(h).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert_eq!(pool.stats().rejected_frees, 1);
        assert_invariants(&pool);
    }

    #[test]
    fn test_foreign_handle_rejected() {
        let mut pool = ParticlePool::new(4).unwrap();
        let err = pool.free(ParticleHandle::new(4)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert_invariants(&pool);
    }

    #[test]
    fn test_invariants_through_mixed_sequence() {
        let mut pool = ParticlePool::new(16).unwrap();
        let mut live = Vec::new();
        for step in 0..200usize {
            if step % 3 == 2 && !live.is_empty() {
                let h = live.remove(step % live.len());
                pool.free(h).unwrap();
            } else if let Ok(h) = pool.allocate() {
                live.push(h);
            }
            assert_invariants(&pool);
        }
    }

    #[test]
    fn test_iteration_ascending_and_complete() {
        let mut pool = ParticlePool::new(10).unwrap();
        let handles: Vec<_> = (0..6).map(|_| pool.allocate().unwrap()).collect();
        pool.free(handles[1]).unwrap();
        pool.free(handles[4]).unwrap();

        let visited: Vec<_> = pool.handles().collect();
        assert_eq!(visited.len(), 4);
        assert_eq!(pool.iter().len(), 4);
        assert!(visited.windows(2).all(|w| w[0] < w[1]));
        for h in &visited {
            assert!(pool.is_active(*h));
        }
    }

    #[test]
    fn test_iteration_restartable() {
        let mut pool = ParticlePool::new(5).unwrap();
        for _ in 0..3 {
            pool.allocate().unwrap();
        }
        let first: Vec<_> = pool.handles().collect();
        let second: Vec<_> = pool.handles().collect();
        assert_eq!(first, second);

        let iter = pool.iter();
        let copy = iter.clone();
        assert_eq!(iter.count(), copy.count());
    }

    #[test]
    fn test_iter_mut_updates_active_only() {
        let mut pool = ParticlePool::new(4).unwrap();
        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        pool.free(b).unwrap();
        for (_, p) in pool.iter_mut() {
            p.vx = 7.0;
        }
        assert_eq!(pool.get(a).unwrap().vx, 7.0);
        assert!(pool.get(b).is_none());
    }

    #[test]
    fn test_clear_frees_everything() {
        let mut pool = ParticlePool::new(8).unwrap();
        for _ in 0..5 {
            pool.allocate().unwrap();
        }
        pool.clear();
        assert!(pool.is_empty());
        assert_eq!(pool.free_count(), 8);
        assert_eq!(pool.stats().frees, 5);
        assert_invariants(&pool);
        assert_eq!(pool.allocate().unwrap().index(), 7);
    }

    #[test]
    fn test_stats_tracking() {
        let mut pool = ParticlePool::new(2).unwrap();
        let a = pool.allocate().unwrap();
        let _b = pool.allocate().unwrap();
        let _ = pool.allocate();
        pool.free(a).unwrap();

        let stats = pool.stats();
        assert_eq!(stats.allocations, 2);
        assert_eq!(stats.frees, 1);
        assert_eq!(stats.allocation_failures, 1);
        assert_eq!(stats.peak_active, 2);
        assert!((stats.failure_rate() - 100.0 / 3.0).abs() < 1e-9);
        assert!(stats.avg_allocate_ns >= 0.0);
    }

    #[test]
    fn test_timing_disabled_leaves_latency_zero() {
        let mut pool = ParticlePool::with_config(PoolConfig::new(2).without_timing()).unwrap();
        let h = pool.allocate().unwrap();
        pool.free(h).unwrap();
        assert_eq!(pool.stats().avg_allocate_ns, 0.0);
        assert_eq!(pool.stats().avg_free_ns, 0.0);
    }

    #[test]
    fn test_get_pair_mut() {
        let mut pool = ParticlePool::new(4).unwrap();
        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        {
            let (pa, pb) = pool.get_pair_mut(a, b).unwrap();
            pa.vx = 1.0;
            pb.vx = 2.0;
        }
        // Order of the returned pair follows the arguments
        let (pb, pa) = pool.get_pair_mut(b, a).unwrap();
        assert_eq!((pa.vx, pb.vx), (1.0, 2.0));

        assert!(pool.get_pair_mut(a, a).is_none());
        pool.free(b).unwrap();
        assert!(pool.get_pair_mut(a, b).is_none());
    }
}
