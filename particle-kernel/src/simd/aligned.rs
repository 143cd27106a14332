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
//! Vector-aligned allocation
//!
//! [`aligned_alloc`] hands out zeroed, owned blocks with a caller-chosen
//! alignment. [`ScratchBuffer`] builds the per-step working buffer of the
//! simulation on top of it: it grows to the largest particle count seen and
//! never shrinks, so a steady-state step allocates nothing.

use crate::error::{KernelError, Result};
use crate::particle::Particle;
use std::alloc::{self, Layout};
use std::ptr::NonNull;

/// Owned, zero-initialised, aligned block of bytes
#[derive(Debug)]
pub struct AlignedBlock {
    ptr: NonNull<u8>,
    layout: Layout,
}

// The block exclusively owns its allocation
unsafe impl Send for AlignedBlock {}
unsafe impl Sync for AlignedBlock {}

/// Allocate `size` zeroed bytes aligned to `alignment`
///
/// # Errors
///
/// - `InvalidParameter` if `size` is zero, `alignment` is not a power of
///   two, or `alignment` is below the pointer size
/// - `AllocationFailure` if the platform allocator refuses the request
pub fn aligned_alloc(size: usize, alignment: usize) -> Result<AlignedBlock> {
    if size == 0 {
        return Err(KernelError::invalid_parameter("aligned allocation of zero bytes"));
    }
    if !alignment.is_power_of_two() {
        return Err(KernelError::invalid_parameter(format!(
            "alignment {} is not a power of two",
            alignment
        )));
    }
    if alignment < std::mem::size_of::<usize>() {
        return Err(KernelError::invalid_parameter(format!(
            "alignment {} is below the pointer size {}",
            alignment,
            std::mem::size_of::<usize>()
        )));
    }
    let layout = Layout::from_size_align(size, alignment).map_err(|e| {
        KernelError::invalid_parameter(format!("layout {}B/{}: {}", size, alignment, e))
    })?;

    // SAFETY: layout has non-zero size
    let raw = unsafe { alloc::alloc_zeroed(layout) };
    let ptr = NonNull::new(raw).ok_or_else(|| {
        KernelError::allocation_failure(format!(
            "allocator refused {} bytes aligned to {}",
            size, alignment
        ))
    })?;
    Ok(AlignedBlock { ptr, layout })
}

impl AlignedBlock {
    /// Size in bytes
    pub fn size(&self) -> usize {
        self.layout.size()
    }

    /// Alignment in bytes
    pub fn alignment(&self) -> usize {
        self.layout.align()
    }

    /// Start of the block
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// Mutable start of the block
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// View the block as bytes
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the block owns `size` initialised bytes
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.size()) }
    }

    /// Mutable view of the block as bytes
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: the block owns `size` initialised bytes, borrowed uniquely
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.size()) }
    }
}

impl Drop for AlignedBlock {
    fn drop(&mut self) {
        // SAFETY: allocated in `aligned_alloc` with this exact layout
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

/// Growable, aligned working buffer of particles
///
/// An optional byte budget caps how large the buffer may grow; requests past
/// it fail with `OutOfResources` instead of allocating.
pub struct ScratchBuffer {
    block: Option<AlignedBlock>,
    capacity: usize,
    alignment: usize,
    budget_bytes: Option<usize>,
}

/// Smallest particle capacity the buffer grows to
const MIN_SCRATCH_PARTICLES: usize = 64;

impl ScratchBuffer {
    /// Create an empty buffer whose storage will be aligned to `alignment`
    ///
    /// The alignment is raised to at least that of [`Particle`] and the
    /// pointer size.
    pub fn new(alignment: usize) -> Result<Self> {
        if !alignment.is_power_of_two() {
            return Err(KernelError::invalid_parameter(format!(
                "scratch alignment {} is not a power of two",
                alignment
            )));
        }
        Ok(ScratchBuffer {
            block: None,
            capacity: 0,
            alignment: alignment
                .max(std::mem::align_of::<Particle>())
                .max(std::mem::size_of::<usize>()),
            budget_bytes: None,
        })
    }

    /// Limit the buffer to `bytes` of storage
    pub fn with_budget(mut self, bytes: usize) -> Self {
        self.budget_bytes = Some(bytes);
        self
    }

    /// Number of particles the buffer holds without growing
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Alignment of the backing storage
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Get a zero-or-more particle working slice of length `len`
    ///
    /// Grows the backing block when `len` exceeds the current capacity; the
    /// previous contents are not preserved across growth.
    pub fn ensure(&mut self, len: usize) -> Result<&mut [Particle]> {
        if len > self.capacity {
            self.grow(len)?;
        }
        match self.block.as_mut() {
            // SAFETY: the block holds `capacity >= len` particles, every bit
            // pattern is a valid `Particle`, and alignment covers `Particle`
            Some(block) => Ok(unsafe {
                std::slice::from_raw_parts_mut(block.as_mut_ptr() as *mut Particle, len)
            }),
            None => Ok(&mut []),
        }
    }

    fn grow(&mut self, len: usize) -> Result<()> {
        let particle_size = std::mem::size_of::<Particle>();
        let target = len.checked_next_power_of_two().unwrap_or(len).max(MIN_SCRATCH_PARTICLES);
        let mut target_bytes = target.checked_mul(particle_size).ok_or_else(|| {
            KernelError::out_of_resources(format!("scratch buffer for {} particles", len))
        })?;

        if let Some(budget) = self.budget_bytes {
            let needed = len.saturating_mul(particle_size);
            if needed > budget {
                return Err(KernelError::out_of_resources(format!(
                    "scratch buffer needs {} bytes, budget is {}",
                    needed, budget
                )));
            }
            target_bytes = target_bytes.min(budget / particle_size * particle_size);
        }

        let block = aligned_alloc(target_bytes, self.alignment)?;
        log::debug!(
            "scratch buffer grown to {} particles ({} bytes, align {})",
            target_bytes / particle_size,
            target_bytes,
            self.alignment
        );
        self.capacity = target_bytes / particle_size;
        self.block = Some(block);
        Ok(())
    }
}
