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
//! Vectorized step kernels with runtime dispatch
//!
//! Every kernel advances a slice of particles by one semi-implicit Euler step
//! under gravity and wind. The vector kernels (SSE2, AVX2, AVX-512) and the
//! scalar kernel are interchangeable.
//!
//! # Architecture
//!
//! - **Runtime Detection**: [`detect_capabilities`] probes the CPU once per process
//! - **Dispatch**: [`select_step_kernel`] picks the best kernel from a fixed
//!   preference table (AVX-512 > AVX2 > SSE2 > scalar)
//! - **Deterministic**: vector kernels perform the scalar kernel's operations in
//!   the same order without fused multiply-add, so results agree lane for lane
//! - **Stable Rust**: uses `std::arch` intrinsics
//!
//! # Batching
//!
//! Vector kernels consume particles in batches of [`BATCH_WIDTH`]. Whatever is
//! left below one batch goes through the scalar kernel, so splitting a slice
//! at any batch boundary never changes the result.
//!
//! # Safety
//!
//! Vector code runs only after the host's real capabilities confirm the
//! required instructions, whatever capabilities the caller selected with.

mod aligned;
mod dispatch;
mod scalar;

#[cfg(all(feature = "simd", target_arch = "x86_64"))]
mod avx2;

#[cfg(all(feature = "avx512", target_arch = "x86_64"))]
mod avx512;

#[cfg(all(feature = "simd", target_arch = "x86_64"))]
mod sse2;

pub use aligned::{aligned_alloc, AlignedBlock, ScratchBuffer};
pub use dispatch::{detect_capabilities, Capabilities, Feature, FeatureSet, DEFAULT_CACHE_LINE};

use crate::particle::Particle;
use std::fmt;

/// Particles consumed per vector batch
pub const BATCH_WIDTH: usize = 4;

/// Global parameters of one integration step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepParams {
    /// Timestep in seconds
    pub dt: f32,
    /// Downward acceleration (+y is down)
    pub gravity: f32,
    /// Horizontal acceleration
    pub wind: f32,
}

impl StepParams {
    /// Bundle a timestep with the global accelerations
    pub fn new(dt: f32, gravity: f32, wind: f32) -> Self {
        StepParams { dt, gravity, wind }
    }

    /// Velocity change applied to every particle: `(wind * dt, gravity * dt)`
    pub fn velocity_deltas(&self) -> (f32, f32) {
        (self.wind * self.dt, self.gravity * self.dt)
    }
}

/// One implementation of the step function per capability tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKernel {
    /// Portable scalar loop
    Scalar,
    /// 128-bit SSE2, one particle per register
    Sse2,
    /// 256-bit AVX2, two particles per register
    Avx2,
    /// 512-bit AVX-512F, four particles per register
    Avx512,
}

impl StepKernel {
    /// Selection order, best first
    pub const PREFERENCE: [StepKernel; 4] = [
        StepKernel::Avx512,
        StepKernel::Avx2,
        StepKernel::Sse2,
        StepKernel::Scalar,
    ];

    /// Human readable name
    pub fn name(self) -> &'static str {
        match self {
            StepKernel::Scalar => "Scalar",
            StepKernel::Sse2 => "SSE2",
            StepKernel::Avx2 => "AVX2",
            StepKernel::Avx512 => "AVX-512",
        }
    }

    /// Particles handled per vector batch (1 for the scalar kernel)
    pub fn batch_width(self) -> usize {
        match self {
            StepKernel::Scalar => 1,
            _ => BATCH_WIDTH,
        }
    }

    /// Whether this kernel is compiled in and `caps` offers its instructions
    pub fn is_supported(self, caps: &Capabilities) -> bool {
        match self {
            StepKernel::Scalar => true,
            StepKernel::Sse2 => {
                cfg!(all(feature = "simd", target_arch = "x86_64")) && caps.has(Feature::Sse2)
            }
            StepKernel::Avx2 => {
                cfg!(all(feature = "simd", target_arch = "x86_64"))
                    && caps.has(Feature::Avx)
                    && caps.has(Feature::Avx2)
            }
            StepKernel::Avx512 => {
                cfg!(all(feature = "avx512", target_arch = "x86_64")) && caps.has(Feature::Avx512F)
            }
        }
    }

    /// Kernels usable on this host, best first
    pub fn available() -> Vec<StepKernel> {
        let caps = detect_capabilities();
        Self::PREFERENCE
            .into_iter()
            .filter(|k| k.is_supported(&caps))
            .collect()
    }

    /// Integrate `particles` by one step
    ///
    /// Full batches go through the vector path when the host supports it;
    /// the remainder (or everything, on an unsupported host) goes through the
    /// scalar kernel.
    pub fn integrate(self, particles: &mut [Particle], params: &StepParams) {
        let processed = if self.is_supported(&detect_capabilities()) {
            // SAFETY: the host was just confirmed to support this kernel
            unsafe { self.integrate_batches(particles, params) }
        } else {
            0
        };
        scalar::integrate(&mut particles[processed..], params);
    }

    /// Integrate in parallel over batch-aligned chunks
    ///
    /// `chunk_size` is rounded up to a multiple of [`BATCH_WIDTH`], so the
    /// result is identical to [`StepKernel::integrate`] on the whole slice.
    #[cfg(feature = "parallel")]
    pub fn integrate_parallel(self, particles: &mut [Particle], params: &StepParams, chunk_size: usize) {
        use rayon::prelude::*;

        let chunk = (chunk_size.max(1) + BATCH_WIDTH - 1) / BATCH_WIDTH * BATCH_WIDTH;
        particles
            .par_chunks_mut(chunk)
            .for_each(|chunk| self.integrate(chunk, params));
    }

    /// Run the vector path over full batches; returns the particles processed
    ///
    /// # Safety
    ///
    /// The CPU must support the instructions of this kernel.
    unsafe fn integrate_batches(self, particles: &mut [Particle], params: &StepParams) -> usize {
        match self {
            StepKernel::Scalar => 0,
            #[cfg(all(feature = "simd", target_arch = "x86_64"))]
            StepKernel::Sse2 => sse2::integrate_batches(particles, params),
            #[cfg(all(feature = "simd", target_arch = "x86_64"))]
            StepKernel::Avx2 => avx2::integrate_batches(particles, params),
            #[cfg(all(feature = "avx512", target_arch = "x86_64"))]
            StepKernel::Avx512 => avx512::integrate_batches(particles, params),
            #[allow(unreachable_patterns)]
            _ => {
                let _ = (particles, params);
                0
            }
        }
    }
}

impl fmt::Display for StepKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pick the best kernel `caps` supports
///
/// A pure function of `caps`: the first entry of [`StepKernel::PREFERENCE`]
/// that is supported wins, with [`StepKernel::Scalar`] always last.
pub fn select_step_kernel(caps: &Capabilities) -> StepKernel {
    let kernel = StepKernel::PREFERENCE
        .into_iter()
        .find(|k| k.is_supported(caps))
        .unwrap_or(StepKernel::Scalar);
    log::debug!("selected {} step kernel", kernel.name());
    kernel
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_particles(rng: &mut StdRng, n: usize) -> Vec<Particle> {
        (0..n)
            .map(|_| {
                Particle::new(
                    rng.random_range(0.0..200.0),
                    rng.random_range(0.0..100.0),
                    rng.random_range(-20.0..20.0),
                    rng.random_range(-20.0..20.0),
                )
            })
            .collect()
    }

    #[test]
    fn test_scalar_only_selects_scalar() {
        assert_eq!(select_step_kernel(&Capabilities::scalar_only()), StepKernel::Scalar);
    }

    #[test]
    fn test_selection_priority() {
        let caps = detect_capabilities();
        let selected = select_step_kernel(&caps);
        let expected = StepKernel::PREFERENCE
            .into_iter()
            .find(|k| k.is_supported(&caps))
            .unwrap();
        assert_eq!(selected, expected);
        assert!(StepKernel::available().contains(&selected));
        assert_eq!(StepKernel::available().last(), Some(&StepKernel::Scalar));
    }

    #[cfg(all(feature = "simd", target_arch = "x86_64"))]
    #[test]
    fn test_injected_features_drive_selection() {
        let sse_only = Capabilities::from_features(
            [Feature::Sse, Feature::Sse2].into_iter().collect(),
            64,
        );
        assert_eq!(select_step_kernel(&sse_only), StepKernel::Sse2);

        let avx2 = Capabilities::from_features(
            [Feature::Sse, Feature::Sse2, Feature::Avx, Feature::Avx2].into_iter().collect(),
            64,
        );
        assert_eq!(select_step_kernel(&avx2), StepKernel::Avx2);

        // AVX2 flag without AVX is not enough
        let no_avx = Capabilities::from_features(
            [Feature::Sse2, Feature::Avx2].into_iter().collect(),
            64,
        );
        assert_eq!(select_step_kernel(&no_avx), StepKernel::Sse2);
    }

    #[test]
    fn test_batch_width() {
        assert_eq!(StepKernel::Scalar.batch_width(), 1);
        for kernel in [StepKernel::Sse2, StepKernel::Avx2, StepKernel::Avx512] {
            assert_eq!(kernel.batch_width(), BATCH_WIDTH);
        }
    }

    #[test]
    fn test_velocity_deltas() {
        let params = StepParams::new(0.5, 10.0, -4.0);
        assert_eq!(params.velocity_deltas(), (-2.0, 5.0));
    }

    #[test]
    fn test_every_kernel_matches_scalar() {
        let mut rng = StdRng::seed_from_u64(7);
        let params = StepParams::new(1.0 / 60.0, 9.81, 0.7);
        for n in [0usize, 1, 3, 4, 7, 63] {
            let input = random_particles(&mut rng, n);
            let mut reference = input.clone();
            StepKernel::Scalar.integrate(&mut reference, &params);

            for kernel in StepKernel::PREFERENCE {
                let mut out = input.clone();
                kernel.integrate(&mut out, &params);
                assert_eq!(out, reference, "{} diverged for n = {}", kernel, n);
            }
        }
    }

    #[test]
    fn test_unsupported_kernel_falls_back_to_scalar() {
        // Any kernel, supported or not, must give the scalar answer
        let mut a = vec![Particle::new(1.0, 2.0, 3.0, 4.0); 9];
        let mut b = a.clone();
        let params = StepParams::new(0.1, 9.81, 0.0);
        StepKernel::Avx512.integrate(&mut a, &params);
        StepKernel::Scalar.integrate(&mut b, &params);
        assert_eq!(a, b);
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn test_parallel_matches_serial() {
        let mut rng = StdRng::seed_from_u64(11);
        let input = random_particles(&mut rng, 1001);
        let params = StepParams::new(0.016, 9.81, 2.0);
        let kernel = select_step_kernel(&detect_capabilities());

        let mut serial = input.clone();
        kernel.integrate(&mut serial, &params);
        for chunk in [1usize, 5, 64, 4096] {
            let mut parallel = input.clone();
            kernel.integrate_parallel(&mut parallel, &params, chunk);
            assert_eq!(parallel, serial, "chunk {}", chunk);
        }
    }
}
