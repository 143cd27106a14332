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
//! AVX2 step kernel for x86_64 CPUs
//!
//! This module processes two particles per 256-bit register, so a batch of
//! four particles takes two loads and two stores.
//!
//! # Requirements
//!
//! - x86_64 CPU with AVX and AVX2 support
//! - Detected automatically at runtime
//!
//! No fused multiply-add: every lane must round exactly like the scalar
//! kernel.

use super::{StepParams, BATCH_WIDTH};
use crate::particle::{as_lanes_mut, Particle};
use std::arch::x86_64::*;

const PARTICLES_PER_REGISTER: usize = 2;

/// Integrate all full batches of `particles`; returns how many were processed
///
/// # Safety
///
/// The CPU must support AVX and AVX2.
#[target_feature(enable = "avx,avx2")]
pub unsafe fn integrate_batches(particles: &mut [Particle], params: &StepParams) -> usize {
    let processed = particles.len() / BATCH_WIDTH * BATCH_WIDTH;
    let (dvx, dvy) = params.velocity_deltas();

    // Two particles: [x0, y0, vx0, vy0, x1, y1, vx1, vy1]
    let dv = _mm256_setr_ps(0.0, 0.0, dvx, dvy, 0.0, 0.0, dvx, dvy);
    let dt = _mm256_set1_ps(params.dt);
    let position_mask = _mm256_castsi256_ps(_mm256_setr_epi32(-1, -1, 0, 0, -1, -1, 0, 0));

    let lanes = as_lanes_mut(&mut particles[..processed]);
    for batch in lanes.chunks_exact_mut(BATCH_WIDTH * Particle::LANES) {
        for pair in batch.chunks_exact_mut(PARTICLES_PER_REGISTER * Particle::LANES) {
            let ptr = pair.as_mut_ptr();
            let p = _mm256_add_ps(_mm256_loadu_ps(ptr), dv);
            // Broadcast each particle's velocity within its own 128-bit lane
            let v = _mm256_permute_ps(p, 0b11_10_11_10);
            let dp = _mm256_and_ps(_mm256_mul_ps(v, dt), position_mask);
            _mm256_storeu_ps(ptr, _mm256_add_ps(p, dp));
        }
    }
    processed
}
