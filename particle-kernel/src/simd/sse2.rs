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
//! SSE2 step kernel for x86_64 CPUs
//!
//! One particle `[x, y, vx, vy]` fills one 128-bit register. A batch of
//! four particles is processed with four register round trips.

use super::{StepParams, BATCH_WIDTH};
use crate::particle::{as_lanes_mut, Particle};
use std::arch::x86_64::*;

/// Integrate all full batches of `particles`; returns how many were processed
///
/// # Safety
///
/// The CPU must support SSE2.
#[target_feature(enable = "sse2")]
pub unsafe fn integrate_batches(particles: &mut [Particle], params: &StepParams) -> usize {
    let processed = particles.len() / BATCH_WIDTH * BATCH_WIDTH;
    let (dvx, dvy) = params.velocity_deltas();

    // Lanes: [x, y, vx, vy]
    let dv = _mm_setr_ps(0.0, 0.0, dvx, dvy);
    let dt = _mm_set1_ps(params.dt);
    let position_mask = _mm_castsi128_ps(_mm_setr_epi32(-1, -1, 0, 0));

    let lanes = as_lanes_mut(&mut particles[..processed]);
    for batch in lanes.chunks_exact_mut(BATCH_WIDTH * Particle::LANES) {
        for particle in batch.chunks_exact_mut(Particle::LANES) {
            let ptr = particle.as_mut_ptr();
            let p = _mm_add_ps(_mm_loadu_ps(ptr), dv);
            // [vx', vy', vx', vy'] * dt, with the velocity half masked off
            let v = _mm_shuffle_ps(p, p, 0b11_10_11_10);
            let dp = _mm_and_ps(_mm_mul_ps(v, dt), position_mask);
            _mm_storeu_ps(ptr, _mm_add_ps(p, dp));
        }
    }
    processed
}
