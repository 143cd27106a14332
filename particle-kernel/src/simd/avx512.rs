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
//! AVX-512 step kernel for x86_64 CPUs
//!
//! A whole batch of four particles fits one 512-bit register.
//!
//! # Requirements
//!
//! - x86_64 CPU with AVX-512F support
//! - The `avx512` cargo feature (needs AVX-512 intrinsics on stable)

use super::{StepParams, BATCH_WIDTH};
use crate::particle::{as_lanes_mut, Particle};
use std::arch::x86_64::*;

/// Keeps lanes 0 and 1 (x, y) of every 128-bit particle group
const POSITION_LANES: __mmask16 = 0x3333;

/// Integrate all full batches of `particles`; returns how many were processed
///
/// # Safety
///
/// The CPU must support AVX-512F.
#[target_feature(enable = "avx512f")]
pub unsafe fn integrate_batches(particles: &mut [Particle], params: &StepParams) -> usize {
    let processed = particles.len() / BATCH_WIDTH * BATCH_WIDTH;
    let (dvx, dvy) = params.velocity_deltas();

    let dv_lanes: [f32; 16] = [
        0.0, 0.0, dvx, dvy, 0.0, 0.0, dvx, dvy, 0.0, 0.0, dvx, dvy, 0.0, 0.0, dvx, dvy,
    ];
    let dv = _mm512_loadu_ps(dv_lanes.as_ptr());
    let dt = _mm512_set1_ps(params.dt);

    let lanes = as_lanes_mut(&mut particles[..processed]);
    for batch in lanes.chunks_exact_mut(BATCH_WIDTH * Particle::LANES) {
        let ptr = batch.as_mut_ptr();
        let p = _mm512_add_ps(_mm512_loadu_ps(ptr), dv);
        let v = _mm512_permute_ps(p, 0b11_10_11_10);
        let dp = _mm512_maskz_mov_ps(POSITION_LANES, _mm512_mul_ps(v, dt));
        _mm512_storeu_ps(ptr, _mm512_add_ps(p, dp));
    }
    processed
}
