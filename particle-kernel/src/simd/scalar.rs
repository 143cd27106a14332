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
//! Scalar step kernel
//!
//! This module provides the pure scalar integrator that serves as:
//! - Fallback for CPUs without SIMD support
//! - Reference implementation for testing SIMD correctness
//! - Tail handler for particle counts not divisible by the batch width
//!
//! The vector kernels perform the same operations in the same order, so
//! their results match this one lane for lane.

use super::StepParams;
use crate::particle::Particle;

/// Advance every particle by one semi-implicit Euler step
///
/// ```text
/// v' = v + (wind, gravity) * dt
/// p' = p + v' * dt
/// ```
pub fn integrate(particles: &mut [Particle], params: &StepParams) {
    let (dvx, dvy) = params.velocity_deltas();
    let dt = params.dt;
    for p in particles {
        p.vx += dvx;
        p.vy += dvy;
        p.x += p.vx * dt;
        p.y += p.vy * dt;
    }
}
