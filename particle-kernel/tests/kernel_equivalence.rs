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
//! Every available step kernel must agree with the scalar kernel
//!
//! Tolerances are relative: 1e-5 for normal inputs, 1e-3 for extreme
//! magnitudes and timesteps.

use particle_kernel::simd::{StepKernel, StepParams, BATCH_WIDTH};
use particle_kernel::Particle;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const SIZES: [usize; 6] = [0, 1, 3, 4, 7, 63];
const NORMAL_TOLERANCE: f32 = 1e-5;
const EXTREME_TOLERANCE: f32 = 1e-3;

fn close(a: f32, b: f32, tolerance: f32) -> bool {
    if a == b || (a.is_nan() && b.is_nan()) {
        return true;
    }
    (a - b).abs() <= tolerance * a.abs().max(b.abs()).max(1.0)
}

fn assert_agree(kernel: StepKernel, out: &[Particle], reference: &[Particle], tolerance: f32) {
    assert_eq!(out.len(), reference.len());
    for (i, (a, b)) in out.iter().zip(reference).enumerate() {
        let pairs = [(a.x, b.x), (a.y, b.y), (a.vx, b.vx), (a.vy, b.vy)];
        assert!(
            pairs.iter().all(|(u, v)| close(*u, *v, tolerance)),
            "{} disagrees at particle {}: {:?} vs {:?}",
            kernel,
            i,
            a,
            b
        );
    }
}

fn random_particles(rng: &mut StdRng, n: usize, magnitude: f32) -> Vec<Particle> {
    (0..n)
        .map(|_| {
            Particle::new(
                rng.random_range(-magnitude..magnitude),
                rng.random_range(-magnitude..magnitude),
                rng.random_range(-magnitude..magnitude),
                rng.random_range(-magnitude..magnitude),
            )
        })
        .collect()
}

fn check_all_kernels(seed: u64, magnitude: f32, params: StepParams, tolerance: f32) {
    let mut rng = StdRng::seed_from_u64(seed);
    for n in SIZES {
        let input = random_particles(&mut rng, n, magnitude);
        let mut reference = input.clone();
        StepKernel::Scalar.integrate(&mut reference, &params);

        for kernel in StepKernel::available() {
            let mut out = input.clone();
            kernel.integrate(&mut out, &params);
            assert_agree(kernel, &out, &reference, tolerance);
        }
    }
}

#[test]
fn test_normal_ranges() {
    for (seed, params) in [
        (1, StepParams::new(1.0 / 60.0, 9.81, 0.0)),
        (2, StepParams::new(1.0 / 120.0, 9.81, -3.5)),
        (3, StepParams::new(0.05, -4.0, 12.0)),
    ] {
        check_all_kernels(seed, 100.0, params, NORMAL_TOLERANCE);
    }
}

#[test]
fn test_extreme_ranges() {
    for (seed, magnitude, params) in [
        (10, 1e6, StepParams::new(1.0, 1e4, -1e4)),
        (11, 1e-3, StepParams::new(1e-6, 9.81, 0.1)),
        (12, 1e3, StepParams::new(10.0, 1e5, 1e5)),
    ] {
        check_all_kernels(seed, magnitude, params, EXTREME_TOLERANCE);
    }
}

#[test]
fn test_zero_particles_every_kernel() {
    let params = StepParams::new(0.016, 9.81, 1.0);
    for kernel in StepKernel::PREFERENCE {
        let mut empty: Vec<Particle> = Vec::new();
        kernel.integrate(&mut empty, &params);
        assert!(empty.is_empty());
    }
}

#[test]
fn test_split_at_batch_boundary_is_composable() {
    let mut rng = StdRng::seed_from_u64(99);
    let input = random_particles(&mut rng, 23, 50.0);
    let params = StepParams::new(0.02, 9.81, 1.0);

    for kernel in StepKernel::available() {
        let mut whole = input.clone();
        kernel.integrate(&mut whole, &params);

        for split in (0..=input.len()).step_by(BATCH_WIDTH) {
            let mut parts = input.clone();
            let (head, tail) = parts.split_at_mut(split);
            kernel.integrate(head, &params);
            kernel.integrate(tail, &params);
            assert_eq!(parts, whole, "{} split at {}", kernel, split);
        }
    }
}

#[cfg(feature = "parallel")]
#[test]
fn test_parallel_chunks_match() {
    let mut rng = StdRng::seed_from_u64(5);
    let input = random_particles(&mut rng, 5003, 100.0);
    let params = StepParams::new(1.0 / 60.0, 9.81, 2.0);

    for kernel in StepKernel::available() {
        let mut serial = input.clone();
        kernel.integrate(&mut serial, &params);
        let mut parallel = input.clone();
        kernel.integrate_parallel(&mut parallel, &params, 256);
        assert_eq!(parallel, serial, "{}", kernel);
    }
}
