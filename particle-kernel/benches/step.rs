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
//! Benchmarks for the step kernels and full simulation steps
//!
//! Compares every kernel available on this CPU against the scalar one.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use particle_kernel::simd::{StepKernel, StepParams};
use particle_kernel::{ForceField, Particle, Simulation, SimulationConfig};

fn particles(n: usize) -> Vec<Particle> {
    (0..n)
        .map(|i| Particle::new(i as f32 * 0.01, 10.0, 1.0, -2.0))
        .collect()
}

fn bench_kernels(c: &mut Criterion) {
    let mut group = c.benchmark_group("step_kernel");
    let params = StepParams::new(1.0 / 60.0, 9.81, 0.5);

    for n in [1024usize, 16_384, 131_072].iter() {
        group.throughput(Throughput::Elements(*n as u64));
        for kernel in StepKernel::available() {
            let mut data = particles(*n);
            group.bench_with_input(BenchmarkId::new(kernel.name(), n), n, |b, _| {
                b.iter(|| kernel.integrate(black_box(&mut data), &params));
            });
        }
        #[cfg(feature = "parallel")]
        {
            let kernel = StepKernel::available()[0];
            let mut data = particles(*n);
            group.bench_with_input(BenchmarkId::new("parallel", n), n, |b, _| {
                b.iter(|| kernel.integrate_parallel(black_box(&mut data), &params, 1024));
            });
        }
    }

    group.finish();
}

fn bench_simulation_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("simulation_step");

    for n in [1000usize, 10_000].iter() {
        for collisions in [false, true] {
            let config = SimulationConfig::default().with_seed(7).with_gravity(0.0);
            let mut sim = Simulation::with_config(*n, 400.0, 400.0, config).unwrap();
            sim.spawn_burst(200.0, 200.0, *n, std::f32::consts::TAU).unwrap();
            sim.add_force_field(ForceField::vortex(200.0, 200.0, 50.0)).unwrap();
            sim.enable_collisions(collisions);

            let label = if collisions { "collisions" } else { "no_collisions" };
            group.bench_with_input(BenchmarkId::new(label, n), n, |b, _| {
                b.iter(|| sim.step(black_box(1.0 / 60.0)));
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_kernels, bench_simulation_step);
criterion_main!(benches);
