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

//! Basic simulation example
//!
//! Drops a row of particles, lets them bounce and settle, and prints the
//! state once per simulated second.

use particle_kernel::{Simulation, SimulationConfig};

fn main() -> particle_kernel::Result<()> {
    let config = SimulationConfig::default().with_seed(1).with_wind(0.5);
    let mut sim = Simulation::with_config(100, 80.0, 40.0, config)?;

    for i in 0..20 {
        sim.add_particle(5.0 + 3.0 * i as f32, 2.0, (i % 5) as f32 - 2.0, 0.0)?;
    }
    println!("Kernel: {}", sim.kernel());
    println!("Particles: {}\n", sim.particle_count());

    let dt = 1.0 / 60.0;
    for second in 1..=10 {
        for _ in 0..60 {
            sim.step(dt);
        }
        let lowest = sim.iter().map(|p| p.y).fold(f32::MIN, f32::max);
        println!(
            "t = {:>2}s  active = {:>3}  settled = {:>3}  lowest y = {:.2}",
            second,
            sim.particle_count(),
            sim.stats().particles_settled,
            lowest
        );
        if sim.particle_count() == 0 {
            break;
        }
    }

    println!("\nPool: {:?}", sim.pool_stats());
    Ok(())
}
