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

//! Burst example
//!
//! Fires bursts into a vortex with collisions enabled and reports grid
//! occupancy and collision counts.

use particle_kernel::{CollisionSettings, ForceField, Simulation, SimulationConfig};

fn main() -> particle_kernel::Result<()> {
    let config = SimulationConfig::default()
        .with_seed(7)
        .with_collisions(CollisionSettings {
            enabled: true,
            ..CollisionSettings::default()
        });
    let mut sim = Simulation::with_config(5000, 200.0, 120.0, config)?;
    sim.add_force_field(ForceField::vortex(100.0, 60.0, 40.0).with_radius(50.0))?;
    sim.add_force_field(ForceField::radial(30.0, 30.0, -80.0).with_radius(20.0))?;

    let dt = 1.0 / 60.0;
    for frame in 0..600 {
        if frame % 60 == 0 {
            let spawned = sim.spawn_burst(100.0, 110.0, 800, 1.0)?;
            println!("frame {:>3}: burst of {}", frame, spawned);
        }
        sim.step(dt);
    }

    let grid = sim.grid_stats();
    let stats = sim.stats();
    println!();
    println!("Active particles:   {}", sim.particle_count());
    println!("Settled:            {}", stats.particles_settled);
    println!("Collision pairs:    {}", stats.collision_pairs_resolved);
    println!(
        "Grid occupancy:     {}/{} cells, max {}, avg {:.2}",
        grid.occupied_cells, grid.cells, grid.max_occupancy, grid.avg_occupancy
    );
    Ok(())
}
