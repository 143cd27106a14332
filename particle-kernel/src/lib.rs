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
//! # Particle Kernel
//!
//! A fixed-memory 2D particle simulation kernel for real-time use: thousands
//! of point masses under gravity, wind, force fields and pairwise collisions.
//!
//! ## Features
//!
//! - **Pool Allocation**: fixed-capacity particle storage with O(1) allocate/free
//! - **Spatial Grid**: uniform grid for 3×3 neighbourhood and radius queries
//! - **Runtime Dispatch**: SSE2/AVX2/AVX-512 step kernels with a scalar fallback
//! - **Force Fields**: radial, attractor, vortex and directional fields
//! - **Parallelization**: optional Rayon integration for large particle counts
//!
//! ## Example
//!
//! ```rust
//! use particle_kernel::{ForceField, Simulation};
//!
//! let mut sim = Simulation::new(1000, 200.0, 100.0).unwrap();
//! sim.spawn_burst(100.0, 90.0, 250, 0.8).unwrap();
//! sim.add_force_field(ForceField::vortex(100.0, 50.0, 20.0)).unwrap();
//! sim.enable_collisions(true);
//!
//! for _ in 0..60 {
//!     sim.step(1.0 / 60.0);
//! }
//! assert!(sim.particle_count() <= 250);
//! ```

#![warn(missing_docs)]

/// Collision response between particles
pub mod collision;

/// Error types and error counters
pub mod error;

/// Force fields acting on particle velocity
pub mod field;

/// Uniform spatial grid
pub mod grid;

/// The particle record
pub mod particle;

/// Fixed-capacity particle pool
pub mod pool;

/// Step kernels, capability detection and aligned memory
pub mod simd;

/// The simulation orchestrator
pub mod simulation;

pub use collision::CollisionSettings;
pub use error::{ErrorKind, KernelError, Result};
pub use field::{FieldKind, ForceField};
pub use grid::{GridStats, SpatialGrid};
pub use particle::Particle;
pub use pool::{ParticleHandle, ParticlePool, PoolConfig};
pub use simd::{detect_capabilities, Capabilities, StepKernel};
pub use simulation::{Simulation, SimulationConfig, SimulationStats};
