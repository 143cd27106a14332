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
//! Simulation orchestrator
//!
//! A [`Simulation`] owns one particle pool, one spatial grid, the force
//! fields and the global parameters, and advances them with [`Simulation::step`].
//!
//! # Step order
//!
//! 1. Return at once if no particle is active
//! 2. Grow the aligned scratch buffer to the active count
//! 3. Copy active particles into the buffer
//! 4. Run the selected step kernel (gravity and wind)
//! 5. Apply active force fields
//! 6. Write back, bouncing off the world edges with damping and extra
//!    friction along the floor
//! 7. Free particles that have settled on the floor
//! 8. With collisions enabled, rebuild the grid and resolve pairs
//!
//! If the scratch buffer cannot be obtained the step runs the scalar kernel
//! directly over the pool instead.
//!
//! # Coordinates
//!
//! The world spans `[0, width) × [0, height)` with +y pointing down, so
//! positive gravity pulls particles toward the floor at `y = height - 1`.

use crate::collision::{resolve_collisions, CollisionSettings};
use crate::error::{KernelError, Result};
use crate::field::{apply_fields, ForceField};
use crate::grid::{GridStats, SpatialGrid};
use crate::particle::Particle;
use crate::pool::{ParticleHandle, ParticlePool, PoolConfig, PoolStats};
use crate::simd::{
    detect_capabilities, select_step_kernel, Capabilities, ScratchBuffer, StepKernel, StepParams,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::FRAC_PI_2;

/// Particles per parallel work item
#[cfg(feature = "parallel")]
const PARALLEL_CHUNK: usize = 1024;

/// Tunable behaviour of a [`Simulation`]
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    /// Initial downward acceleration
    pub gravity: f32,
    /// Initial horizontal acceleration
    pub wind: f32,
    /// Fraction of speed kept when bouncing off a wall or the floor
    pub boundary_damping: f32,
    /// Horizontal velocity scale per step for particles on the floor
    pub floor_friction: f32,
    /// Speed below which a particle on the floor is removed
    pub settle_speed: f32,
    /// Height of the band above the floor counted as "on the floor"
    pub settle_band: f32,
    /// Target spatial grid cell size
    pub cell_size: f32,
    /// Speed range `(min, max)` of burst particles
    pub burst_speed: (f32, f32),
    /// Active count from which integration runs in parallel
    pub parallel_threshold: usize,
    /// Seed for burst randomness; `None` draws one from the OS
    pub seed: Option<u64>,
    /// Initial collision settings
    pub collision: CollisionSettings,
    /// Upper bound on scratch buffer size in bytes
    pub scratch_budget: Option<usize>,
    /// Log pool allocation failures and rejected frees
    pub log_pool_events: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            gravity: 9.81,
            wind: 0.0,
            boundary_damping: 0.8,
            floor_friction: 0.95,
            settle_speed: 0.5,
            settle_band: 0.5,
            cell_size: 4.0,
            burst_speed: (5.0, 15.0),
            parallel_threshold: 4096,
            seed: None,
            collision: CollisionSettings::default(),
            scratch_budget: None,
            log_pool_events: false,
        }
    }
}

impl SimulationConfig {
    /// Set the initial gravity
    pub fn with_gravity(mut self, gravity: f32) -> Self {
        self.gravity = gravity;
        self
    }

    /// Set the initial wind
    pub fn with_wind(mut self, wind: f32) -> Self {
        self.wind = wind;
        self
    }

    /// Set the bounce damping factor
    pub fn with_boundary_damping(mut self, damping: f32) -> Self {
        self.boundary_damping = damping;
        self
    }

    /// Set the floor friction factor
    pub fn with_floor_friction(mut self, friction: f32) -> Self {
        self.floor_friction = friction;
        self
    }

    /// Set the settle speed threshold and floor band height
    pub fn with_settling(mut self, speed: f32, band: f32) -> Self {
        self.settle_speed = speed;
        self.settle_band = band;
        self
    }

    /// Set the target grid cell size
    pub fn with_cell_size(mut self, cell_size: f32) -> Self {
        self.cell_size = cell_size;
        self
    }

    /// Set the burst speed range
    pub fn with_burst_speed(mut self, min: f32, max: f32) -> Self {
        self.burst_speed = (min, max);
        self
    }

    /// Set the active count from which integration runs in parallel
    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold;
        self
    }

    /// Make bursts reproducible
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the initial collision settings
    pub fn with_collisions(mut self, settings: CollisionSettings) -> Self {
        self.collision = settings;
        self
    }

    /// Cap the scratch buffer at `bytes`
    pub fn with_scratch_budget(mut self, bytes: usize) -> Self {
        self.scratch_budget = Some(bytes);
        self
    }

    /// Log pool events
    pub fn with_pool_logging(mut self) -> Self {
        self.log_pool_events = true;
        self
    }

    /// Check every value
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("gravity", self.gravity), ("wind", self.wind)] {
            if !value.is_finite() {
                return Err(KernelError::invalid_parameter(format!(
                    "{} must be finite, got {}",
                    name, value
                )));
            }
        }
        for (name, value) in [
            ("boundary damping", self.boundary_damping),
            ("floor friction", self.floor_friction),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(KernelError::invalid_parameter(format!(
                    "{} {} outside [0, 1]",
                    name, value
                )));
            }
        }
        for (name, value) in [
            ("settle speed", self.settle_speed),
            ("settle band", self.settle_band),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(KernelError::invalid_parameter(format!(
                    "{} must be finite and non-negative, got {}",
                    name, value
                )));
            }
        }
        if !(self.cell_size.is_finite() && self.cell_size > 0.0) {
            return Err(KernelError::invalid_parameter(format!(
                "cell size must be positive and finite, got {}",
                self.cell_size
            )));
        }
        let (min, max) = self.burst_speed;
        if !(min.is_finite() && max.is_finite() && min >= 0.0 && min <= max) {
            return Err(KernelError::invalid_parameter(format!(
                "burst speed range ({}, {}) is invalid",
                min, max
            )));
        }
        self.collision.validate()
    }
}

/// Step counters of a [`Simulation`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulationStats {
    /// Steps that advanced at least one particle
    pub steps: u64,
    /// Steps integrated by a vector kernel
    pub vector_steps: u64,
    /// Steps integrated by the scalar kernel
    pub scalar_steps: u64,
    /// Steps that fell back to the in-place scalar path
    pub scalar_fallbacks: u64,
    /// Particles removed after settling
    pub particles_settled: u64,
    /// Collision pairs resolved over all steps
    pub collision_pairs_resolved: u64,
    /// Collision pairs resolved by the latest step
    pub last_collision_pairs: usize,
}

/// World edges and floor behaviour applied on write-back
#[derive(Debug, Clone, Copy)]
struct Bounds {
    right: f32,
    floor: f32,
    floor_band: f32,
    damping: f32,
    floor_friction: f32,
}

impl Bounds {
    fn apply(&self, p: &mut Particle) {
        if p.x < 0.0 {
            p.x = 0.0;
            p.vx = p.vx.abs() * self.damping;
        } else if p.x > self.right {
            p.x = self.right;
            p.vx = -p.vx.abs() * self.damping;
        }

        if p.y < 0.0 {
            p.y = 0.0;
            p.vy = p.vy.abs() * self.damping;
        } else if p.y >= self.floor {
            p.y = self.floor;
            if p.vy > 0.0 {
                p.vy = -p.vy * self.damping;
            }
        }

        if p.y >= self.floor_band {
            p.vx *= self.floor_friction;
        }
    }

    /// Pull a position back inside the walls without touching velocity
    fn contain(&self, p: &mut Particle) {
        p.x = p.x.clamp(0.0, self.right);
        p.y = p.y.clamp(0.0, self.floor);
    }
}

/// Real-time 2D particle simulation
pub struct Simulation {
    pool: ParticlePool,
    grid: SpatialGrid,
    fields: Vec<ForceField>,
    gravity: f32,
    wind: f32,
    width: f32,
    height: f32,
    collision: CollisionSettings,
    kernel: StepKernel,
    capabilities: Capabilities,
    scratch: ScratchBuffer,
    /// Pool handle of each scratch entry, in copy order
    handles: Vec<ParticleHandle>,
    settled: Vec<ParticleHandle>,
    rng: StdRng,
    config: SimulationConfig,
    stats: SimulationStats,
}

impl Simulation {
    /// Create a simulation with default configuration
    ///
    /// # Errors
    ///
    /// `InvalidParameter` if `capacity` is zero or the world is not larger
    /// than one unit on each side.
    pub fn new(capacity: usize, width: f32, height: f32) -> Result<Self> {
        Self::with_config(capacity, width, height, SimulationConfig::default())
    }

    /// Create a simulation with an explicit configuration
    pub fn with_config(
        capacity: usize,
        width: f32,
        height: f32,
        config: SimulationConfig,
    ) -> Result<Self> {
        Self::with_capabilities(capacity, width, height, config, detect_capabilities())
    }

    /// Create a simulation that selects its kernel from `capabilities`
    ///
    /// Vector code still runs only where the host supports it.
    pub fn with_capabilities(
        capacity: usize,
        width: f32,
        height: f32,
        config: SimulationConfig,
        capabilities: Capabilities,
    ) -> Result<Self> {
        for (name, value) in [("width", width), ("height", height)] {
            if !(value.is_finite() && value > 1.0) {
                return Err(KernelError::invalid_parameter(format!(
                    "world {} must be finite and > 1, got {}",
                    name, value
                )));
            }
        }
        config.validate()?;

        let mut pool_config = PoolConfig::new(capacity);
        if config.log_pool_events {
            pool_config = pool_config.with_logging();
        }
        let pool = ParticlePool::with_config(pool_config)?;
        let grid = SpatialGrid::new(
            width,
            height,
            grid_cell_size(config.cell_size, &config.collision),
        )?;

        let mut scratch = ScratchBuffer::new(capabilities.preferred_alignment)?;
        if let Some(budget) = config.scratch_budget {
            scratch = scratch.with_budget(budget);
        }

        let kernel = select_step_kernel(&capabilities);
        let rng = StdRng::seed_from_u64(config.seed.unwrap_or_else(rand::random));

        log::debug!(
            "simulation created: {} slots, {}x{} world, {} kernel",
            capacity,
            width,
            height,
            kernel
        );

        Ok(Simulation {
            pool,
            grid,
            fields: Vec::new(),
            gravity: config.gravity,
            wind: config.wind,
            width,
            height,
            collision: config.collision,
            kernel,
            capabilities,
            scratch,
            handles: reserve_handles(capacity)?,
            settled: reserve_handles(capacity)?,
            rng,
            config,
            stats: SimulationStats::default(),
        })
    }

    /// Advance by `dt` seconds with the selected kernel
    ///
    /// A negative or non-finite `dt` is rejected with a warning and leaves
    /// the state untouched.
    pub fn step(&mut self, dt: f32) {
        self.step_with(self.kernel, dt);
    }

    /// Advance by `dt` seconds with the scalar kernel
    pub fn step_scalar(&mut self, dt: f32) {
        self.step_with(StepKernel::Scalar, dt);
    }

    fn step_with(&mut self, kernel: StepKernel, dt: f32) {
        if !(dt.is_finite() && dt >= 0.0) {
            log::warn!("ignoring step with invalid dt {}", dt);
            return;
        }
        let active = self.pool.active_count();
        if active == 0 {
            return;
        }
        self.stats.steps += 1;

        let params = StepParams::new(dt, self.gravity, self.wind);
        let bounds = self.bounds();

        match self.scratch.ensure(active) {
            Ok(buffer) => {
                self.handles.clear();
                for (slot, (handle, particle)) in buffer.iter_mut().zip(self.pool.iter()) {
                    *slot = *particle;
                    self.handles.push(handle);
                }

                #[cfg(feature = "parallel")]
                {
                    if active >= self.config.parallel_threshold {
                        kernel.integrate_parallel(buffer, &params, PARALLEL_CHUNK);
                    } else {
                        kernel.integrate(buffer, &params);
                    }
                }
                #[cfg(not(feature = "parallel"))]
                kernel.integrate(buffer, &params);

                apply_fields(buffer, &self.fields, dt);

                for (handle, updated) in self.handles.iter().zip(buffer.iter()) {
                    if let Some(particle) = self.pool.get_mut(*handle) {
                        *particle = *updated;
                        bounds.apply(particle);
                    }
                }

                if kernel == StepKernel::Scalar {
                    self.stats.scalar_steps += 1;
                } else {
                    self.stats.vector_steps += 1;
                }
            }
            Err(e) => {
                log::warn!("scratch buffer unavailable, stepping in place: {}", e);
                for (_, particle) in self.pool.iter_mut() {
                    let one = std::slice::from_mut(particle);
                    StepKernel::Scalar.integrate(one, &params);
                    apply_fields(one, &self.fields, dt);
                    bounds.apply(&mut one[0]);
                }
                self.stats.scalar_fallbacks += 1;
                self.stats.scalar_steps += 1;
            }
        }

        self.remove_settled();

        self.stats.last_collision_pairs = 0;
        if self.collision.enabled {
            match self.grid.rebuild(&self.pool) {
                Ok(()) => {
                    let pairs = resolve_collisions(&self.grid, &mut self.pool, &self.collision);
                    // Separation pushes can cross a wall
                    if pairs > 0 {
                        for (_, particle) in self.pool.iter_mut() {
                            bounds.contain(particle);
                        }
                    }
                    self.stats.last_collision_pairs = pairs;
                    self.stats.collision_pairs_resolved += pairs as u64;
                }
                Err(e) => log::warn!("skipping collision pass: {}", e),
            }
        }
    }

    fn bounds(&self) -> Bounds {
        let floor = self.height - 1.0;
        Bounds {
            right: self.width - 1.0,
            floor,
            floor_band: floor - self.config.settle_band,
            damping: self.config.boundary_damping,
            floor_friction: self.config.floor_friction,
        }
    }

    fn remove_settled(&mut self) {
        let band = self.height - 1.0 - self.config.settle_band;
        let settle_sq = self.config.settle_speed * self.config.settle_speed;

        self.settled.clear();
        self.settled.extend(
            self.pool
                .iter()
                .filter(|(_, p)| p.y >= band && p.speed_sq() < settle_sq)
                .map(|(handle, _)| handle),
        );
        for handle in self.settled.drain(..) {
            if self.pool.free(handle).is_ok() {
                self.stats.particles_settled += 1;
            }
        }
    }

    /// Add one particle
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` for non-finite input
    /// - `OutOfRange` if `(x, y)` lies outside the world or the pool is full
    pub fn add_particle(&mut self, x: f32, y: f32, vx: f32, vy: f32) -> Result<ParticleHandle> {
        if !(vx.is_finite() && vy.is_finite() && x.is_finite() && y.is_finite()) {
            return Err(KernelError::invalid_parameter(format!(
                "particle ({}, {}) with velocity ({}, {}) is not finite",
                x, y, vx, vy
            )));
        }
        self.check_in_world(x, y)?;
        let handle = self.pool.allocate()?;
        if let Some(particle) = self.pool.get_mut(handle) {
            *particle = Particle::new(x, y, vx, vy);
        }
        Ok(handle)
    }

    /// Spawn up to `count` particles at `(x, y)` flying upward
    ///
    /// Directions are spread uniformly across a cone `spread` radians wide
    /// centred on straight up; speeds are drawn from the configured burst
    /// range. Spawns no more than the free slots allow and returns how many
    /// were spawned.
    pub fn spawn_burst(&mut self, x: f32, y: f32, count: usize, spread: f32) -> Result<usize> {
        if !(x.is_finite() && y.is_finite()) {
            return Err(KernelError::invalid_parameter(format!(
                "burst origin ({}, {}) is not finite",
                x, y
            )));
        }
        if !(spread.is_finite() && spread >= 0.0) {
            return Err(KernelError::invalid_parameter(format!(
                "burst spread {} must be finite and non-negative",
                spread
            )));
        }
        self.check_in_world(x, y)?;

        let (min_speed, max_speed) = self.config.burst_speed;
        let half = spread * 0.5;
        let n = count.min(self.pool.free_count());
        for _ in 0..n {
            let angle = -FRAC_PI_2 + self.rng.random_range(-half..=half);
            let speed = self.rng.random_range(min_speed..=max_speed);
            let (sin, cos) = angle.sin_cos();
            let handle = self.pool.allocate()?;
            if let Some(particle) = self.pool.get_mut(handle) {
                *particle = Particle::new(x, y, cos * speed, sin * speed);
            }
        }
        log::debug!("burst of {} particles at ({}, {})", n, x, y);
        Ok(n)
    }

    fn check_in_world(&self, x: f32, y: f32) -> Result<()> {
        if x < 0.0 || x >= self.width || y < 0.0 || y >= self.height {
            return Err(KernelError::out_of_range(format!(
                "({}, {}) is outside the {}x{} world",
                x, y, self.width, self.height
            )));
        }
        Ok(())
    }

    /// Free every particle
    pub fn clear(&mut self) {
        self.pool.clear();
        self.grid.clear();
    }

    /// Number of active particles
    pub fn particle_count(&self) -> usize {
        self.pool.active_count()
    }

    /// The `index`-th active particle in slot order
    ///
    /// The index is a dense enumeration, not a stable identity: it shifts as
    /// particles are added and removed. Each call scans the pool from the
    /// start, so walking every particle this way is quadratic; use
    /// [`Simulation::iter`] for that.
    pub fn get_particle(&self, index: usize) -> Option<&Particle> {
        self.pool.iter().nth(index).map(|(_, p)| p)
    }

    /// Iterate over active particles in slot order
    ///
    /// Every position lies inside `[0, width - 1] × [0, height - 1]` between
    /// steps.
    pub fn iter(&self) -> impl Iterator<Item = &Particle> + '_ {
        self.pool.iter().map(|(_, p)| p)
    }

    /// Downward acceleration
    pub fn gravity(&self) -> f32 {
        self.gravity
    }

    /// Set the downward acceleration
    pub fn set_gravity(&mut self, gravity: f32) -> Result<()> {
        if !gravity.is_finite() {
            return Err(KernelError::invalid_parameter(format!(
                "gravity must be finite, got {}",
                gravity
            )));
        }
        self.gravity = gravity;
        Ok(())
    }

    /// Horizontal acceleration
    pub fn wind(&self) -> f32 {
        self.wind
    }

    /// Set the horizontal acceleration
    pub fn set_wind(&mut self, wind: f32) -> Result<()> {
        if !wind.is_finite() {
            return Err(KernelError::invalid_parameter(format!(
                "wind must be finite, got {}",
                wind
            )));
        }
        self.wind = wind;
        Ok(())
    }

    /// Add a force field; returns its index
    pub fn add_force_field(&mut self, field: ForceField) -> Result<usize> {
        field.validate()?;
        self.fields.try_reserve(1).map_err(|e| {
            KernelError::allocation_failure(format!("force field list: {}", e))
        })?;
        self.fields.push(field);
        Ok(self.fields.len() - 1)
    }

    /// Remove the field at `index`, shifting later fields down
    pub fn remove_force_field(&mut self, index: usize) -> Result<ForceField> {
        if index >= self.fields.len() {
            return Err(KernelError::out_of_range(format!(
                "force field {} of {}",
                index,
                self.fields.len()
            )));
        }
        Ok(self.fields.remove(index))
    }

    /// Remove every field
    pub fn clear_force_fields(&mut self) {
        self.fields.clear();
    }

    /// Number of fields
    pub fn force_field_count(&self) -> usize {
        self.fields.len()
    }

    /// Field at `index`
    pub fn force_field(&self, index: usize) -> Option<&ForceField> {
        self.fields.get(index)
    }

    /// Mutable field at `index`
    pub fn force_field_mut(&mut self, index: usize) -> Option<&mut ForceField> {
        self.fields.get_mut(index)
    }

    /// Current collision settings
    pub fn collision_settings(&self) -> &CollisionSettings {
        &self.collision
    }

    /// Replace the collision settings
    ///
    /// Rebuilds the grid when the new radius needs larger cells.
    pub fn set_collision_settings(&mut self, settings: CollisionSettings) -> Result<()> {
        settings.validate()?;
        let cell = grid_cell_size(self.config.cell_size, &settings);
        if cell != grid_cell_size(self.config.cell_size, &self.collision) {
            self.grid = SpatialGrid::new(self.width, self.height, cell)?;
            log::debug!("spatial grid rebuilt for collision radius {}", settings.collision_radius);
        }
        self.collision = settings;
        Ok(())
    }

    /// Turn the collision pass on or off
    pub fn enable_collisions(&mut self, enabled: bool) {
        self.collision.enabled = enabled;
    }

    /// Occupancy of the spatial grid as of the last collision pass
    pub fn grid_stats(&self) -> GridStats {
        self.grid.stats()
    }

    /// Step counters
    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    /// Pool counters
    pub fn pool_stats(&self) -> &PoolStats {
        self.pool.stats()
    }

    /// The particle pool
    pub fn pool(&self) -> &ParticlePool {
        &self.pool
    }

    /// Kernel used by [`Simulation::step`]
    pub fn kernel(&self) -> StepKernel {
        self.kernel
    }

    /// Force a kernel
    ///
    /// # Errors
    ///
    /// `InvalidParameter` if the host cannot run `kernel`.
    pub fn set_kernel(&mut self, kernel: StepKernel) -> Result<()> {
        if !kernel.is_supported(&detect_capabilities()) {
            return Err(KernelError::invalid_parameter(format!(
                "{} kernel is not supported on this host",
                kernel
            )));
        }
        log::debug!("step kernel set to {}", kernel);
        self.kernel = kernel;
        Ok(())
    }

    /// Capabilities the kernel was selected from
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// World `(width, height)`
    pub fn world_size(&self) -> (f32, f32) {
        (self.width, self.height)
    }

    /// Configuration the simulation was built with
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }
}

/// Cells must span at least one particle diameter for 3×3 queries to find
/// every contact
fn grid_cell_size(target: f32, collision: &CollisionSettings) -> f32 {
    target.max(2.0 * collision.collision_radius)
}

fn reserve_handles(capacity: usize) -> Result<Vec<ParticleHandle>> {
    let mut handles = Vec::new();
    handles.try_reserve_exact(capacity).map_err(|e| {
        KernelError::allocation_failure(format!("handle list of {}: {}", capacity, e))
    })?;
    Ok(handles)
}
