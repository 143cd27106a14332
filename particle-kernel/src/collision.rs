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
//! Pairwise collision response between equal-mass circular particles
//!
//! Candidate pairs come from the spatial grid, cell by cell: pairs inside a
//! cell, then pairs against the forward half of its 3×3 neighbourhood (east,
//! and the three cells of the next row). Every unordered pair of adjacent
//! entries is visited exactly once per pass, with no cap on cell population.

use crate::error::{KernelError, Result};
use crate::grid::SpatialGrid;
use crate::particle::Particle;
use crate::pool::{ParticleHandle, ParticlePool};

/// Cell offsets `(row, col)` that, together with the home cell, cover each
/// adjacent cell pair once
const FORWARD_NEIGHBORS: [(usize, isize); 4] = [(0, 1), (1, -1), (1, 0), (1, 1)];

/// Parameters of the pairwise collision pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionSettings {
    /// Radius of every particle
    pub collision_radius: f32,
    /// Fraction of closing speed kept after impact, in `[0, 1]`
    pub restitution: f32,
    /// Scale applied to the impulse, in `[0, 1]`
    pub friction: f32,
    /// Whether the simulation runs the pass at all
    pub enabled: bool,
}

impl Default for CollisionSettings {
    fn default() -> Self {
        CollisionSettings {
            collision_radius: 0.5,
            restitution: 0.8,
            friction: 0.9,
            enabled: false,
        }
    }
}

impl CollisionSettings {
    /// Check ranges
    pub fn validate(&self) -> Result<()> {
        if !(self.collision_radius.is_finite() && self.collision_radius > 0.0) {
            return Err(KernelError::invalid_parameter(format!(
                "collision radius {} must be positive and finite",
                self.collision_radius
            )));
        }
        if !(0.0..=1.0).contains(&self.restitution) {
            return Err(KernelError::invalid_parameter(format!(
                "restitution {} outside [0, 1]",
                self.restitution
            )));
        }
        if !(0.0..=1.0).contains(&self.friction) {
            return Err(KernelError::invalid_parameter(format!(
                "friction {} outside [0, 1]",
                self.friction
            )));
        }
        Ok(())
    }
}

/// Resolve one overlapping, approaching pair; returns whether it was resolved
///
/// The impulse along the contact normal is `(1 + e) * closing / 2`, scaled by
/// friction and applied with opposite signs, which conserves the pair's
/// momentum. The overlap is then removed by pushing both particles apart
/// by half of it.
pub fn resolve_pair(a: &mut Particle, b: &mut Particle, settings: &CollisionSettings) -> bool {
    let contact = 2.0 * settings.collision_radius;
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let dist_sq = dx * dx + dy * dy;
    if !(dist_sq < contact * contact) {
        return false;
    }

    let dist = dist_sq.sqrt();
    let (nx, ny) = if dist > f32::EPSILON {
        (dx / dist, dy / dist)
    } else {
        (1.0, 0.0)
    };

    let closing = (b.vx - a.vx) * nx + (b.vy - a.vy) * ny;
    if closing >= 0.0 {
        return false;
    }

    let impulse = -(1.0 + settings.restitution) * closing * 0.5 * settings.friction;
    a.vx -= impulse * nx;
    a.vy -= impulse * ny;
    b.vx += impulse * nx;
    b.vy += impulse * ny;

    let push = (contact - dist) * 0.5;
    a.x -= nx * push;
    a.y -= ny * push;
    b.x += nx * push;
    b.y += ny * push;
    true
}

/// Resolve every colliding pair found through `grid`
///
/// `grid` must have been rebuilt from `pool` in the current step; entries
/// whose slots have since been freed are skipped. Current pool positions are
/// used for the contact test, the grid only supplies candidates. Returns the
/// number of pairs resolved.
pub fn resolve_collisions(
    grid: &SpatialGrid,
    pool: &mut ParticlePool,
    settings: &CollisionSettings,
) -> usize {
    let mut resolved = 0;

    for row in 0..grid.rows() {
        for col in 0..grid.cols() {
            let Some(home) = grid.cell_entries(row, col) else {
                continue;
            };
            if home.is_empty() {
                continue;
            }

            for (i, a) in home.iter().enumerate() {
                for b in &home[i + 1..] {
                    resolved += resolve_handles(pool, a.handle, b.handle, settings);
                }
            }

            for (d_row, d_col) in FORWARD_NEIGHBORS {
                let Some(n_col) = col.checked_add_signed(d_col) else {
                    continue;
                };
                let Some(neighbor) = grid.cell_entries(row + d_row, n_col) else {
                    continue;
                };
                for a in home {
                    for b in neighbor {
                        resolved += resolve_handles(pool, a.handle, b.handle, settings);
                    }
                }
            }
        }
    }
    resolved
}

fn resolve_handles(
    pool: &mut ParticlePool,
    a: ParticleHandle,
    b: ParticleHandle,
    settings: &CollisionSettings,
) -> usize {
    match pool.get_pair_mut(a, b) {
        Some((pa, pb)) => usize::from(resolve_pair(pa, pb, settings)),
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn elastic() -> CollisionSettings {
        CollisionSettings {
            collision_radius: 0.5,
            restitution: 1.0,
            friction: 1.0,
            enabled: true,
        }
    }

    #[test]
    fn test_head_on_exchange() {
        let mut a = Particle::new(10.0, 5.0, 2.0, 0.0);
        let mut b = Particle::new(10.8, 5.0, -3.0, 0.0);
        assert!(resolve_pair(&mut a, &mut b, &elastic()));
        assert!((a.vx + 3.0).abs() < 1e-5);
        assert!((b.vx - 2.0).abs() < 1e-5);
        assert_eq!((a.vy, b.vy), (0.0, 0.0));
        // Pushed apart to exactly touching
        assert!(((b.x - a.x) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_momentum_conserved_oblique() {
        let mut a = Particle::new(0.0, 0.0, 1.5, 0.7);
        let mut b = Particle::new(0.6, 0.4, -0.8, -1.1);
        let before = (a.vx + b.vx, a.vy + b.vy);
        let settings = CollisionSettings {
            restitution: 0.6,
            friction: 0.8,
            ..elastic()
        };
        assert!(resolve_pair(&mut a, &mut b, &settings));
        let after = (a.vx + b.vx, a.vy + b.vy);
        assert!((before.0 - after.0).abs() < 1e-5);
        assert!((before.1 - after.1).abs() < 1e-5);
    }

    #[test]
    fn test_separating_pair_untouched() {
        let a0 = Particle::new(0.0, 0.0, -1.0, 0.0);
        let b0 = Particle::new(0.5, 0.0, 1.0, 0.0);
        let (mut a, mut b) = (a0, b0);
        assert!(!resolve_pair(&mut a, &mut b, &elastic()));
        assert_eq!((a, b), (a0, b0));
    }

    #[test]
    fn test_distant_pair_untouched() {
        let a0 = Particle::new(0.0, 0.0, 5.0, 0.0);
        let b0 = Particle::new(1.5, 0.0, -5.0, 0.0);
        let (mut a, mut b) = (a0, b0);
        assert!(!resolve_pair(&mut a, &mut b, &elastic()));
        assert_eq!((a, b), (a0, b0));
    }

    #[test]
    fn test_coincident_pair_uses_fallback_normal() {
        let mut a = Particle::new(3.0, 3.0, 1.0, 0.0);
        let mut b = Particle::new(3.0, 3.0, -1.0, 0.0);
        assert!(resolve_pair(&mut a, &mut b, &elastic()));
        assert!(a.is_finite() && b.is_finite());
        assert!(a.x < b.x);
    }

    #[test]
    fn test_resolve_collisions_counts_each_pair_once() {
        let mut pool = ParticlePool::new(8).unwrap();
        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let c = pool.allocate().unwrap();
        *pool.get_mut(a).unwrap() = Particle::new(5.0, 5.0, 1.0, 0.0);
        *pool.get_mut(b).unwrap() = Particle::new(5.8, 5.0, -1.0, 0.0);
        // Far away, never touches anything
        *pool.get_mut(c).unwrap() = Particle::new(30.0, 30.0, 0.0, 0.0);

        let mut grid = SpatialGrid::new(40.0, 40.0, 4.0).unwrap();
        grid.rebuild(&pool).unwrap();

        assert_eq!(resolve_collisions(&grid, &mut pool, &elastic()), 1);
        assert!((pool.get(a).unwrap().vx + 1.0).abs() < 1e-5);
        assert!((pool.get(b).unwrap().vx - 1.0).abs() < 1e-5);
        assert_eq!(*pool.get(c).unwrap(), Particle::new(30.0, 30.0, 0.0, 0.0));

        // Now separating: a second pass resolves nothing
        grid.rebuild(&pool).unwrap();
        assert_eq!(resolve_collisions(&grid, &mut pool, &elastic()), 0);
    }

    #[test]
    fn test_resolve_skips_freed_slots() {
        let mut pool = ParticlePool::new(4).unwrap();
        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        *pool.get_mut(a).unwrap() = Particle::new(5.0, 5.0, 1.0, 0.0);
        *pool.get_mut(b).unwrap() = Particle::new(5.5, 5.0, -1.0, 0.0);
        let mut grid = SpatialGrid::new(20.0, 20.0, 4.0).unwrap();
        grid.rebuild(&pool).unwrap();

        pool.free(b).unwrap();
        assert_eq!(resolve_collisions(&grid, &mut pool, &elastic()), 0);
        assert_eq!(pool.get(a).unwrap().vx, 1.0);
    }

    #[test]
    fn test_pairs_across_cell_borders_resolved_once() {
        let mut pool = ParticlePool::new(8).unwrap();
        let mut grid = SpatialGrid::new(16.0, 16.0, 4.0).unwrap();
        // One pair per forward direction, each straddling a cell border
        let pairs = [
            ((3.8, 1.0, 1.0, 0.0), (4.2, 1.0, -1.0, 0.0)),
            ((1.0, 7.8, 0.0, 1.0), (1.0, 8.2, 0.0, -1.0)),
            ((11.8, 11.8, 1.0, 1.0), (12.2, 12.2, -1.0, -1.0)),
            ((8.2, 3.8, -1.0, 1.0), (7.8, 4.2, 1.0, -1.0)),
        ];
        for ((ax, ay, avx, avy), (bx, by, bvx, bvy)) in pairs {
            let a = pool.allocate().unwrap();
            let b = pool.allocate().unwrap();
            *pool.get_mut(a).unwrap() = Particle::new(ax, ay, avx, avy);
            *pool.get_mut(b).unwrap() = Particle::new(bx, by, bvx, bvy);
        }
        grid.rebuild(&pool).unwrap();
        assert_eq!(resolve_collisions(&grid, &mut pool, &elastic()), 4);
        // Elastic exchange leaves every pair separating
        grid.rebuild(&pool).unwrap();
        assert_eq!(resolve_collisions(&grid, &mut pool, &elastic()), 0);
    }

    #[test]
    fn test_validate() {
        assert!(CollisionSettings::default().validate().is_ok());
        let bad = [
            CollisionSettings { collision_radius: 0.0, ..Default::default() },
            CollisionSettings { collision_radius: f32::NAN, ..Default::default() },
            CollisionSettings { restitution: 1.5, ..Default::default() },
            CollisionSettings { friction: -0.1, ..Default::default() },
        ];
        for settings in bad {
            assert!(settings.validate().is_err(), "{:?}", settings);
        }
    }
}
