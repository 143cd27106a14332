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
//! Particle record
//!
//! A particle is a plain position/velocity pair. It has no identity beyond the
//! pool slot that stores it. The layout is fixed (`#[repr(C)]`, four `f32`)
//! so the vector kernels can load one particle per 128-bit lane.

use bytemuck::{Pod, Zeroable};

/// Point mass with position and velocity in world units
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Particle {
    /// Horizontal position
    pub x: f32,
    /// Vertical position (+y points down)
    pub y: f32,
    /// Horizontal velocity
    pub vx: f32,
    /// Vertical velocity
    pub vy: f32,
}

impl Particle {
    /// Number of `f32` lanes in one particle
    pub const LANES: usize = 4;

    /// Create a particle
    pub fn new(x: f32, y: f32, vx: f32, vy: f32) -> Self {
        Particle { x, y, vx, vy }
    }

    /// Squared speed
    #[inline]
    pub fn speed_sq(&self) -> f32 {
        self.vx * self.vx + self.vy * self.vy
    }

    /// Speed magnitude
    #[inline]
    pub fn speed(&self) -> f32 {
        self.speed_sq().sqrt()
    }

    /// Check that all components are finite
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.vx.is_finite() && self.vy.is_finite()
    }
}

/// View a particle slice as its flat `f32` lanes
pub fn as_lanes(particles: &[Particle]) -> &[f32] {
    bytemuck::cast_slice(particles)
}

/// Mutable view of a particle slice as its flat `f32` lanes
pub fn as_lanes_mut(particles: &mut [Particle]) -> &mut [f32] {
    bytemuck::cast_slice_mut(particles)
}
