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
//! Force fields
//!
//! A [`ForceField`] maps a particle position to an acceleration. Fields are
//! plain values; applying one only changes particle velocity, positions are
//! left to the step kernel.
//!
//! # Field kinds
//!
//! - **Radial**: toward the centre (positive strength) or away from it
//!   (negative), falling off as `1 / (d + ε)`
//! - **Attractor**: inverse-square pull, `strength / (d² + ε²)`
//! - **Vortex**: tangential to the radius vector, falling off as `1 / (d + ε)`
//! - **Directional**: constant direction and magnitude
//!
//! A positive `radius` limits any field to the disc around `(x, y)`;
//! zero means unbounded.

use crate::error::{KernelError, Result};
use crate::particle::Particle;

/// Softening length that keeps falloffs finite at the field centre
pub const SOFTENING: f32 = 0.1;

/// Shape of a force field
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldKind {
    /// Push or pull along the radius vector
    Radial,
    /// Constant force along a unit vector
    Directional {
        /// Unit direction, x component
        dx: f32,
        /// Unit direction, y component
        dy: f32,
    },
    /// Swirl around the centre
    Vortex,
    /// Inverse-square pull toward the centre
    Attractor,
}

/// A force field acting on every particle in range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForceField {
    /// Shape of the field
    pub kind: FieldKind,
    /// Centre x
    pub x: f32,
    /// Centre y
    pub y: f32,
    /// Signed magnitude
    pub strength: f32,
    /// Cutoff distance from the centre, 0 for unbounded
    pub radius: f32,
    /// Inactive fields contribute nothing
    pub active: bool,
}

impl ForceField {
    fn centred(kind: FieldKind, x: f32, y: f32, strength: f32) -> Self {
        ForceField {
            kind,
            x,
            y,
            strength,
            radius: 0.0,
            active: true,
        }
    }

    /// Radial field; positive strength attracts, negative repels
    pub fn radial(x: f32, y: f32, strength: f32) -> Self {
        Self::centred(FieldKind::Radial, x, y, strength)
    }

    /// Inverse-square attractor
    pub fn attractor(x: f32, y: f32, strength: f32) -> Self {
        Self::centred(FieldKind::Attractor, x, y, strength)
    }

    /// Vortex; positive strength turns from +x toward +y
    pub fn vortex(x: f32, y: f32, strength: f32) -> Self {
        Self::centred(FieldKind::Vortex, x, y, strength)
    }

    /// Uniform field along `(dx, dy)`, normalised to unit length
    ///
    /// A zero or non-finite direction leaves a field that fails
    /// [`ForceField::validate`].
    pub fn directional(dx: f32, dy: f32, strength: f32) -> Self {
        let len = (dx * dx + dy * dy).sqrt();
        let (dx, dy) = if len > 0.0 { (dx / len, dy / len) } else { (dx, dy) };
        Self::centred(FieldKind::Directional { dx, dy }, 0.0, 0.0, strength)
    }

    /// Limit the field to `radius` around its centre
    pub fn with_radius(mut self, radius: f32) -> Self {
        self.radius = radius;
        self
    }

    /// Move the centre (the cutoff origin for directional fields)
    pub fn at(mut self, x: f32, y: f32) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    /// Same field, switched off
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Check that every parameter is usable
    pub fn validate(&self) -> Result<()> {
        if !(self.x.is_finite() && self.y.is_finite() && self.strength.is_finite()) {
            return Err(KernelError::invalid_parameter(format!(
                "force field centre ({}, {}) and strength {} must be finite",
                self.x, self.y, self.strength
            )));
        }
        if !self.radius.is_finite() || self.radius < 0.0 {
            return Err(KernelError::invalid_parameter(format!(
                "force field radius {} must be finite and non-negative",
                self.radius
            )));
        }
        if let FieldKind::Directional { dx, dy } = self.kind {
            let len = (dx * dx + dy * dy).sqrt();
            if !len.is_finite() || (len - 1.0).abs() > 1e-3 {
                return Err(KernelError::invalid_parameter(format!(
                    "directional field needs a unit direction, got ({}, {})",
                    dx, dy
                )));
            }
        }
        Ok(())
    }

    /// Acceleration the field imparts at `(px, py)`
    pub fn acceleration_at(&self, px: f32, py: f32) -> (f32, f32) {
        if !self.active {
            return (0.0, 0.0);
        }
        // Offset from the centre to the particle
        let rx = px - self.x;
        let ry = py - self.y;
        let dist = (rx * rx + ry * ry).sqrt();
        if self.radius > 0.0 && dist > self.radius {
            return (0.0, 0.0);
        }

        match self.kind {
            FieldKind::Directional { dx, dy } => (dx * self.strength, dy * self.strength),
            _ if dist <= 0.0 => (0.0, 0.0),
            FieldKind::Radial => {
                let magnitude = self.strength / (dist + SOFTENING);
                (-rx / dist * magnitude, -ry / dist * magnitude)
            }
            FieldKind::Attractor => {
                let magnitude = self.strength / (dist * dist + SOFTENING * SOFTENING);
                (-rx / dist * magnitude, -ry / dist * magnitude)
            }
            FieldKind::Vortex => {
                let magnitude = self.strength / (dist + SOFTENING);
                (-ry / dist * magnitude, rx / dist * magnitude)
            }
        }
    }
}

/// Apply one field to one particle's velocity over `dt`
pub fn apply_field(particle: &mut Particle, field: &ForceField, dt: f32) {
    let (ax, ay) = field.acceleration_at(particle.x, particle.y);
    particle.vx += ax * dt;
    particle.vy += ay * dt;
}

/// Apply every active field to every particle
pub fn apply_fields(particles: &mut [Particle], fields: &[ForceField], dt: f32) {
    if !fields.iter().any(|f| f.active) {
        return;
    }
    for particle in particles {
        for field in fields.iter().filter(|f| f.active) {
            apply_field(particle, field, dt);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    fn still(x: f32, y: f32) -> Particle {
        Particle::new(x, y, 0.0, 0.0)
    }

    #[test]
    fn test_radial_attracts_and_repels() {
        let mut p = still(10.0, 0.0);
        apply_field(&mut p, &ForceField::radial(0.0, 0.0, 5.0), 1.0);
        assert!(p.vx < 0.0);
        assert!(p.vy.abs() < EPS);
        // 5 / (10 + 0.1)
        assert!((p.vx + 5.0 / 10.1).abs() < EPS);

        let mut q = still(10.0, 0.0);
        apply_field(&mut q, &ForceField::radial(0.0, 0.0, -5.0), 1.0);
        assert!(q.vx > 0.0);
    }

    #[test]
    fn test_attractor_is_inverse_square() {
        let field = ForceField::attractor(0.0, 0.0, 100.0);
        let (near, _) = field.acceleration_at(0.0, 2.0);
        let (_, near_y) = field.acceleration_at(0.0, 2.0);
        let (_, far_y) = field.acceleration_at(0.0, 4.0);
        assert!(near.abs() < EPS);
        assert!(near_y < 0.0);
        let ratio = near_y / far_y;
        assert!(ratio > 3.9 && ratio < 4.0, "ratio {}", ratio);
    }

    #[test]
    fn test_vortex_is_tangential() {
        let field = ForceField::vortex(5.0, 5.0, 3.0);
        for (px, py) in [(8.0, 5.0), (5.0, 9.0), (1.0, 2.0)] {
            let (ax, ay) = field.acceleration_at(px, py);
            let (rx, ry) = (px - 5.0, py - 5.0);
            assert!((ax * rx + ay * ry).abs() < 1e-4);
            assert!(ax != 0.0 || ay != 0.0);
        }
        let (near_x, near_y) = field.acceleration_at(6.0, 5.0);
        let (far_x, far_y) = field.acceleration_at(9.0, 5.0);
        assert!(near_x.hypot(near_y) > far_x.hypot(far_y));
    }

    #[test]
    fn test_directional_is_constant() {
        let field = ForceField::directional(3.0, 4.0, 10.0);
        assert!(field.validate().is_ok());
        for (px, py) in [(0.0, 0.0), (100.0, -50.0), (1e4, 1e4)] {
            let (ax, ay) = field.acceleration_at(px, py);
            assert!((ax - 6.0).abs() < EPS);
            assert!((ay - 8.0).abs() < EPS);
        }
    }

    #[test]
    fn test_radius_cutoff() {
        let field = ForceField::radial(0.0, 0.0, 5.0).with_radius(3.0);
        assert_ne!(field.acceleration_at(2.0, 0.0), (0.0, 0.0));
        assert_eq!(field.acceleration_at(4.0, 0.0), (0.0, 0.0));

        let wind = ForceField::directional(1.0, 0.0, 2.0).at(50.0, 50.0).with_radius(10.0);
        assert_eq!(wind.acceleration_at(55.0, 50.0), (2.0, 0.0));
        assert_eq!(wind.acceleration_at(0.0, 0.0), (0.0, 0.0));
    }

    #[test]
    fn test_inactive_field_contributes_nothing() {
        let mut p = still(1.0, 1.0);
        apply_field(&mut p, &ForceField::attractor(0.0, 0.0, 1e6).inactive(), 1.0);
        assert_eq!(p, still(1.0, 1.0));
    }

    #[test]
    fn test_centre_is_finite() {
        for field in [
            ForceField::radial(2.0, 2.0, 1e3),
            ForceField::attractor(2.0, 2.0, 1e3),
            ForceField::vortex(2.0, 2.0, 1e3),
        ] {
            let mut p = still(2.0, 2.0);
            apply_field(&mut p, &field, 0.016);
            assert!(p.is_finite());

            let mut q = still(2.0 + 1e-6, 2.0);
            apply_field(&mut q, &field, 0.016);
            assert!(q.is_finite());
        }
    }

    #[test]
    fn test_apply_fields_is_additive() {
        let fields = [
            ForceField::directional(1.0, 0.0, 1.0),
            ForceField::directional(0.0, 1.0, 2.0),
            ForceField::directional(1.0, 0.0, 100.0).inactive(),
        ];
        let mut particles = vec![still(0.0, 0.0); 3];
        apply_fields(&mut particles, &fields, 0.5);
        for p in &particles {
            assert!((p.vx - 0.5).abs() < EPS);
            assert!((p.vy - 1.0).abs() < EPS);
            assert_eq!((p.x, p.y), (0.0, 0.0));
        }
    }

    #[test]
    fn test_validate_rejects_bad_fields() {
        assert!(ForceField::radial(f32::NAN, 0.0, 1.0).validate().is_err());
        assert!(ForceField::radial(0.0, 0.0, f32::INFINITY).validate().is_err());
        assert!(ForceField::vortex(0.0, 0.0, 1.0).with_radius(-1.0).validate().is_err());
        assert!(ForceField::directional(0.0, 0.0, 1.0).validate().is_err());
        assert!(ForceField::attractor(1.0, 2.0, -3.0).with_radius(5.0).validate().is_ok());
    }
}
