/*! Rigid pose composition/inversion.
 *
 * This module is kept to exactly one job: compose and invert a
 * `(position, orientation)` pair built on `nalgebra`. Other math primitives
 * (quaternion/matrix/FOV->projection beyond this) live closer to their one
 * caller instead of here.
 */

use nalgebra::{UnitQuaternion, Vector3};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

impl Pose {
    pub fn identity() -> Self {
        Self {
            position: Vector3::zeros(),
            orientation: UnitQuaternion::identity(),
        }
    }

    pub fn new(position: Vector3<f64>, orientation: UnitQuaternion<f64>) -> Self {
        Self {
            position,
            orientation,
        }
    }

    /// Builds a pose from a raw (possibly unnormalized) quaternion, matching
    /// `math_quat_normalize` being applied before use in the original.
    pub fn from_raw(position: Vector3<f64>, quat_xyzw: (f64, f64, f64, f64)) -> Self {
        let (x, y, z, w) = quat_xyzw;
        let raw = nalgebra::Quaternion::new(w, x, y, z);
        Self {
            position,
            orientation: UnitQuaternion::from_quaternion(raw),
        }
    }

    /// `self^-1`. For a rigid transform `x' = R x + t`, the inverse is
    /// `(R^-1, -R^-1 t)`.
    pub fn inverse(&self) -> Self {
        let orientation = self.orientation.inverse();
        let position = orientation * (-self.position);
        Self {
            position,
            orientation,
        }
    }

    /// Composes `self` as the outer (parent) transform applied to `child`:
    /// equivalent to `math_pose_transform(self, child, out)` in the
    /// original, i.e. `out = self * child`.
    pub fn compose(&self, child: &Pose) -> Pose {
        Pose {
            orientation: self.orientation * child.orientation,
            position: self.position + self.orientation * child.position,
        }
    }

    pub fn translation_norm(&self) -> f64 {
        self.position.norm()
    }

    pub fn rotation_w(&self) -> f64 {
        self.orientation.quaternion().w
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pose_inverse_composes_to_identity_both_orders() {
        let orig = Pose::from_raw(
            Vector3::new(123.0, 456.0, 789.0),
            (-0.439, -0.561, 0.072, -0.698),
        );
        let invert = orig.inverse();

        let out_a = orig.compose(&invert);
        let out_b = invert.compose(&orig);

        assert!(out_a.translation_norm() < 1e-3);
        assert!((out_a.rotation_w().abs() - 1.0).abs() < 1e-3 || out_a.rotation_w().abs() > 0.999);
        assert!(out_b.translation_norm() < 1e-3);
        assert!(out_b.rotation_w().abs() > 0.999);
    }

    #[test]
    fn identity_inverse_is_identity() {
        let id = Pose::identity();
        let inv = id.inverse();
        assert!(inv.translation_norm() < 1e-12);
        assert!((inv.rotation_w() - 1.0).abs() < 1e-12);
    }
}
