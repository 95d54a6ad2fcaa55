/*! Playspace (chaperone) transform: a yaw rotation plus translation applied
 * between the tracking origin and the local/stage space exposed to clients.
 */

use nalgebra::{UnitQuaternion, Vector3};

use crate::pose::Pose;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChaperoneTransform {
    pub translation: Vector3<f64>,
    pub yaw_radians: f64,
}

impl ChaperoneTransform {
    pub fn identity() -> Self {
        Self {
            translation: Vector3::zeros(),
            yaw_radians: 0.0,
        }
    }

    pub fn as_pose(&self) -> Pose {
        Pose::new(
            self.translation,
            UnitQuaternion::from_axis_angle(&Vector3::y_axis(), self.yaw_radians),
        )
    }

    /// Applies this transform to a tracking-origin pose, yielding the pose
    /// as seen from local/stage space.
    pub fn apply(&self, tracking_pose: &Pose) -> Pose {
        self.as_pose().compose(tracking_pose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_transform_is_a_no_op() {
        let chap = ChaperoneTransform::identity();
        let pose = Pose::new(Vector3::new(1.0, 2.0, 3.0), UnitQuaternion::identity());
        let out = chap.apply(&pose);
        assert!((out.position - pose.position).norm() < 1e-12);
    }

    #[test]
    fn translation_offsets_position() {
        let chap = ChaperoneTransform {
            translation: Vector3::new(1.0, 0.0, 0.0),
            yaw_radians: 0.0,
        };
        let pose = Pose::identity();
        let out = chap.apply(&pose);
        assert!((out.position - Vector3::new(1.0, 0.0, 0.0)).norm() < 1e-12);
    }
}
