//! Camera poses and rotation utilities.

use nalgebra::{Matrix3, Point3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

/// Tolerance used to accept a matrix as a rotation.
pub const ROTATION_TOLERANCE: f64 = 1e-6;

/// Camera pose errors.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PoseError {
    #[error("rotation is not orthonormal (|R^T R - I| = {orthogonality:.3e}, det = {det:.6})")]
    NotARotation { orthogonality: f64, det: f64 },
    #[error("translation is not finite")]
    NonFiniteTranslation,
}

/// Pose of one camera in a shared world frame for one capture session.
///
/// Maps world points into camera coordinates: `p_cam = R * p_world + t`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraExtrinsics {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
    /// Identifier of the world origin this pose is expressed in.
    pub reference_frame: String,
}

impl CameraExtrinsics {
    /// Validate and create a pose.
    pub fn new(
        rotation: Matrix3<f64>,
        translation: Vector3<f64>,
        reference_frame: impl Into<String>,
    ) -> Result<Self, PoseError> {
        check_rotation(&rotation, ROTATION_TOLERANCE)?;
        if translation.iter().any(|v| !v.is_finite()) {
            return Err(PoseError::NonFiniteTranslation);
        }
        Ok(Self {
            rotation,
            translation,
            reference_frame: reference_frame.into(),
        })
    }

    pub fn transform_point(&self, p_world: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.rotation * p_world.coords + self.translation)
    }

    /// Camera center in world coordinates.
    pub fn camera_center(&self) -> Point3<f64> {
        Point3::from(-(self.rotation.transpose() * self.translation))
    }

    /// Angle (radians) of the relative rotation between two poses.
    pub fn rotation_angle_to(&self, other: &CameraExtrinsics) -> f64 {
        rotation_angle_between(&self.rotation, &other.rotation)
    }
}

/// Check orthonormality and a positive determinant.
pub fn check_rotation(r: &Matrix3<f64>, tol: f64) -> Result<(), PoseError> {
    let orthogonality = (r.transpose() * r - Matrix3::identity()).norm();
    let det = r.determinant();
    if !orthogonality.is_finite() || orthogonality > tol || (det - 1.0).abs() > tol {
        return Err(PoseError::NotARotation { orthogonality, det });
    }
    Ok(())
}

/// Geodesic angle between two rotations, in radians.
pub fn rotation_angle_between(a: &Matrix3<f64>, b: &Matrix3<f64>) -> f64 {
    let rel = a.transpose() * b;
    ((rel.trace() - 1.0) * 0.5).clamp(-1.0, 1.0).acos()
}

/// Closest rotation (Frobenius norm) to an arbitrary 3x3 matrix.
pub fn project_to_rotation(m: &Matrix3<f64>) -> Option<Matrix3<f64>> {
    let svd = m.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let mut u_fix = u;
        u_fix.column_mut(2).neg_mut();
        r = u_fix * v_t;
    }
    Some(r)
}

/// Chordal L2 mean of rotations: the rotation closest to their arithmetic
/// mean, which unlike the raw mean is a valid rotation.
pub fn chordal_mean(rotations: &[Matrix3<f64>]) -> Option<Matrix3<f64>> {
    if rotations.is_empty() {
        return None;
    }
    let sum = rotations
        .iter()
        .fold(Matrix3::zeros(), |acc: Matrix3<f64>, r| acc + r);
    project_to_rotation(&(sum / rotations.len() as f64))
}

/// Rotation matrix from an axis-angle vector.
#[inline]
pub fn rotation_from_axis_angle(w: &Vector3<f64>) -> Matrix3<f64> {
    *Rotation3::new(*w).matrix()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn rejects_non_rotation() {
        let scaled = Matrix3::identity() * 2.0;
        assert!(CameraExtrinsics::new(scaled, Vector3::zeros(), "world").is_err());
        let mut reflect = Matrix3::identity();
        reflect[(2, 2)] = -1.0;
        assert!(CameraExtrinsics::new(reflect, Vector3::zeros(), "world").is_err());
        let r = rotation_from_axis_angle(&Vector3::new(0.1, 0.2, -0.3));
        assert!(CameraExtrinsics::new(r, Vector3::new(1.0, 2.0, 3.0), "world").is_ok());
    }

    #[test]
    fn camera_center_maps_to_origin() {
        let r = rotation_from_axis_angle(&Vector3::new(0.3, -0.1, 0.2));
        let pose = CameraExtrinsics::new(r, Vector3::new(100.0, -50.0, 2000.0), "world").unwrap();
        let c = pose.camera_center();
        let in_cam = pose.transform_point(&c);
        assert_relative_eq!(in_cam.coords.norm(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn chordal_mean_of_symmetric_perturbations() {
        let base = rotation_from_axis_angle(&Vector3::new(0.2, 0.1, -0.4));
        let d = 0.02;
        let rots = vec![
            rotation_from_axis_angle(&Vector3::new(d, 0.0, 0.0)) * base,
            rotation_from_axis_angle(&Vector3::new(-d, 0.0, 0.0)) * base,
        ];
        let mean = chordal_mean(&rots).unwrap();
        assert!(check_rotation(&mean, 1e-9).is_ok());
        assert!(rotation_angle_between(&mean, &base) < 1e-9);

        // Naive averaging is not a rotation; the projected mean is.
        let naive = (rots[0] + rots[1]) * 0.5;
        assert!(check_rotation(&naive, 1e-6).is_err());
    }
}
