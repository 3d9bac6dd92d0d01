//! Synthetic checkerboard captures from a known camera, for tests and demos.

use crate::{CameraIntrinsics, CheckerboardSpec, CornerObservation, TrialObservations};
use nalgebra::{Matrix3, Point2, Point3, Rotation3, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Board pose in the camera frame: `p_cam = rotation * p_board + translation`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoardPose {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
}

impl BoardPose {
    /// Pose that puts the board center at `center_cam` with the given tilt.
    pub fn looking_at(spec: &CheckerboardSpec, euler: [f64; 3], center_cam: Vector3<f64>) -> Self {
        let rotation = *Rotation3::from_euler_angles(euler[0], euler[1], euler[2]).matrix();
        let s = spec.square_size_mm;
        let center_board = Vector3::new(
            0.5 * (spec.cols - 1) as f64 * s,
            0.5 * (spec.rows - 1) as f64 * s,
            0.0,
        );
        Self {
            rotation,
            translation: center_cam - rotation * center_board,
        }
    }

    pub fn apply(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.rotation * p.coords + self.translation)
    }
}

/// `n` deterministic board poses 0.35-0.55 m in front of the camera.
///
/// Tilts reach about 34° around both image axes and the board wanders over
/// the frame, so focal length and principal point stay well constrained
/// even with noisy corners.
pub fn orbit_poses(spec: &CheckerboardSpec, n: usize) -> Vec<BoardPose> {
    (0..n)
        .map(|k| {
            let theta = 2.0 * std::f64::consts::PI * k as f64 / n as f64 + 0.3;
            let euler = [
                0.6 * theta.sin(),
                0.6 * (3.0 * theta).cos(),
                0.3 * (2.0 * theta).sin(),
            ];
            let depth = 450.0 + 100.0 * (5.0 * theta).sin();
            let center = Vector3::new(
                0.2 * depth * (2.0 * theta).cos(),
                0.08 * depth * (7.0 * theta).sin(),
                depth,
            );
            BoardPose::looking_at(spec, euler, center)
        })
        .collect()
}

/// Project all board corners. `None` if any corner leaves the image.
pub fn project_board(
    camera: &CameraIntrinsics,
    spec: &CheckerboardSpec,
    pose: &BoardPose,
) -> Option<CornerObservation> {
    let w = camera.image_size.width as f64;
    let h = camera.image_size.height as f64;
    let mut points = Vec::with_capacity(spec.corner_count());
    for p in spec.object_points() {
        let px = camera.project(&pose.apply(&p))?;
        if px.x < 0.0 || px.y < 0.0 || px.x >= w || px.y >= h {
            return None;
        }
        points.push(px);
    }
    CornerObservation::new(points, spec)
}

/// Add zero-mean uniform noise with standard deviation `sigma` to every coordinate.
pub fn add_noise(
    obs: &CornerObservation,
    spec: &CheckerboardSpec,
    sigma: f64,
    rng: &mut impl Rng,
) -> CornerObservation {
    let a = sigma * 3.0f64.sqrt();
    let points = obs
        .points()
        .iter()
        .map(|p| Point2::new(p.x + rng.gen_range(-a..=a), p.y + rng.gen_range(-a..=a)))
        .collect();
    CornerObservation::new(points, spec).unwrap_or_else(|| obs.clone())
}

/// A trial of `n` frames of the board orbiting in front of `camera`,
/// optionally with per-coordinate noise `(sigma, seed)`.
pub fn synthetic_trial(
    camera: &CameraIntrinsics,
    spec: &CheckerboardSpec,
    n: usize,
    noise: Option<(f64, u64)>,
) -> TrialObservations {
    let mut rng = noise.map(|(_, seed)| StdRng::seed_from_u64(seed));
    let mut trial = TrialObservations::new(camera.image_size);
    for pose in orbit_poses(spec, n) {
        let obs = project_board(camera, spec, &pose);
        let obs = match (obs, noise, rng.as_mut()) {
            (Some(o), Some((sigma, _)), Some(rng)) => Some(add_noise(&o, spec, sigma, rng)),
            (o, _, _) => o,
        };
        trial.frames.push(obs);
    }
    trial
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ImageSize;

    #[test]
    fn orbit_keeps_the_board_in_view() {
        let spec = CheckerboardSpec::new(9, 6, 25.0).unwrap();
        let cam = CameraIntrinsics::pinhole(1000.0, 1000.0, 640.0, 360.0, ImageSize::new(1280, 720));
        let trial = synthetic_trial(&cam, &spec, 60, None);
        assert_eq!(60, trial.frames.len());
        assert_eq!(60, trial.valid_count(&spec));

        let small = CameraIntrinsics::pinhole(800.0, 800.0, 480.0, 270.0, ImageSize::new(960, 540));
        for n in [3, 10, 30] {
            assert_eq!(n, synthetic_trial(&small, &spec, n, None).valid_count(&spec));
        }
    }

    #[test]
    fn orbit_varies_depth_and_tilt() {
        let spec = CheckerboardSpec::new(9, 6, 25.0).unwrap();
        let poses = orbit_poses(&spec, 60);
        let depths: Vec<f64> = poses.iter().map(|p| p.apply(&Point3::origin()).z).collect();
        let spread = depths.iter().cloned().fold(f64::MIN, f64::max)
            - depths.iter().cloned().fold(f64::MAX, f64::min);
        assert!(spread > 150.0, "depth spread {spread}");
        let max_tilt = poses
            .iter()
            .map(|p| p.rotation[(2, 2)].clamp(-1.0, 1.0).acos())
            .fold(0.0f64, f64::max);
        assert!(max_tilt > 0.5, "max tilt {max_tilt}");
    }

    #[test]
    fn noise_is_seeded() {
        let spec = CheckerboardSpec::new(9, 6, 25.0).unwrap();
        let cam = CameraIntrinsics::pinhole(1000.0, 1000.0, 640.0, 360.0, ImageSize::new(1280, 720));
        let a = synthetic_trial(&cam, &spec, 5, Some((0.5, 7)));
        let b = synthetic_trial(&cam, &spec, 5, Some((0.5, 7)));
        let clean = synthetic_trial(&cam, &spec, 5, None);
        assert_eq!(a, b);
        assert_ne!(a, clean);
    }
}
