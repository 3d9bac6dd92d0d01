//! Pose of a calibrated camera relative to a known point set.

use crate::lm::{self, BlockProblem, LmOptions};
use nalgebra::{DVector, Matrix3, Point2, Point3, Rotation3, Vector3};
use rigcal_core::{estimate_homography, project_to_rotation, CameraIntrinsics, Homography};

/// Rigid transform `p_cam = rotation * p + translation`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RigidPose {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
}

impl RigidPose {
    #[inline]
    pub fn apply(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.rotation * p.coords + self.translation)
    }

    pub(crate) fn to_params(self) -> [f64; 6] {
        let w = Rotation3::from_matrix_unchecked(self.rotation).scaled_axis();
        let t = self.translation;
        [w.x, w.y, w.z, t.x, t.y, t.z]
    }

    pub(crate) fn from_params(p: &[f64]) -> Self {
        Self {
            rotation: *Rotation3::new(Vector3::new(p[0], p[1], p[2])).matrix(),
            translation: Vector3::new(p[3], p[4], p[5]),
        }
    }
}

/// Decompose a board-to-image homography into a pose, assuming the board
/// lies on `z = 0`. The camera ends up in front of the board (`t.z > 0`).
pub fn planar_pose_from_homography(k: &Matrix3<f64>, h: &Matrix3<f64>) -> Option<RigidPose> {
    let k_inv = k.try_inverse()?;
    let h1 = k_inv * h.column(0);
    let h2 = k_inv * h.column(1);
    let h3 = k_inv * h.column(2);

    let norm1 = h1.norm();
    let norm2 = h2.norm();
    if norm1 <= 1e-12 || norm2 <= 1e-12 {
        return None;
    }
    let lambda = 2.0 / (norm1 + norm2);

    let mut r1 = lambda * h1;
    let mut r2 = lambda * h2;
    let mut t = lambda * h3;
    if t.z < 0.0 {
        r1 = -r1;
        r2 = -r2;
        t = -t;
    }
    let r3 = r1.cross(&r2);
    if r3.norm() <= 1e-12 {
        return None;
    }
    let rotation = project_to_rotation(&Matrix3::from_columns(&[r1, r2, r3]))?;
    Some(RigidPose {
        rotation,
        translation: t,
    })
}

/// Pixel reprojection residuals of one pose against known points.
struct PoseProblem<'a> {
    camera: &'a CameraIntrinsics,
    points: &'a [Point3<f64>],
    pixels: &'a [Point2<f64>],
}

impl BlockProblem for PoseProblem<'_> {
    fn num_params(&self) -> usize {
        6
    }

    fn num_blocks(&self) -> usize {
        self.points.len()
    }

    fn block_params(&self, _block: usize) -> Vec<usize> {
        (0..6).collect()
    }

    fn block_residuals(&self, block: usize, params: &DVector<f64>) -> Option<DVector<f64>> {
        let pose = RigidPose::from_params(params.as_slice());
        let px = self.camera.project(&pose.apply(&self.points[block]))?;
        let obs = self.pixels[block];
        Some(DVector::from_vec(vec![px.x - obs.x, px.y - obs.y]))
    }
}

/// Refine `initial` by minimising pixel reprojection error.
pub fn refine_pose(
    camera: &CameraIntrinsics,
    points: &[Point3<f64>],
    pixels: &[Point2<f64>],
    initial: RigidPose,
    options: &LmOptions,
) -> Option<RigidPose> {
    let problem = PoseProblem {
        camera,
        points,
        pixels,
    };
    let mut params = DVector::from_row_slice(&initial.to_params());
    lm::minimize(&problem, &mut params, options)?;
    Some(RigidPose::from_params(params.as_slice()))
}

/// Board pose from one detection with known intrinsics.
///
/// `board` holds the planar (`z = 0`) target coordinates matching `pixels`.
/// Pixels are undistorted first, so the linear initialisation already
/// accounts for lens distortion before the pose is refined.
pub fn solve_planar_pose(
    camera: &CameraIntrinsics,
    board: &[Point2<f64>],
    pixels: &[Point2<f64>],
    options: &LmOptions,
) -> Option<RigidPose> {
    let normalized: Vec<Point2<f64>> = pixels
        .iter()
        .map(|p| Point2::from(camera.undistort_pixel(p)))
        .collect();
    let h: Homography = estimate_homography(board, &normalized).ok()?;
    let initial = planar_pose_from_homography(&Matrix3::identity(), &h.h)?;
    let points: Vec<Point3<f64>> = board.iter().map(|p| Point3::new(p.x, p.y, 0.0)).collect();
    refine_pose(camera, &points, pixels, initial, options)
}

/// RMS pixel distance between projected `points` and `pixels`.
pub fn reprojection_rms(
    camera: &CameraIntrinsics,
    pose: &RigidPose,
    points: &[Point3<f64>],
    pixels: &[Point2<f64>],
) -> Option<f64> {
    let (sum, n) = sq_residual_sum(camera, pose, points, pixels)?;
    (n > 0).then(|| (sum / n as f64).sqrt())
}

/// Sum of squared pixel distances and the number of points.
pub(crate) fn sq_residual_sum(
    camera: &CameraIntrinsics,
    pose: &RigidPose,
    points: &[Point3<f64>],
    pixels: &[Point2<f64>],
) -> Option<(f64, usize)> {
    let mut sum = 0.0;
    for (p, obs) in points.iter().zip(pixels) {
        let px = camera.project(&pose.apply(p))?;
        sum += (px - obs).norm_squared();
    }
    Some((sum, points.len()))
}
