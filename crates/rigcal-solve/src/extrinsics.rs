//! Camera pose against a checkerboard placed at a known world position.

use crate::error::ExtrinsicsError;
use crate::lm::LmOptions;
use crate::pose::{planar_pose_from_homography, refine_pose, reprojection_rms, RigidPose};
use log::{debug, info, warn};
use nalgebra::{Matrix3, Point2, Point3, Vector3};
use rigcal_core::{
    chordal_mean, estimate_homography, rotation_angle_between, CameraExtrinsics,
    CameraIntrinsics, CheckerboardSpec, TrialObservations,
};
use serde::{Deserialize, Serialize};
use std::fmt;

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtrinsicOptions {
    /// Detections solved and averaged, taken from the start of the input.
    pub max_samples: usize,
    /// Pairwise rotation spread above this raises a warning (degrees).
    pub rotation_tolerance_deg: f64,
    /// Pairwise translation spread above this raises a warning (mm).
    pub translation_tolerance_mm: f64,
    /// Minimal angle between the board plane and the ray to its centre (degrees).
    pub min_view_angle_deg: f64,
    pub solver: LmOptions,
}

impl Default for ExtrinsicOptions {
    fn default() -> Self {
        Self {
            max_samples: 5,
            rotation_tolerance_deg: 1.0,
            translation_tolerance_mm: 10.0,
            min_view_angle_deg: 5.0,
            solver: LmOptions::default(),
        }
    }
}

/// Disagreement between two per-detection poses. Never fatal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConsistencyWarning {
    RotationSpread {
        first: usize,
        second: usize,
        degrees: f64,
    },
    TranslationSpread {
        first: usize,
        second: usize,
        millimeters: f64,
    },
}

impl fmt::Display for ConsistencyWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RotationSpread {
                first,
                second,
                degrees,
            } => write!(
                f,
                "detections {first} and {second} disagree by {degrees:.3} deg in rotation"
            ),
            Self::TranslationSpread {
                first,
                second,
                millimeters,
            } => write!(
                f,
                "detections {first} and {second} disagree by {millimeters:.2} mm in translation"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtrinsicsSolution {
    pub extrinsics: CameraExtrinsics,
    /// Frame indices of the detections that were averaged.
    pub frames_used: Vec<usize>,
    /// Mean RMS reprojection error of the averaged detections.
    pub reprojection_error: f64,
    pub warnings: Vec<ConsistencyWarning>,
}

/// Orthonormal frame of a planar point set: origin, in-plane axes and normal.
struct PlaneFrame {
    origin: Vector3<f64>,
    basis: Matrix3<f64>,
}

impl PlaneFrame {
    fn fit(points: &[Point3<f64>]) -> Result<Self, ExtrinsicsError> {
        let n = points.len() as f64;
        let origin = points.iter().fold(Vector3::zeros(), |acc, p| acc + p.coords) / n;
        let scatter = points.iter().fold(Matrix3::zeros(), |acc, p| {
            let d = p.coords - origin;
            acc + d * d.transpose()
        });
        let eig = scatter.symmetric_eigen();
        let mut order = [0usize, 1, 2];
        order.sort_by(|&a, &b| eig.eigenvalues[b].total_cmp(&eig.eigenvalues[a]));
        let (l_max, l_min) = (eig.eigenvalues[order[0]], eig.eigenvalues[order[2]]);
        if l_max <= 0.0 || eig.eigenvalues[order[1]] <= 1e-12 * l_max {
            return Err(ExtrinsicsError::NonPlanarTarget);
        }
        if (l_min.max(0.0) / l_max).sqrt() > 1e-3 {
            return Err(ExtrinsicsError::NonPlanarTarget);
        }
        let e1 = eig.eigenvectors.column(order[0]).into_owned();
        let e2 = eig.eigenvectors.column(order[1]).into_owned();
        let e3 = e1.cross(&e2);
        Ok(Self {
            origin,
            basis: Matrix3::from_columns(&[e1, e2, e3]),
        })
    }

    fn to_plane(&self, p: &Point3<f64>) -> Point2<f64> {
        let q = self.basis.transpose() * (p.coords - self.origin);
        Point2::new(q.x, q.y)
    }
}

/// Pose of the camera in the world frame of `world_points` from one detection.
fn solve_single(
    camera: &CameraIntrinsics,
    world_points: &[Point3<f64>],
    plane: &PlaneFrame,
    pixels: &[Point2<f64>],
    options: &ExtrinsicOptions,
) -> Result<(RigidPose, f64), ExtrinsicsError> {
    let plane_points: Vec<Point2<f64>> = world_points.iter().map(|p| plane.to_plane(p)).collect();
    let normalized: Vec<Point2<f64>> = pixels
        .iter()
        .map(|p| Point2::from(camera.undistort_pixel(p)))
        .collect();
    let h = estimate_homography(&plane_points, &normalized)
        .map_err(|e| ExtrinsicsError::PoseDegenerate(e.to_string()))?;
    let board_pose = planar_pose_from_homography(&Matrix3::identity(), &h.h)
        .ok_or_else(|| ExtrinsicsError::PoseDegenerate("homography does not decompose".into()))?;

    // World -> plane -> camera.
    let rotation = board_pose.rotation * plane.basis.transpose();
    let initial = RigidPose {
        rotation,
        translation: board_pose.translation - rotation * plane.origin,
    };
    let pose = refine_pose(camera, world_points, pixels, initial, &options.solver)
        .ok_or_else(|| ExtrinsicsError::PoseDegenerate("refinement diverged".into()))?;

    let centre = pose.rotation * plane.origin + pose.translation;
    if centre.z <= 0.0 {
        return Err(ExtrinsicsError::PoseDegenerate(
            "checkerboard is behind the camera".into(),
        ));
    }
    let normal = pose.rotation * plane.basis.column(2);
    let sin_view = normal.dot(&centre.normalize()).abs();
    if sin_view < options.min_view_angle_deg.to_radians().sin() {
        return Err(ExtrinsicsError::PoseDegenerate(format!(
            "checkerboard plane within {:.2} deg of the viewing ray",
            sin_view.asin().to_degrees()
        )));
    }
    let rms = reprojection_rms(camera, &pose, world_points, pixels)
        .ok_or_else(|| ExtrinsicsError::PoseDegenerate("points project behind camera".into()))?;
    Ok((pose, rms))
}

fn consistency_warnings(
    frames: &[usize],
    poses: &[RigidPose],
    options: &ExtrinsicOptions,
) -> Vec<ConsistencyWarning> {
    let mut warnings = Vec::new();
    for a in 0..poses.len() {
        for b in a + 1..poses.len() {
            let degrees = rotation_angle_between(&poses[a].rotation, &poses[b].rotation).to_degrees();
            if degrees > options.rotation_tolerance_deg {
                warnings.push(ConsistencyWarning::RotationSpread {
                    first: frames[a],
                    second: frames[b],
                    degrees,
                });
            }
            // Compare camera centres so the check is in world units.
            let ca = -(poses[a].rotation.transpose() * poses[a].translation);
            let cb = -(poses[b].rotation.transpose() * poses[b].translation);
            let millimeters = (ca - cb).norm();
            if millimeters > options.translation_tolerance_mm {
                warnings.push(ConsistencyWarning::TranslationSpread {
                    first: frames[a],
                    second: frames[b],
                    millimeters,
                });
            }
        }
    }
    warnings
}

/// Recover the camera pose in `reference_frame` from a stationary capture.
///
/// `world_points` are the checkerboard's inner corners in world
/// coordinates, row-major like the detections. Up to
/// `options.max_samples` detections are solved independently; their
/// rotations are combined with the chordal L2 mean and their translations
/// averaged. Pairwise disagreement beyond tolerance is returned as warnings.
#[cfg_attr(feature = "tracing", instrument(level = "info", skip_all, fields(frame = reference_frame)))]
pub fn solve_extrinsics(
    camera: &CameraIntrinsics,
    trial: &TrialObservations,
    spec: &CheckerboardSpec,
    world_points: &[Point3<f64>],
    reference_frame: &str,
    options: &ExtrinsicOptions,
) -> Result<ExtrinsicsSolution, ExtrinsicsError> {
    if world_points.len() != spec.corner_count() {
        return Err(ExtrinsicsError::WorldPointMismatch {
            expected: spec.corner_count(),
            got: world_points.len(),
        });
    }
    let plane = PlaneFrame::fit(world_points)?;

    let mut frames = Vec::new();
    let mut poses = Vec::new();
    let mut rms_sum = 0.0;
    let mut first_error = None;
    for (frame, obs) in trial.valid(spec).take(options.max_samples.max(1)) {
        match solve_single(camera, world_points, &plane, obs.points(), options) {
            Ok((pose, rms)) => {
                debug!("extrinsics frame {frame}: rms {rms:.4}px");
                frames.push(frame);
                poses.push(pose);
                rms_sum += rms;
            }
            Err(e) => {
                warn!("extrinsics frame {frame}: {e}");
                first_error.get_or_insert(e);
            }
        }
    }

    if poses.is_empty() {
        return Err(first_error.unwrap_or(ExtrinsicsError::NoDetection));
    }

    let rotations: Vec<Matrix3<f64>> = poses.iter().map(|p| p.rotation).collect();
    let rotation = chordal_mean(&rotations)
        .ok_or_else(|| ExtrinsicsError::PoseDegenerate("rotation average failed".into()))?;
    let translation =
        poses.iter().fold(Vector3::zeros(), |acc, p| acc + p.translation) / poses.len() as f64;

    let warnings = consistency_warnings(&frames, &poses, options);
    for w in &warnings {
        warn!("{w}");
    }

    let extrinsics = CameraExtrinsics::new(rotation, translation, reference_frame)?;
    let reprojection_error = rms_sum / poses.len() as f64;
    info!(
        "extrinsics from {} detections, camera centre {:?}, rms {:.4}px",
        poses.len(),
        extrinsics.camera_center().coords.as_slice(),
        reprojection_error
    );
    Ok(ExtrinsicsSolution {
        extrinsics,
        frames_used: frames,
        reprojection_error,
        warnings,
    })
}
