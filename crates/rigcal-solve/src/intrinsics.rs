//! Single-trial intrinsic estimation.

use crate::bundle::{refine_intrinsics, DistortionMask};
use crate::error::EstimateError;
use crate::lm::LmOptions;
use crate::pose::{planar_pose_from_homography, solve_planar_pose, sq_residual_sum, RigidPose};
use crate::zhang::intrinsics_from_homographies;
use log::{debug, info, warn};
use nalgebra::{Point2, Point3};
use rigcal_core::{
    estimate_homography, CameraIntrinsics, CheckerboardSpec, CornerObservation, Distortion,
    TrialObservations, TrialResult,
};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntrinsicOptions {
    /// Upper bound on the number of detections the fit is solved on.
    pub target_samples: usize,
    /// Fewer valid detections than this fail the trial.
    pub min_observations: usize,
    pub fix_k3: bool,
    pub fix_tangential: bool,
    /// How far outside the image (as a fraction of its size) the principal
    /// point may land before the fit counts as ill-conditioned.
    pub principal_point_margin: f64,
    pub solver: LmOptions,
}

impl Default for IntrinsicOptions {
    fn default() -> Self {
        Self {
            target_samples: 50,
            min_observations: 10,
            fix_k3: false,
            fix_tangential: false,
            principal_point_margin: 0.5,
            solver: LmOptions::default(),
        }
    }
}

/// `m` indices spread evenly over `0..n`, first and last included.
pub fn evenly_spaced(n: usize, m: usize) -> Vec<usize> {
    if m == 0 || n == 0 {
        return Vec::new();
    }
    if m >= n {
        return (0..n).collect();
    }
    if m == 1 {
        return vec![0];
    }
    (0..m)
        .map(|k| ((k * (n - 1)) as f64 / (m - 1) as f64).round() as usize)
        .collect()
}

fn check_conditioning(camera: &CameraIntrinsics, margin: f64) -> Result<(), EstimateError> {
    if !camera.is_physical() {
        return Err(EstimateError::IllConditioned(format!(
            "non-physical parameters fx={:.3} fy={:.3}",
            camera.fx, camera.fy
        )));
    }
    let w = camera.image_size.width as f64;
    let h = camera.image_size.height as f64;
    let inside = |v: f64, size: f64| v >= -margin * size && v <= (1.0 + margin) * size;
    if !inside(camera.cx, w) || !inside(camera.cy, h) {
        return Err(EstimateError::IllConditioned(format!(
            "principal point ({:.1}, {:.1}) outside image {}",
            camera.cx, camera.cy, camera.image_size
        )));
    }
    Ok(())
}

/// Fit intrinsics to one trial.
///
/// Up to `target_samples` detections spread evenly over the whole trial
/// are used for the fit; the reported RMS covers every valid detection.
#[cfg_attr(feature = "tracing", instrument(level = "info", skip(trial, spec, options), fields(frames = trial.frames.len())))]
pub fn estimate_trial(
    trial_id: &str,
    trial: &TrialObservations,
    spec: &CheckerboardSpec,
    options: &IntrinsicOptions,
) -> Result<TrialResult, EstimateError> {
    let valid: Vec<&CornerObservation> = trial.valid(spec).map(|(_, obs)| obs).collect();
    let required = options.min_observations.max(3);
    if valid.len() < required {
        return Err(EstimateError::InsufficientObservations {
            found: valid.len(),
            required,
        });
    }
    let image_size = trial.image_size.ok_or(EstimateError::MissingImageSize)?;

    let sample_count = options.target_samples.max(3);
    let sampled_idx = evenly_spaced(valid.len(), sample_count);
    info!(
        "trial {trial_id}: {} valid detections of {} frames, fitting on {}",
        valid.len(),
        trial.frames.len(),
        sampled_idx.len()
    );

    let board = spec.board_points();
    let object = spec.object_points();
    let views: Vec<&[Point2<f64>]> = sampled_idx.iter().map(|&k| valid[k].points()).collect();

    let homographies = views
        .iter()
        .map(|px| estimate_homography(&board, px))
        .collect::<Result<Vec<_>, _>>()?;
    let k = intrinsics_from_homographies(&homographies, image_size)?;
    let initial = CameraIntrinsics::from_camera_matrix(&k, Distortion::default(), image_size, 0.0);
    check_conditioning(&initial, options.principal_point_margin)?;
    debug!(
        "trial {trial_id}: closed-form fx={:.2} fy={:.2} cx={:.2} cy={:.2}",
        initial.fx, initial.fy, initial.cx, initial.cy
    );

    let poses = homographies
        .iter()
        .map(|h| planar_pose_from_homography(&k, &h.h))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| EstimateError::IllConditioned("degenerate view homography".into()))?;

    let mask = DistortionMask {
        fix_k3: options.fix_k3,
        fix_tangential: options.fix_tangential,
    };
    let bundle = refine_intrinsics(&initial, &poses, &object, &views, mask, &options.solver)
        .ok_or_else(|| EstimateError::IllConditioned("refinement left the valid domain".into()))?;
    debug!("trial {trial_id}: refinement {}", bundle.summary);

    let mut camera = bundle.camera;
    check_conditioning(&camera, options.principal_point_margin)?;

    let rms = trial_rms(&camera, &object, &board, &valid, &sampled_idx, &bundle.poses, &options.solver)
        .ok_or_else(|| EstimateError::IllConditioned("no observation reprojects".into()))?;
    camera.reprojection_error = rms;
    info!(
        "trial {trial_id}: fx={:.2} fy={:.2} cx={:.2} cy={:.2} rms={:.4}px",
        camera.fx, camera.fy, camera.cx, camera.cy, rms
    );

    Ok(TrialResult {
        trial_id: trial_id.to_string(),
        intrinsics: camera,
        observations_used: sampled_idx.len(),
    })
}

/// RMS over every valid detection: sampled views reuse their refined pose,
/// the others get a pose solved against the final intrinsics.
fn trial_rms(
    camera: &CameraIntrinsics,
    object: &[Point3<f64>],
    board: &[Point2<f64>],
    valid: &[&CornerObservation],
    sampled_idx: &[usize],
    sampled_poses: &[RigidPose],
    solver: &LmOptions,
) -> Option<f64> {
    let mut sum = 0.0;
    let mut count = 0usize;
    let mut next_sampled = sampled_idx.iter().zip(sampled_poses).peekable();

    for (k, obs) in valid.iter().enumerate() {
        let pose = match next_sampled.peek() {
            Some(&(idx, pose)) if *idx == k => {
                let pose = *pose;
                next_sampled.next();
                Some(pose)
            }
            _ => solve_planar_pose(camera, board, obs.points(), solver),
        };
        let Some(pose) = pose else {
            warn!("detection {k}: pose not recoverable, left out of the RMS");
            continue;
        };
        if let Some((s, n)) = sq_residual_sum(camera, &pose, object, obs.points()) {
            sum += s;
            count += n;
        }
    }
    (count > 0).then(|| (sum / count as f64).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampling_spans_the_whole_trial() {
        assert_eq!(evenly_spaced(10, 4), vec![0, 3, 6, 9]);
        assert_eq!(evenly_spaced(5, 10), vec![0, 1, 2, 3, 4]);
        assert_eq!(evenly_spaced(100, 1), vec![0]);
        let idx = evenly_spaced(60, 50);
        assert_eq!(idx.len(), 50);
        assert_eq!(idx[0], 0);
        assert_eq!(*idx.last().unwrap(), 59);
        assert!(idx.windows(2).all(|w| w[0] < w[1]));
    }
}
