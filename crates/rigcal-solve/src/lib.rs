//! Numerical core of rig calibration.
//!
//! - [`estimate_trial`]: intrinsics and distortion of one trial, from
//!   evenly subsampled detections (closed-form init + LM refinement).
//! - [`aggregate_trials`]: equal-weight average of several trials with
//!   per-trial deviations for outlier inspection.
//! - [`solve_extrinsics`]: camera pose against a checkerboard at a known
//!   world position, averaged over a few detections.
//!
//! ```no_run
//! use rigcal_core::{synthetic, CameraIntrinsics, CheckerboardSpec, ImageSize};
//! use rigcal_solve::{estimate_trial, IntrinsicOptions};
//!
//! let spec = CheckerboardSpec::new(9, 6, 25.0).unwrap();
//! let camera = CameraIntrinsics::pinhole(1000.0, 1000.0, 640.0, 360.0, ImageSize::new(1280, 720));
//! let trial = synthetic::synthetic_trial(&camera, &spec, 60, None);
//! let result = estimate_trial("trial-1", &trial, &spec, &IntrinsicOptions::default()).unwrap();
//! println!("fx = {:.2}", result.intrinsics.fx);
//! ```

mod aggregate;
mod bundle;
mod error;
mod extrinsics;
mod intrinsics;
pub mod lm;
mod pose;
mod zhang;

pub use aggregate::{aggregate_trials, report_outliers};
pub use bundle::{refine_intrinsics, BundleResult, DistortionMask};
pub use error::{AggregateError, EstimateError, ExtrinsicsError};
pub use extrinsics::{solve_extrinsics, ConsistencyWarning, ExtrinsicOptions, ExtrinsicsSolution};
pub use intrinsics::{estimate_trial, evenly_spaced, IntrinsicOptions};
pub use lm::{LmOptions, LmSummary};
pub use pose::{
    planar_pose_from_homography, refine_pose, reprojection_rms, solve_planar_pose, RigidPose,
};
pub use zhang::intrinsics_from_homographies;
