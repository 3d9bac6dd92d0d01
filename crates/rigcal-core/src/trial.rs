//! Per-trial estimates and their comparison against the aggregate.

use crate::{CameraIntrinsics, Distortion};
use serde::{Deserialize, Serialize};

/// What a recorded trial is used for.
///
/// Assigned explicitly when the trial manifest is created.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrialRole {
    /// Checkerboard moved through the view; feeds intrinsic estimation.
    #[default]
    Intrinsics,
    /// Stationary checkerboard at the session's world origin; feeds pose recovery.
    Extrinsics,
    /// Static capture without calibration content.
    Static,
}

/// Intrinsic estimate from a single trial.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub trial_id: String,
    pub intrinsics: CameraIntrinsics,
    /// Number of valid corner observations the fit was solved on.
    pub observations_used: usize,
}

/// Signed deviation of one trial from the aggregate.
///
/// Focal lengths and principal point are relative (`(trial - mean) / |mean|`);
/// distortion coefficients and reprojection error are absolute differences.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrialDeviation {
    pub trial_id: String,
    pub observations_used: usize,
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub distortion: [f64; Distortion::LEN],
    /// Trial RMS minus mean RMS, in pixels.
    pub reprojection_error: f64,
}

impl TrialDeviation {
    /// Largest relative deviation over fx, fy, cx, cy.
    pub fn max_relative(&self) -> f64 {
        [self.fx, self.fy, self.cx, self.cy]
            .iter()
            .fold(0.0f64, |m, v| m.max(v.abs()))
    }
}

/// Thresholds for flagging a trial as an outlier. Diagnostic only.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparisonTolerance {
    /// Maximum |relative deviation| on fx, fy, cx, cy.
    pub relative: f64,
    /// Maximum excess of a trial's RMS over the mean RMS, in pixels.
    pub reprojection_px: f64,
}

impl Default for ComparisonTolerance {
    fn default() -> Self {
        Self {
            relative: 0.05,
            reprojection_px: 0.1,
        }
    }
}

/// Per-trial deviations from one aggregation run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntrinsicComparison {
    pub mean: CameraIntrinsics,
    pub trials: Vec<TrialDeviation>,
}

impl IntrinsicComparison {
    pub fn is_flagged(deviation: &TrialDeviation, tol: &ComparisonTolerance) -> bool {
        deviation.max_relative() > tol.relative
            || deviation.reprojection_error > tol.reprojection_px
    }

    /// Trial ids whose deviation exceeds `tol`.
    pub fn flagged(&self, tol: &ComparisonTolerance) -> Vec<&str> {
        self.trials
            .iter()
            .filter(|d| Self::is_flagged(d, tol))
            .map(|d| d.trial_id.as_str())
            .collect()
    }

    pub fn deviation(&self, trial_id: &str) -> Option<&TrialDeviation> {
        self.trials.iter().find(|d| d.trial_id == trial_id)
    }
}
