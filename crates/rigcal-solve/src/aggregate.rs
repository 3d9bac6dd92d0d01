//! Equal-weight averaging of per-trial intrinsics.

use crate::error::AggregateError;
use log::{info, warn};
use rigcal_core::{
    CameraIntrinsics, ComparisonTolerance, Distortion, IntrinsicComparison, TrialDeviation,
    TrialResult,
};

fn relative(value: f64, mean: f64) -> f64 {
    if mean.abs() > f64::EPSILON {
        (value - mean) / mean.abs()
    } else {
        value - mean
    }
}

/// Average trials of one camera into a single estimate.
///
/// Every trial weighs the same regardless of how many detections it used.
/// All trials must share one image size; this is checked before any
/// averaging. The result does not depend on the order of `results`, and
/// identical trials average to exactly that trial's parameters.
pub fn aggregate_trials(results: &[TrialResult]) -> Result<IntrinsicComparison, AggregateError> {
    let mut sorted: Vec<&TrialResult> = results.iter().collect();
    sorted.sort_by(|a, b| a.trial_id.cmp(&b.trial_id));
    let first = sorted.first().ok_or(AggregateError::NoTrials)?;

    let expected = first.intrinsics.image_size;
    if let Some(bad) = sorted.iter().find(|r| r.intrinsics.image_size != expected) {
        return Err(AggregateError::ImageSizeMismatch {
            trial: bad.trial_id.clone(),
            expected,
            got: bad.intrinsics.image_size,
        });
    }

    // Running mean: m_k = m_{k-1} + (x_k - m_{k-1}) / k
    let mut m = [0.0f64; 4 + Distortion::LEN + 1];
    for (k, r) in sorted.iter().enumerate() {
        let c = &r.intrinsics;
        let d = c.distortion.to_array();
        let x = [
            c.fx, c.fy, c.cx, c.cy, d[0], d[1], d[2], d[3], d[4], c.reprojection_error,
        ];
        let n = (k + 1) as f64;
        for (mi, xi) in m.iter_mut().zip(x) {
            *mi += (xi - *mi) / n;
        }
    }

    let mean = CameraIntrinsics {
        fx: m[0],
        fy: m[1],
        cx: m[2],
        cy: m[3],
        distortion: Distortion::from_array([m[4], m[5], m[6], m[7], m[8]]),
        image_size: expected,
        reprojection_error: m[9],
    };

    let mean_d = mean.distortion.to_array();
    let trials = sorted
        .iter()
        .map(|r| {
            let c = &r.intrinsics;
            let d = c.distortion.to_array();
            let mut distortion = [0.0; Distortion::LEN];
            for k in 0..Distortion::LEN {
                distortion[k] = d[k] - mean_d[k];
            }
            TrialDeviation {
                trial_id: r.trial_id.clone(),
                observations_used: r.observations_used,
                fx: relative(c.fx, mean.fx),
                fy: relative(c.fy, mean.fy),
                cx: relative(c.cx, mean.cx),
                cy: relative(c.cy, mean.cy),
                distortion,
                reprojection_error: c.reprojection_error - mean.reprojection_error,
            }
        })
        .collect();

    info!(
        "aggregated {} trials: fx={:.2} fy={:.2} cx={:.2} cy={:.2} rms={:.4}px",
        sorted.len(),
        mean.fx,
        mean.fy,
        mean.cx,
        mean.cy,
        mean.reprojection_error
    );
    Ok(IntrinsicComparison { mean, trials })
}

/// Log a warning for every trial outside `tol`. Returns the flagged ids.
pub fn report_outliers(comparison: &IntrinsicComparison, tol: &ComparisonTolerance) -> Vec<String> {
    comparison
        .trials
        .iter()
        .filter(|d| IntrinsicComparison::is_flagged(d, tol))
        .map(|d| {
            warn!(
                "trial {} deviates: max relative {:.4} (tol {:.4}), rms excess {:.4}px (tol {:.4})",
                d.trial_id,
                d.max_relative(),
                tol.relative,
                d.reprojection_error,
                tol.reprojection_px
            );
            d.trial_id.clone()
        })
        .collect()
}
