//! Calibration runs for one camera, and for many cameras at once.
//!
//! Inputs are per-frame detections grouped into trials; each trial carries a
//! typed [`TrialRole`] from its manifest entry. Intrinsic runs estimate every
//! intrinsics trial independently, aggregate them once all are done and
//! store the result with its audit records. Extrinsic runs read the stored
//! intrinsics back and solve the session pose.

use crate::config::CalibrationConfig;
use crate::error::CalibrationError;
use log::{info, warn};
use rayon::prelude::*;
use rigcal_core::{
    CameraIntrinsics, CheckerboardSpec, DeploymentKey, IntrinsicComparison, SessionCameraKey,
    TrialObservations, TrialResult, TrialRole,
};
use rigcal_solve::{
    aggregate_trials, estimate_trial, report_outliers, solve_extrinsics, AggregateError,
    EstimateError, ExtrinsicsSolution,
};
use rigcal_store::{CalibrationStore, TrialEntry, TrialManifest};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// One recorded trial: its manifest entry and its per-frame detections.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub entry: TrialEntry,
    pub observations: TrialObservations,
}

impl Trial {
    pub fn new(id: impl Into<String>, role: TrialRole, observations: TrialObservations) -> Self {
        Self {
            entry: TrialEntry::new(id, role),
            observations,
        }
    }

    pub fn id(&self) -> &str {
        &self.entry.id
    }

    pub fn role(&self) -> TrialRole {
        self.entry.role
    }
}

/// Trials in processing order: extrinsics trials first, then the rest as given.
pub fn processing_order(trials: &[Trial]) -> Vec<&Trial> {
    let mut ordered: Vec<&Trial> = trials.iter().collect();
    ordered.sort_by_key(|t| t.role() != TrialRole::Extrinsics);
    ordered
}

/// Intrinsic calibration of one camera model.
#[derive(Clone, Debug)]
pub struct IntrinsicsJob {
    pub camera_model: String,
    /// Deployment profiles that receive the result. The first one also keys
    /// the log output.
    pub profiles: Vec<String>,
    pub checkerboard: CheckerboardSpec,
    pub trials: Vec<Trial>,
}

impl IntrinsicsJob {
    pub fn new(
        config: &CalibrationConfig,
        camera_model: impl Into<String>,
        profiles: Vec<String>,
        trials: Vec<Trial>,
    ) -> Self {
        Self {
            camera_model: camera_model.into(),
            profiles,
            checkerboard: config.checkerboard,
            trials,
        }
    }

    /// Rerun of a stored manifest. `load` supplies the detections of each
    /// listed trial.
    pub fn from_manifest<F>(
        manifest: &TrialManifest,
        profiles: Vec<String>,
        mut load: F,
    ) -> Result<Self, CalibrationError>
    where
        F: FnMut(&TrialEntry) -> Result<TrialObservations, CalibrationError>,
    {
        let trials = manifest
            .trials
            .iter()
            .map(|entry| {
                Ok(Trial {
                    entry: entry.clone(),
                    observations: load(entry)?,
                })
            })
            .collect::<Result<Vec<_>, CalibrationError>>()?;
        Ok(Self {
            camera_model: manifest.camera_model.clone(),
            profiles,
            checkerboard: manifest.checkerboard,
            trials,
        })
    }

    fn primary_key(&self) -> Result<DeploymentKey, CalibrationError> {
        self.profiles
            .first()
            .map(|p| DeploymentKey::new(self.camera_model.clone(), p.clone()))
            .ok_or_else(|| CalibrationError::NoProfile(self.camera_model.clone()))
    }
}

/// Result of an intrinsic run.
#[derive(Debug)]
pub struct IntrinsicsRun {
    pub key: DeploymentKey,
    pub intrinsics: CameraIntrinsics,
    pub comparison: IntrinsicComparison,
    /// Trials whose deviation exceeds the configured tolerance.
    pub flagged: Vec<String>,
    /// Trials that failed estimation and were left out of the average.
    pub skipped: Vec<(String, EstimateError)>,
    /// Intrinsics files written, one per profile.
    pub stored: Vec<PathBuf>,
}

/// Stored manifest of `key`. When `required` is set a missing manifest is a
/// configuration error, otherwise `Ok(None)`.
pub fn load_trial_plan(
    store: &CalibrationStore,
    key: &DeploymentKey,
    required: bool,
) -> Result<Option<TrialManifest>, CalibrationError> {
    match store.get_manifest(key) {
        Ok(manifest) => Ok(Some(manifest)),
        Err(e) if e.is_not_found() && required => Err(CalibrationError::MissingManifest {
            key: key.clone(),
            path: store.manifest_path(key)?,
        }),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// All sized trials must share the first one's resolution. Trials without a
/// detected frame carry no size and are not compared.
fn check_image_sizes(trials: &[&Trial]) -> Result<(), AggregateError> {
    let mut sized = trials
        .iter()
        .filter_map(|t| t.observations.image_size.map(|size| (t.id(), size)));
    let Some((_, expected)) = sized.next() else {
        return Ok(());
    };
    match sized.find(|(_, size)| *size != expected) {
        Some((trial, got)) => Err(AggregateError::ImageSizeMismatch {
            trial: trial.to_string(),
            expected,
            got,
        }),
        None => Ok(()),
    }
}

/// Estimate, aggregate and store the intrinsics of one camera model.
///
/// Trials that fail estimation are skipped; the run fails only when none
/// succeeds. Mismatched image sizes across trials abort the run before
/// anything is written.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip_all, fields(model = %job.camera_model))
)]
pub fn calibrate_intrinsics(
    config: &CalibrationConfig,
    job: &IntrinsicsJob,
    store: &CalibrationStore,
) -> Result<IntrinsicsRun, CalibrationError> {
    let key = job.primary_key()?;
    job.checkerboard.validate()?;

    let trials: Vec<&Trial> = job
        .trials
        .iter()
        .filter(|t| t.role() == TrialRole::Intrinsics)
        .collect();
    if trials.is_empty() {
        return Err(CalibrationError::NoIntrinsicsTrial(key));
    }
    check_image_sizes(&trials)?;

    let estimates: Vec<(String, Result<TrialResult, EstimateError>)> = trials
        .par_iter()
        .map(|t| {
            let res = estimate_trial(t.id(), &t.observations, &job.checkerboard, &config.intrinsics);
            (t.id().to_string(), res)
        })
        .collect();

    let mut results = Vec::with_capacity(estimates.len());
    let mut skipped = Vec::new();
    for (id, res) in estimates {
        match res {
            Ok(r) => results.push(r),
            Err(e) => {
                warn!("{key}: skipping trial {id}: {e}");
                skipped.push((id, e));
            }
        }
    }
    if results.is_empty() {
        return Err(CalibrationError::NoSuccessfulTrial {
            key,
            attempted: trials.len(),
        });
    }

    let comparison = aggregate_trials(&results)?;
    let flagged = report_outliers(&comparison, &config.comparison);
    let intrinsics = comparison.mean;

    let manifest = TrialManifest::new(
        job.camera_model.clone(),
        job.checkerboard,
        job.trials.iter().map(|t| t.entry.clone()).collect(),
    );
    let stored = store.put_intrinsics_run(
        &job.camera_model,
        &job.profiles,
        &intrinsics,
        &comparison,
        config.comparison,
        &manifest,
    )?;

    info!(
        "{key}: {} of {} trials averaged, fx={:.2} fy={:.2} cx={:.2} cy={:.2}, rms {:.3} px",
        results.len(),
        trials.len(),
        intrinsics.fx,
        intrinsics.fy,
        intrinsics.cx,
        intrinsics.cy,
        intrinsics.reprojection_error
    );
    Ok(IntrinsicsRun {
        key,
        intrinsics,
        comparison,
        flagged,
        skipped,
        stored,
    })
}

/// Extrinsic calibration of one session camera.
#[derive(Clone, Debug)]
pub struct ExtrinsicsJob {
    pub session: SessionCameraKey,
    /// Where the camera's intrinsics are stored.
    pub intrinsics: DeploymentKey,
    pub trials: Vec<Trial>,
}

/// Result of an extrinsic run.
#[derive(Debug)]
pub struct ExtrinsicsRun {
    pub key: SessionCameraKey,
    pub trial_id: String,
    pub solution: ExtrinsicsSolution,
    pub stored: PathBuf,
}

/// Solve and store one session camera's pose against its stored intrinsics.
///
/// The first extrinsics trial in processing order is used. Missing stored
/// intrinsics surface as a store `NotFound`; consistency warnings are
/// logged and returned with the solution.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip_all, fields(session = %job.session))
)]
pub fn calibrate_extrinsics(
    config: &CalibrationConfig,
    job: &ExtrinsicsJob,
    store: &CalibrationStore,
) -> Result<ExtrinsicsRun, CalibrationError> {
    let key = &job.session;
    let trial = processing_order(&job.trials)
        .into_iter()
        .find(|t| t.role() == TrialRole::Extrinsics)
        .ok_or_else(|| CalibrationError::NoExtrinsicsTrial(key.clone()))?;

    let intrinsics = store.get_intrinsics(&job.intrinsics)?;
    if let Some(size) = trial.observations.image_size {
        if size != intrinsics.image_size {
            return Err(CalibrationError::IntrinsicsResolution {
                key: key.clone(),
                intrinsics: job.intrinsics.clone(),
                expected: intrinsics.image_size,
                got: size,
            });
        }
    }

    let solution = solve_extrinsics(
        &intrinsics,
        &trial.observations,
        &config.checkerboard,
        &config.world_points(),
        &config.reference_frame,
        &config.extrinsics,
    )?;
    for w in &solution.warnings {
        warn!("{key}: {w}");
    }
    let stored = store.put_extrinsics(key, &solution.extrinsics, Some(&intrinsics))?;
    info!(
        "{key}: pose from trial {} ({} detections), rms {:.3} px",
        trial.id(),
        solution.frames_used.len(),
        solution.reprojection_error
    );
    Ok(ExtrinsicsRun {
        key: key.clone(),
        trial_id: trial.id().to_string(),
        solution,
        stored,
    })
}

/// One independent unit of [`calibrate_cameras_parallel`].
#[derive(Clone, Debug)]
pub enum CalibrationJob {
    Intrinsics(IntrinsicsJob),
    Extrinsics(ExtrinsicsJob),
}

#[derive(Debug)]
pub enum CalibrationOutcome {
    Intrinsics(IntrinsicsRun),
    Extrinsics(ExtrinsicsRun),
}

/// Run independent camera jobs concurrently. Results come back in job
/// order; a failing job does not affect the others.
pub fn calibrate_cameras_parallel(
    config: &CalibrationConfig,
    jobs: &[CalibrationJob],
    store: &CalibrationStore,
) -> Vec<Result<CalibrationOutcome, CalibrationError>> {
    jobs.par_iter()
        .map(|job| match job {
            CalibrationJob::Intrinsics(j) => {
                calibrate_intrinsics(config, j, store).map(CalibrationOutcome::Intrinsics)
            }
            CalibrationJob::Extrinsics(j) => {
                calibrate_extrinsics(config, j, store).map(CalibrationOutcome::Extrinsics)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rigcal_core::ImageSize;

    fn trial(id: &str, role: TrialRole) -> Trial {
        Trial::new(id, role, TrialObservations::new(ImageSize::new(640, 480)))
    }

    #[test]
    fn extrinsics_trials_come_first() {
        let trials = vec![
            trial("a", TrialRole::Intrinsics),
            trial("s", TrialRole::Static),
            trial("ext", TrialRole::Extrinsics),
            trial("b", TrialRole::Intrinsics),
        ];
        let order: Vec<&str> = processing_order(&trials).iter().map(|t| t.id()).collect();
        assert_eq!(order, vec!["ext", "a", "s", "b"]);
    }

    #[test]
    fn job_without_profile_is_rejected() {
        let config = CalibrationConfig::default();
        let dir = tempfile::tempdir().unwrap();
        let store = CalibrationStore::open(dir.path()).unwrap();
        let job = IntrinsicsJob::new(&config, "cam", Vec::new(), vec![trial("a", TrialRole::Intrinsics)]);
        let err = calibrate_intrinsics(&config, &job, &store).unwrap_err();
        assert!(matches!(err, CalibrationError::NoProfile(_)));
        assert!(err.is_configuration());
    }

    #[test]
    fn roles_other_than_intrinsics_are_not_estimated() {
        let config = CalibrationConfig::default();
        let dir = tempfile::tempdir().unwrap();
        let store = CalibrationStore::open(dir.path()).unwrap();
        let job = IntrinsicsJob::new(
            &config,
            "cam",
            vec!["p".into()],
            vec![trial("ext", TrialRole::Extrinsics), trial("s", TrialRole::Static)],
        );
        assert!(matches!(
            calibrate_intrinsics(&config, &job, &store),
            Err(CalibrationError::NoIntrinsicsTrial(_))
        ));
    }
}
