use approx::assert_relative_eq;
use nalgebra::{Matrix3, Point3, Rotation3, Vector3};
use rigcal::core::synthetic::synthetic_trial;
use rigcal::core::{
    rotation_angle_between, CameraIntrinsics, CheckerboardSpec, CornerObservation, DeploymentKey,
    ImageSize, SessionCameraKey, TrialObservations, TrialRole,
};
use rigcal::solve::{AggregateError, EstimateError};
use rigcal::store::CalibrationStore;
use rigcal::{
    calibrate_cameras_parallel, calibrate_extrinsics, calibrate_intrinsics, load_trial_plan,
    CalibrationConfig, CalibrationError, CalibrationJob, CalibrationOutcome, ExtrinsicsJob,
    IntrinsicsJob, Trial,
};

fn spec() -> CheckerboardSpec {
    CheckerboardSpec::new(9, 6, 25.0).unwrap()
}

fn truth() -> CameraIntrinsics {
    CameraIntrinsics::pinhole(1000.0, 1000.0, 640.0, 360.0, ImageSize::new(1280, 720))
}

fn config() -> CalibrationConfig {
    let mut config = CalibrationConfig::default();
    config.checkerboard = spec();
    config
}

fn profiles() -> Vec<String> {
    vec!["Deployed_720_60fps".to_string(), "Deployed".to_string()]
}

/// World -> camera pose of a camera looking down at a board lying at the origin.
fn session_pose() -> (Matrix3<f64>, Vector3<f64>) {
    let r = *Rotation3::from_euler_angles(2.6, 0.2, -0.15).matrix();
    (r, Vector3::new(-90.0, 40.0, 1500.0))
}

fn extrinsics_trial(cam: &CameraIntrinsics, size: ImageSize) -> TrialObservations {
    let (r, t) = session_pose();
    let pts = spec()
        .object_points()
        .iter()
        .map(|p| cam.project(&Point3::from(r * p.coords + t)).unwrap())
        .collect();
    let mut trial = TrialObservations::new(size);
    trial.frames.push(None);
    trial.frames.push(CornerObservation::new(pts, &spec()));
    trial
}

#[test]
fn intrinsics_run_stores_average_and_audit_records() {
    let dir = tempfile::tempdir().unwrap();
    let store = CalibrationStore::open(dir.path()).unwrap();
    let mut config = config();
    config.intrinsics.fix_tangential = true;
    let cam = truth();

    let job = IntrinsicsJob::new(
        &config,
        "SONYRX0-II",
        profiles(),
        vec![
            Trial::new("clean", TrialRole::Intrinsics, synthetic_trial(&cam, &spec(), 60, None)),
            Trial::new(
                "noisy",
                TrialRole::Intrinsics,
                synthetic_trial(&cam, &spec(), 60, Some((0.5, 7))),
            ),
            Trial::new("static", TrialRole::Static, TrialObservations::default()),
        ],
    );
    let run = calibrate_intrinsics(&config, &job, &store).unwrap();

    assert_eq!(run.key, DeploymentKey::new("SONYRX0-II", "Deployed_720_60fps"));
    assert_relative_eq!(run.intrinsics.fx, cam.fx, max_relative = 0.005);
    assert_relative_eq!(run.intrinsics.fy, cam.fy, max_relative = 0.005);
    assert_relative_eq!(run.intrinsics.cx, cam.cx, max_relative = 0.005);
    assert_relative_eq!(run.intrinsics.cy, cam.cy, max_relative = 0.005);
    assert_eq!(run.flagged, vec!["noisy"]);
    assert!(run.skipped.is_empty());
    assert_eq!(run.stored.len(), 2);

    for profile in profiles() {
        let key = DeploymentKey::new("SONYRX0-II", profile);
        let stored = store.get_intrinsics(&key).unwrap();
        assert_relative_eq!(stored.fx, run.intrinsics.fx, max_relative = 1e-12);
        assert_eq!(stored.image_size, cam.image_size);

        let audit = store.get_comparison(&key).unwrap();
        assert_eq!(audit.trial_ids, vec!["clean", "noisy"]);
        assert_eq!(audit.flagged, vec!["noisy"]);

        let manifest = store.get_manifest(&key).unwrap();
        assert_eq!(manifest.checkerboard, spec());
        let roles: Vec<_> = manifest.trials.iter().map(|t| (t.id.as_str(), t.role)).collect();
        assert_eq!(
            roles,
            vec![
                ("clean", TrialRole::Intrinsics),
                ("noisy", TrialRole::Intrinsics),
                ("static", TrialRole::Static),
            ]
        );
    }
}

#[test]
fn failed_trials_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let store = CalibrationStore::open(dir.path()).unwrap();
    let config = config();
    let cam = truth();

    let job = IntrinsicsJob::new(
        &config,
        "cam",
        vec!["p".into()],
        vec![
            Trial::new("good", TrialRole::Intrinsics, synthetic_trial(&cam, &spec(), 40, None)),
            Trial::new("short", TrialRole::Intrinsics, synthetic_trial(&cam, &spec(), 5, None)),
        ],
    );
    let run = calibrate_intrinsics(&config, &job, &store).unwrap();
    assert_eq!(run.comparison.trials.len(), 1);
    assert_eq!(run.skipped.len(), 1);
    let (id, err) = &run.skipped[0];
    assert_eq!(id, "short");
    assert_eq!(
        *err,
        EstimateError::InsufficientObservations {
            found: 5,
            required: 10
        }
    );
}

#[test]
fn run_without_any_successful_trial_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = CalibrationStore::open(dir.path()).unwrap();
    let config = config();
    let key = DeploymentKey::new("cam", "p");

    let job = IntrinsicsJob::new(
        &config,
        "cam",
        vec!["p".into()],
        vec![Trial::new("short", TrialRole::Intrinsics, synthetic_trial(&truth(), &spec(), 4, None))],
    );
    let err = calibrate_intrinsics(&config, &job, &store).unwrap_err();
    assert!(matches!(err, CalibrationError::NoSuccessfulTrial { attempted: 1, .. }), "{err}");
    assert!(store.get_intrinsics(&key).unwrap_err().is_not_found());
}

#[test]
fn mismatched_resolutions_abort_before_storing() {
    let dir = tempfile::tempdir().unwrap();
    let store = CalibrationStore::open(dir.path()).unwrap();
    let config = config();
    let small = CameraIntrinsics::pinhole(800.0, 800.0, 480.0, 270.0, ImageSize::new(960, 540));

    let job = IntrinsicsJob::new(
        &config,
        "cam",
        vec!["p".into()],
        vec![
            Trial::new("hd", TrialRole::Intrinsics, synthetic_trial(&truth(), &spec(), 30, None)),
            Trial::new("qhd", TrialRole::Intrinsics, synthetic_trial(&small, &spec(), 30, None)),
        ],
    );
    let err = calibrate_intrinsics(&config, &job, &store).unwrap_err();
    assert!(
        matches!(err, CalibrationError::Aggregate(AggregateError::ImageSizeMismatch { .. })),
        "{err}"
    );
    assert!(err.is_configuration());
    assert!(store
        .get_intrinsics(&DeploymentKey::new("cam", "p"))
        .unwrap_err()
        .is_not_found());
}

#[test]
fn mismatched_resolution_is_reported_even_when_that_trial_cannot_be_estimated() {
    let dir = tempfile::tempdir().unwrap();
    let store = CalibrationStore::open(dir.path()).unwrap();
    let config = config();
    let small = CameraIntrinsics::pinhole(800.0, 800.0, 480.0, 270.0, ImageSize::new(960, 540));

    // Five frames are below min_observations, so "qhd" alone would be skipped.
    let job = IntrinsicsJob::new(
        &config,
        "cam",
        vec!["p".into()],
        vec![
            Trial::new("hd", TrialRole::Intrinsics, synthetic_trial(&truth(), &spec(), 30, None)),
            Trial::new("qhd", TrialRole::Intrinsics, synthetic_trial(&small, &spec(), 5, None)),
        ],
    );
    let err = calibrate_intrinsics(&config, &job, &store).unwrap_err();
    match &err {
        CalibrationError::Aggregate(AggregateError::ImageSizeMismatch { trial, expected, got }) => {
            assert_eq!(trial, "qhd");
            assert_eq!(*expected, ImageSize::new(1280, 720));
            assert_eq!(*got, ImageSize::new(960, 540));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_configuration());
    assert!(store
        .get_intrinsics(&DeploymentKey::new("cam", "p"))
        .unwrap_err()
        .is_not_found());
}

#[test]
fn stored_manifest_reproduces_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let store = CalibrationStore::open(dir.path()).unwrap();
    let config = config();
    let cam = truth();
    let key = DeploymentKey::new("cam", "p");

    let trials = vec![
        Trial::new("t1", TrialRole::Intrinsics, synthetic_trial(&cam, &spec(), 30, Some((0.2, 1)))),
        Trial::new("t2", TrialRole::Intrinsics, synthetic_trial(&cam, &spec(), 30, Some((0.2, 2)))),
    ];
    let first = calibrate_intrinsics(
        &config,
        &IntrinsicsJob::new(&config, "cam", vec!["p".into()], trials.clone()),
        &store,
    )
    .unwrap();

    let manifest = load_trial_plan(&store, &key, true).unwrap().unwrap();
    // Rerun under a config with another default board: the manifest's board wins.
    let other = CalibrationConfig::default();
    let job = IntrinsicsJob::from_manifest(&manifest, vec!["p".into()], |entry| {
        Ok(trials
            .iter()
            .find(|t| t.entry == *entry)
            .map(|t| t.observations.clone())
            .unwrap_or_default())
    })
    .unwrap();
    assert_eq!(job.checkerboard, spec());
    let second = calibrate_intrinsics(&other, &job, &store).unwrap();
    assert_eq!(second.intrinsics, first.intrinsics);

    let missing = DeploymentKey::new("cam", "never");
    assert!(load_trial_plan(&store, &missing, false).unwrap().is_none());
    let err = load_trial_plan(&store, &missing, true).unwrap_err();
    assert!(matches!(err, CalibrationError::MissingManifest { .. }));
    assert!(err.is_configuration());
}

#[test]
fn extrinsics_run_uses_stored_intrinsics() {
    let dir = tempfile::tempdir().unwrap();
    let store = CalibrationStore::open(dir.path()).unwrap();
    let config = config();
    let cam = truth();
    let deployment = DeploymentKey::new("cam", "p");
    store.put_intrinsics(&deployment, &cam).unwrap();

    let job = ExtrinsicsJob {
        session: SessionCameraKey::new("session0", "Cam1"),
        intrinsics: deployment,
        trials: vec![
            Trial::new("walking", TrialRole::Intrinsics, TrialObservations::default()),
            Trial::new("calib", TrialRole::Extrinsics, extrinsics_trial(&cam, cam.image_size)),
        ],
    };
    let run = calibrate_extrinsics(&config, &job, &store).unwrap();
    assert_eq!(run.trial_id, "calib");
    assert_eq!(run.solution.frames_used, vec![1]);

    let (r, t) = session_pose();
    let stored = store.get_extrinsics(&job.session).unwrap();
    assert_eq!(stored.reference_frame, "world");
    assert!((stored.translation - t).norm() < 1.0);
    let deg = rotation_angle_between(&stored.rotation, &r).to_degrees();
    assert!(deg < 0.1, "rotation error {deg} deg");

    let record = store.get_extrinsics_record(&job.session).unwrap();
    assert_eq!(record.intrinsics.unwrap().to_intrinsics().fx, cam.fx);
}

#[test]
fn extrinsics_need_stored_intrinsics_of_the_same_resolution() {
    let dir = tempfile::tempdir().unwrap();
    let store = CalibrationStore::open(dir.path()).unwrap();
    let config = config();
    let cam = truth();
    let deployment = DeploymentKey::new("cam", "p");

    let job = |size| ExtrinsicsJob {
        session: SessionCameraKey::new("session0", "Cam1"),
        intrinsics: deployment.clone(),
        trials: vec![Trial::new("calib", TrialRole::Extrinsics, extrinsics_trial(&cam, size))],
    };
    let err = calibrate_extrinsics(&config, &job(cam.image_size), &store).unwrap_err();
    assert!(matches!(&err, CalibrationError::Store(e) if e.is_not_found()), "{err}");

    store.put_intrinsics(&deployment, &cam).unwrap();
    let err = calibrate_extrinsics(&config, &job(ImageSize::new(1920, 1080)), &store).unwrap_err();
    assert!(matches!(err, CalibrationError::IntrinsicsResolution { .. }), "{err}");

    let no_ext = ExtrinsicsJob {
        trials: vec![Trial::new("walk", TrialRole::Intrinsics, TrialObservations::default())],
        ..job(cam.image_size)
    };
    assert!(matches!(
        calibrate_extrinsics(&config, &no_ext, &store),
        Err(CalibrationError::NoExtrinsicsTrial(_))
    ));
}

#[test]
fn cameras_run_concurrently_and_independently() {
    let dir = tempfile::tempdir().unwrap();
    let store = CalibrationStore::open(dir.path()).unwrap();
    let config = config();
    let cam = truth();
    store.put_intrinsics(&DeploymentKey::new("cam-a", "p"), &cam).unwrap();

    let intrinsics_job = |model: &str, n| {
        CalibrationJob::Intrinsics(IntrinsicsJob::new(
            &config,
            model,
            vec!["p".into()],
            vec![Trial::new("t", TrialRole::Intrinsics, synthetic_trial(&cam, &spec(), n, None))],
        ))
    };
    let jobs = vec![
        intrinsics_job("cam-b", 30),
        intrinsics_job("cam-c", 3),
        CalibrationJob::Extrinsics(ExtrinsicsJob {
            session: SessionCameraKey::new("s", "Cam1"),
            intrinsics: DeploymentKey::new("cam-a", "p"),
            trials: vec![Trial::new("calib", TrialRole::Extrinsics, extrinsics_trial(&cam, cam.image_size))],
        }),
    ];
    let results = calibrate_cameras_parallel(&config, &jobs, &store);
    assert_eq!(results.len(), 3);

    match &results[0] {
        Ok(CalibrationOutcome::Intrinsics(run)) => {
            assert_eq!(run.key, DeploymentKey::new("cam-b", "p"));
            assert_relative_eq!(run.intrinsics.fx, cam.fx, max_relative = 0.005);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(results[1], Err(CalibrationError::NoSuccessfulTrial { .. })));
    assert!(matches!(results[2], Ok(CalibrationOutcome::Extrinsics(_))));

    assert!(store.get_intrinsics(&DeploymentKey::new("cam-b", "p")).is_ok());
    assert!(store
        .get_intrinsics(&DeploymentKey::new("cam-c", "p"))
        .unwrap_err()
        .is_not_found());
    assert!(store.get_extrinsics(&SessionCameraKey::new("s", "Cam1")).is_ok());
}
