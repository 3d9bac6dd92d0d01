use approx::assert_relative_eq;
use rigcal_core::synthetic::synthetic_trial;
use rigcal_core::{
    CameraIntrinsics, CheckerboardSpec, ComparisonTolerance, Distortion, ImageSize, TrialResult,
};
use rigcal_solve::{aggregate_trials, estimate_trial, AggregateError, IntrinsicOptions};

fn trial_result(id: &str, fx: f64, fy: f64, rms: f64) -> TrialResult {
    let mut c = CameraIntrinsics::pinhole(fx, fy, 641.5, 359.25, ImageSize::new(1280, 720));
    c.distortion = Distortion::from_array([-0.113, 0.0271, 0.00031, -0.00017, 0.0013]);
    c.reprojection_error = rms;
    TrialResult {
        trial_id: id.to_string(),
        intrinsics: c,
        observations_used: 50,
    }
}

#[test]
fn identical_trials_average_to_themselves() {
    let one = trial_result("a", 1003.7, 998.1, 0.137);
    let trials: Vec<_> = (0..7)
        .map(|k| TrialResult {
            trial_id: format!("trial-{k}"),
            ..one.clone()
        })
        .collect();
    let cmp = aggregate_trials(&trials).unwrap();
    assert_eq!(cmp.mean, one.intrinsics);
    assert_eq!(cmp.trials.len(), 7);
    assert!(cmp.trials.iter().all(|d| d.max_relative() == 0.0));
    assert!(cmp.flagged(&ComparisonTolerance::default()).is_empty());
}

#[test]
fn averaging_ignores_input_order() {
    let trials = vec![
        trial_result("c", 1001.3, 999.2, 0.12),
        trial_result("a", 997.9, 1002.8, 0.09),
        trial_result("b", 1004.4, 1000.1, 0.15),
    ];
    let mut reversed = trials.clone();
    reversed.reverse();
    let x = aggregate_trials(&trials).unwrap();
    let y = aggregate_trials(&reversed).unwrap();
    assert_eq!(x, y);
    let ids: Vec<_> = x.trials.iter().map(|d| d.trial_id.as_str()).collect();
    assert_eq!(ids, ["a", "b", "c"]);
}

#[test]
fn trials_weigh_equally_regardless_of_length() {
    let mut long = trial_result("long", 1000.0, 1000.0, 0.1);
    long.observations_used = 5000;
    let short = trial_result("short", 1010.0, 1010.0, 0.1);
    let cmp = aggregate_trials(&[long, short]).unwrap();
    assert_relative_eq!(cmp.mean.fx, 1005.0, epsilon = 1e-12);
}

#[test]
fn perturbed_trial_stands_out() {
    let trials = vec![
        trial_result("t1", 1000.0, 1000.0, 0.1),
        trial_result("t2", 1000.5, 999.5, 0.1),
        trial_result("t3", 999.5, 1000.5, 0.1),
        trial_result("outlier", 1090.0, 1000.0, 0.1),
    ];
    let cmp = aggregate_trials(&trials).unwrap();
    let tol = ComparisonTolerance::default();
    assert_eq!(cmp.flagged(&tol), vec!["outlier"]);

    let outlier = cmp.deviation("outlier").unwrap();
    for d in cmp.trials.iter().filter(|d| d.trial_id != "outlier") {
        assert!(d.max_relative() < tol.relative);
        assert!(outlier.max_relative() > d.max_relative());
    }
    assert!(outlier.fx > 0.0);
}

#[test]
fn mismatched_image_size_fails_before_averaging() {
    let a = trial_result("a", 1000.0, 1000.0, 0.1);
    let mut b = trial_result("b", 1000.0, 1000.0, 0.1);
    b.intrinsics.image_size = ImageSize::new(1920, 1080);
    let err = aggregate_trials(&[a, b]).unwrap_err();
    assert_eq!(
        err,
        AggregateError::ImageSizeMismatch {
            trial: "b".into(),
            expected: ImageSize::new(1280, 720),
            got: ImageSize::new(1920, 1080),
        }
    );
}

#[test]
fn noisy_trial_is_flagged_while_mean_stays_accurate() {
    let spec = CheckerboardSpec::new(9, 6, 25.0).unwrap();
    let truth = CameraIntrinsics::pinhole(1000.0, 1000.0, 640.0, 360.0, ImageSize::new(1280, 720));
    // The lens has no decentering; a free p1/p2 would trade off against cx/cy under noise.
    let options = IntrinsicOptions {
        fix_tangential: true,
        ..Default::default()
    };

    let clean = synthetic_trial(&truth, &spec, 60, None);
    let noisy = synthetic_trial(&truth, &spec, 60, Some((0.5, 7)));
    let results = vec![
        estimate_trial("clean", &clean, &spec, &options).unwrap(),
        estimate_trial("noisy", &noisy, &spec, &options).unwrap(),
    ];
    let cmp = aggregate_trials(&results).unwrap();

    assert_relative_eq!(cmp.mean.fx, truth.fx, max_relative = 0.005);
    assert_relative_eq!(cmp.mean.fy, truth.fy, max_relative = 0.005);
    assert_relative_eq!(cmp.mean.cx, truth.cx, max_relative = 0.005);
    assert_relative_eq!(cmp.mean.cy, truth.cy, max_relative = 0.005);
    assert_eq!(cmp.flagged(&ComparisonTolerance::default()), vec!["noisy"]);
}
