use approx::assert_abs_diff_eq;
use rigcal_chessboard::{ChessboardParams, CheckerboardDetector, DetectError, TrialCollector};
use rigcal_core::{CheckerboardSpec, Corner, ImageSize};
use std::f32::consts::FRAC_PI_4;

const FRAME: ImageSize = ImageSize {
    width: 1280,
    height: 720,
};

/// ChESS-like corner cloud of the whole board with its first corner at `origin`.
fn board_at(spec: &CheckerboardSpec, origin: (f32, f32), spacing: f32) -> Vec<Corner> {
    let mut out = Vec::new();
    for j in 0..spec.rows {
        for i in 0..spec.cols {
            let orientation = if (i + j) % 2 == 0 { FRAC_PI_4 } else { 3.0 * FRAC_PI_4 };
            out.push(Corner::new(
                origin.0 + i as f32 * spacing,
                origin.1 + j as f32 * spacing,
                orientation,
                1.0,
            ));
        }
    }
    out
}

#[test]
fn board_moving_through_a_trial_is_collected_frame_by_frame() {
    let spec = CheckerboardSpec::new(6, 4, 25.0).unwrap();
    let detector = CheckerboardDetector::new(spec.clone(), ChessboardParams::default());

    let mut frames: Vec<Vec<Corner>> = (0..4)
        .map(|k| {
            let mut corners = board_at(&spec, (200.0 + 40.0 * k as f32, 150.0), 30.0);
            // Isolated clutter far from the board.
            corners.push(Corner::new(1100.0, 650.0, FRAC_PI_4, 1.0));
            corners
        })
        .collect();
    frames.insert(2, Vec::new());
    let mut partial = board_at(&spec, (400.0, 300.0), 30.0);
    partial.truncate(spec.corner_count() - spec.cols as usize);
    frames.push(partial);

    let mut collector = TrialCollector::new(Some(3));
    for corners in &frames {
        collector
            .push(FRAME, detector.detect_from_corners(corners))
            .unwrap();
    }
    assert_eq!(collector.frame_count(), 6);
    assert_eq!(collector.failures(), 2);

    let trial = collector.finish();
    assert_eq!(trial.image_size, Some(FRAME));
    assert_eq!(trial.valid_count(&spec), 4);
    assert!(trial.frames[2].is_none());
    assert!(trial.frames[5].is_none());

    let first = trial.frames[3].as_ref().unwrap().points();
    assert_abs_diff_eq!(first[0].x, 280.0, epsilon = 1e-4);
    assert_abs_diff_eq!(first[0].y, 150.0, epsilon = 1e-4);
    let last = first[spec.corner_count() - 1];
    assert_abs_diff_eq!(last.x, 280.0 + 5.0 * 30.0, epsilon = 1e-4);
    assert_abs_diff_eq!(last.y, 150.0 + 3.0 * 30.0, epsilon = 1e-4);
}

#[test]
fn trial_aborts_once_empty_frames_exceed_the_limit() {
    let spec = CheckerboardSpec::new(5, 4, 25.0).unwrap();
    let detector = CheckerboardDetector::new(spec.clone(), ChessboardParams::default());
    let mut collector = TrialCollector::new(Some(1));

    let board = board_at(&spec, (300.0, 200.0), 30.0);
    collector
        .push(FRAME, detector.detect_from_corners(&board))
        .unwrap();
    collector.push(FRAME, detector.detect_from_corners(&[])).unwrap();
    let err = collector
        .push(FRAME, detector.detect_from_corners(&[]))
        .unwrap_err();
    assert_eq!(err, DetectError::TooManyFailures { failed: 2, limit: 1 });
}

#[test]
fn frame_at_another_resolution_stops_the_trial() {
    let spec = CheckerboardSpec::new(5, 4, 25.0).unwrap();
    let detector = CheckerboardDetector::new(spec.clone(), ChessboardParams::default());
    let board = board_at(&spec, (300.0, 200.0), 30.0);

    let mut collector = TrialCollector::new(None);
    collector
        .push(FRAME, detector.detect_from_corners(&board))
        .unwrap();
    let smaller = ImageSize::new(640, 360);
    let err = collector
        .push(smaller, detector.detect_from_corners(&board))
        .unwrap_err();
    assert_eq!(
        err,
        DetectError::ResolutionMismatch {
            expected: FRAME,
            got: smaller
        }
    );
}
