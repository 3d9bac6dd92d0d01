//! Run configuration.
//!
//! A [`CalibrationConfig`] is built once per run (defaults, a JSON file, or
//! both) and passed by reference into every calibration call. Session
//! metadata never edits it in place; [`CalibrationConfig::with_metadata`]
//! returns a derived copy.

use crate::error::CalibrationError;
use log::{info, warn};
use nalgebra::{Point3, Rotation3, Vector3};
use rigcal_chessboard::ChessboardParams;
use rigcal_core::{CheckerboardSpec, ComparisonTolerance};
use rigcal_solve::{ExtrinsicOptions, IntrinsicOptions};
use rigcal_store::SessionMetadata;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Corner detector settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// ChESS response threshold relative to the strongest response.
    pub chess_threshold_rel: f32,
    /// ChESS non-maximum suppression radius in pixels.
    pub chess_nms_radius: u8,
    pub board: ChessboardParams,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            chess_threshold_rel: 0.2,
            chess_nms_radius: 2,
            board: ChessboardParams::default(),
        }
    }
}

/// Pose of the extrinsics checkerboard in the world frame.
///
/// The identity placement makes the board frame the world frame: origin at
/// corner `(0, 0)`, x along the board width, z out of the board plane.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardPlacement {
    /// Roll, pitch, yaw in degrees.
    pub rotation_deg: [f64; 3],
    pub translation_mm: [f64; 3],
}

impl BoardPlacement {
    /// World coordinates of every inner corner, row-major.
    pub fn world_points(&self, spec: &CheckerboardSpec) -> Vec<Point3<f64>> {
        let [r, p, y] = self.rotation_deg.map(f64::to_radians);
        let rotation = Rotation3::from_euler_angles(r, p, y);
        let translation = Vector3::from(self.translation_mm);
        spec.object_points()
            .into_iter()
            .map(|q| Point3::from(rotation * q.coords + translation))
            .collect()
    }
}

/// Everything a calibration run needs besides its inputs.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Board used when session metadata does not name one.
    pub checkerboard: CheckerboardSpec,
    pub intrinsics: IntrinsicOptions,
    /// Abort a trial as soon as more frames than this fail detection.
    pub max_detection_failures: Option<usize>,
    pub comparison: ComparisonTolerance,
    pub extrinsics: ExtrinsicOptions,
    pub detector: DetectorConfig,
    /// Name of the shared world frame extrinsics are expressed in.
    pub reference_frame: String,
    pub board_placement: BoardPlacement,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            checkerboard: CheckerboardSpec {
                cols: 8,
                rows: 11,
                square_size_mm: 60.0,
            },
            intrinsics: IntrinsicOptions::default(),
            max_detection_failures: None,
            comparison: ComparisonTolerance::default(),
            extrinsics: ExtrinsicOptions::default(),
            detector: DetectorConfig::default(),
            reference_frame: "world".to_string(),
            board_placement: BoardPlacement::default(),
        }
    }
}

fn finite_non_negative(name: &str, v: f64) -> Result<(), CalibrationError> {
    if v.is_finite() && v >= 0.0 {
        Ok(())
    } else {
        Err(CalibrationError::Config(format!("{name} must be a non-negative number, got {v}")))
    }
}

impl CalibrationConfig {
    /// Load and validate a JSON config. Missing fields take their defaults.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, CalibrationError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate().map_err(|e| match e {
            CalibrationError::Config(reason) => {
                CalibrationError::Config(format!("{}: {reason}", path.display()))
            }
            other => other,
        })?;
        Ok(config)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), CalibrationError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), CalibrationError> {
        self.checkerboard.validate()?;
        if self.intrinsics.target_samples < 3 {
            return Err(CalibrationError::Config(format!(
                "intrinsics.target_samples must be at least 3, got {}",
                self.intrinsics.target_samples
            )));
        }
        finite_non_negative(
            "intrinsics.principal_point_margin",
            self.intrinsics.principal_point_margin,
        )?;
        finite_non_negative("comparison.relative", self.comparison.relative)?;
        finite_non_negative("comparison.reprojection_px", self.comparison.reprojection_px)?;
        if self.extrinsics.max_samples == 0 {
            return Err(CalibrationError::Config(
                "extrinsics.max_samples must be at least 1".to_string(),
            ));
        }
        finite_non_negative(
            "extrinsics.rotation_tolerance_deg",
            self.extrinsics.rotation_tolerance_deg,
        )?;
        finite_non_negative(
            "extrinsics.translation_tolerance_mm",
            self.extrinsics.translation_tolerance_mm,
        )?;
        let t = self.detector.chess_threshold_rel;
        if !(t > 0.0 && t <= 1.0) {
            return Err(CalibrationError::Config(format!(
                "detector.chess_threshold_rel must be in (0, 1], got {t}"
            )));
        }
        self.detector
            .board
            .validate()
            .map_err(|msg| CalibrationError::Config(format!("detector.board.{msg}")))?;
        if self.reference_frame.trim().is_empty() {
            return Err(CalibrationError::Config(
                "reference_frame must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// This config with the session's checkerboard, when the metadata names one.
    pub fn with_metadata(&self, metadata: &SessionMetadata) -> Result<Self, CalibrationError> {
        let mut config = self.clone();
        if let Some(board) = &metadata.checkerboard {
            config.checkerboard = board.to_spec()?;
            info!(
                "checkerboard from session metadata: {}x{} corners, {} mm",
                config.checkerboard.cols, config.checkerboard.rows, config.checkerboard.square_size_mm
            );
        }
        Ok(config)
    }

    /// Load session metadata from `path` if it exists and apply it.
    pub fn with_metadata_file(&self, path: impl AsRef<Path>) -> Result<Self, CalibrationError> {
        match SessionMetadata::load_optional(path)? {
            Some(metadata) => self.with_metadata(&metadata),
            None => Ok(self.clone()),
        }
    }

    /// World coordinates of the extrinsics board corners.
    pub fn world_points(&self) -> Vec<Point3<f64>> {
        self.board_placement.world_points(&self.checkerboard)
    }
}

/// Camera model given explicitly, else the one named by session metadata.
///
/// An explicit model wins over the metadata; a conflict is logged. Having
/// neither is a configuration error.
pub fn resolve_camera_model(
    explicit: Option<&str>,
    metadata: Option<&SessionMetadata>,
) -> Result<String, CalibrationError> {
    let from_metadata = metadata
        .and_then(|m| m.camera_model.as_deref())
        .map(str::trim)
        .filter(|m| !m.is_empty());
    match (explicit.map(str::trim).filter(|m| !m.is_empty()), from_metadata) {
        (Some(model), Some(session)) => {
            if model != session {
                warn!("camera model {model} overrides {session} from session metadata");
            }
            Ok(model.to_string())
        }
        (Some(model), None) => Ok(model.to_string()),
        (None, Some(session)) => {
            info!("camera model from session metadata: {session}");
            Ok(session.to_string())
        }
        (None, None) => Err(CalibrationError::Config(
            "no camera model given and session metadata names none".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rigcal_store::CheckerboardMetadata;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: CalibrationConfig = serde_json::from_str(
            r#"{"checkerboard": {"cols": 9, "rows": 6, "square_size_mm": 25.0},
                "intrinsics": {"target_samples": 30}}"#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.checkerboard, CheckerboardSpec::new(9, 6, 25.0).unwrap());
        assert_eq!(config.intrinsics.target_samples, 30);
        assert_eq!(config.intrinsics.min_observations, 10);
        assert_eq!(config.comparison, ComparisonTolerance::default());
        assert_eq!(config.extrinsics.max_samples, 5);
        assert_eq!(config.reference_frame, "world");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = CalibrationConfig::default();
        config.checkerboard.rows = 2;
        assert!(matches!(config.validate(), Err(CalibrationError::Spec(_))));

        let mut config = CalibrationConfig::default();
        config.comparison.relative = f64::NAN;
        assert!(matches!(config.validate(), Err(CalibrationError::Config(_))));

        let mut config = CalibrationConfig::default();
        config.detector.chess_threshold_rel = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn metadata_board_replaces_default_without_touching_original() {
        let base = CalibrationConfig::default();
        let metadata = SessionMetadata {
            checkerboard: Some(CheckerboardMetadata {
                corners_width: 9,
                corners_height: 6,
                square_side_mm: 35.0,
            }),
            camera_model: None,
        };
        let derived = base.with_metadata(&metadata).unwrap();
        assert_eq!(derived.checkerboard, CheckerboardSpec::new(9, 6, 35.0).unwrap());
        assert_eq!(base.checkerboard.square_size_mm, 60.0);

        let same = base.with_metadata(&SessionMetadata::default()).unwrap();
        assert_eq!(same.checkerboard, base.checkerboard);
    }

    #[test]
    fn camera_model_comes_from_metadata_unless_given() {
        let metadata = SessionMetadata {
            checkerboard: None,
            camera_model: Some("SONY-RX0".to_string()),
        };
        assert_eq!(resolve_camera_model(None, Some(&metadata)).unwrap(), "SONY-RX0");
        assert_eq!(
            resolve_camera_model(Some("GoPro"), Some(&metadata)).unwrap(),
            "GoPro"
        );
        assert_eq!(resolve_camera_model(Some("GoPro"), None).unwrap(), "GoPro");

        let err = resolve_camera_model(None, Some(&SessionMetadata::default())).unwrap_err();
        assert!(matches!(err, CalibrationError::Config(_)), "{err}");
        assert!(err.is_configuration());
        assert!(resolve_camera_model(Some("  "), None).is_err());
    }

    #[test]
    fn missing_metadata_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let base = CalibrationConfig::default();
        let derived = base
            .with_metadata_file(dir.path().join("sessionMetadata.json"))
            .unwrap();
        assert_eq!(derived.checkerboard, base.checkerboard);
    }

    #[test]
    fn placement_moves_world_points() {
        let spec = CheckerboardSpec::new(3, 3, 10.0).unwrap();
        assert_eq!(BoardPlacement::default().world_points(&spec), spec.object_points());

        let placement = BoardPlacement {
            rotation_deg: [0.0, 0.0, 90.0],
            translation_mm: [100.0, 0.0, 0.0],
        };
        let pts = placement.world_points(&spec);
        // (10, 0, 0) turns onto +y, then shifts along x.
        assert!((pts[1] - Point3::new(100.0, 10.0, 0.0)).norm() < 1e-9);
    }

    #[test]
    fn json_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = CalibrationConfig::default();
        config.max_detection_failures = Some(200);
        config.write_json(&path).unwrap();
        let read = CalibrationConfig::load_json(&path).unwrap();
        assert_eq!(read.max_detection_failures, Some(200));
        assert_eq!(read.checkerboard, config.checkerboard);
    }
}
