//! High-level facade for the `rigcal-*` workspace.
//!
//! This crate provides:
//! - re-exports of the underlying crates (`core`, `chessboard`, `solve`, `store`)
//! - [`CalibrationConfig`], the explicit per-run configuration
//! - pipeline functions that run a whole camera from detections to stored
//!   records, one camera at a time or many concurrently
//! - (feature `image`) frame detection helpers on `image::GrayImage` using
//!   the `chess-corners` ChESS detector.
//!
//! ## Quickstart
//!
//! ```no_run
//! use rigcal::{calibrate_intrinsics, CalibrationConfig, IntrinsicsJob, Trial};
//! use rigcal::core::TrialRole;
//! use rigcal::store::CalibrationStore;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CalibrationConfig::load_json("calibration.json")?;
//! let store = CalibrationStore::open("calibration-store")?;
//! let observations = serde_json::from_str(&std::fs::read_to_string("trial1.json")?)?;
//! let job = IntrinsicsJob::new(
//!     &config,
//!     "SONY-RX0",
//!     vec!["720_60fps".to_string()],
//!     vec![Trial::new("trial1", TrialRole::Intrinsics, observations)],
//! );
//! let run = calibrate_intrinsics(&config, &job, &store)?;
//! println!("fx = {:.2}, flagged: {:?}", run.intrinsics.fx, run.flagged);
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `rigcal::core`: checkerboard, camera model, poses, keys, synthetic data.
//! - `rigcal::chessboard`: checkerboard detection from ChESS corners.
//! - `rigcal::solve`: intrinsic estimation, trial aggregation, extrinsics.
//! - `rigcal::store`: versioned calibration records on disk.
//! - `rigcal::detect` (feature `image`): end-to-end helpers from `image::GrayImage`.

pub use rigcal_chessboard as chessboard;
pub use rigcal_core as core;
pub use rigcal_solve as solve;
pub use rigcal_store as store;

mod config;
mod error;
mod pipeline;

#[cfg(feature = "image")]
pub mod detect;

pub use config::{resolve_camera_model, BoardPlacement, CalibrationConfig, DetectorConfig};
pub use error::CalibrationError;
pub use pipeline::{
    calibrate_cameras_parallel, calibrate_extrinsics, calibrate_intrinsics, load_trial_plan,
    processing_order, CalibrationJob, CalibrationOutcome, ExtrinsicsJob, ExtrinsicsRun,
    IntrinsicsJob, IntrinsicsRun, Trial,
};
pub use rigcal_core::{init_with_level, DeploymentKey, SessionCameraKey};
