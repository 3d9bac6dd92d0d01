//! Core types and geometry for multi-camera rig calibration.
//!
//! This crate is purely geometric: checkerboard targets, corner
//! observations, the pinhole + Brown-Conrady camera model, camera poses,
//! planar homographies and the record types shared by the estimation and
//! storage crates. It does not depend on any corner detector or image type.

mod board;
mod camera;
mod corner;
mod homography;
mod image;
mod keys;
mod logger;
mod observation;
mod pose;
pub mod synthetic;
mod trial;

pub use board::{CheckerboardSpec, SpecError};
pub use camera::{CameraIntrinsics, Distortion};
pub use corner::{Corner, GridCoords};
pub use homography::{estimate_homography, Homography, HomographyError};
pub use image::GrayImageView;
pub use keys::{DeploymentKey, SessionCameraKey};
pub use observation::{CornerObservation, ImageSize, TrialObservations};
pub use pose::{
    chordal_mean, check_rotation, project_to_rotation, rotation_angle_between,
    rotation_from_axis_angle, CameraExtrinsics, PoseError, ROTATION_TOLERANCE,
};
pub use trial::{
    ComparisonTolerance, IntrinsicComparison, TrialDeviation, TrialResult, TrialRole,
};

#[cfg(feature = "tracing")]
pub use logger::{init_tracing, TraceFormat};

pub use logger::{init_from_env, init_with_level, LOG_ENV};
