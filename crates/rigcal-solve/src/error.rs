use rigcal_core::{HomographyError, ImageSize, PoseError};
use thiserror::Error;

/// Failure of a single-trial intrinsic fit.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EstimateError {
    #[error("{found} valid checkerboard detections, at least {required} required")]
    InsufficientObservations { found: usize, required: usize },
    #[error("ill-conditioned fit: {0}")]
    IllConditioned(String),
    #[error("trial has detections but no image size")]
    MissingImageSize,
    #[error(transparent)]
    Homography(#[from] HomographyError),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AggregateError {
    #[error("no trial results to aggregate")]
    NoTrials,
    #[error("trial {trial} has image size {got}, expected {expected}")]
    ImageSizeMismatch {
        trial: String,
        expected: ImageSize,
        got: ImageSize,
    },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExtrinsicsError {
    #[error("no usable checkerboard detection in extrinsics input")]
    NoDetection,
    #[error("degenerate pose: {0}")]
    PoseDegenerate(String),
    #[error("expected {expected} world points, got {got}")]
    WorldPointMismatch { expected: usize, got: usize },
    #[error("world points of the checkerboard are not planar")]
    NonPlanarTarget,
    #[error(transparent)]
    Pose(#[from] PoseError),
}
