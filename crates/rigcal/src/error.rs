use rigcal_chessboard::DetectError;
use rigcal_core::{DeploymentKey, ImageSize, SessionCameraKey, SpecError};
use rigcal_solve::{AggregateError, EstimateError, ExtrinsicsError};
use rigcal_store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors of a calibration run for one camera.
#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error(transparent)]
    Detect(#[from] DetectError),

    #[error(transparent)]
    Estimate(#[from] EstimateError),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error(transparent)]
    Extrinsics(#[from] ExtrinsicsError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("trial manifest for {key} was requested but {} does not exist", path.display())]
    MissingManifest { key: DeploymentKey, path: PathBuf },

    #[error("no trial of {key} produced intrinsics ({attempted} attempted)")]
    NoSuccessfulTrial { key: DeploymentKey, attempted: usize },

    #[error("no intrinsics trial given for {0}")]
    NoIntrinsicsTrial(DeploymentKey),

    #[error("no extrinsics trial given for {0}")]
    NoExtrinsicsTrial(SessionCameraKey),

    #[error("at least one deployment profile is required for camera model {0}")]
    NoProfile(String),

    #[error("{key}: frames are {got}, stored intrinsics of {intrinsics} are for {expected}")]
    IntrinsicsResolution {
        key: SessionCameraKey,
        intrinsics: DeploymentKey,
        expected: ImageSize,
        got: ImageSize,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "image")]
    #[error(transparent)]
    Image(#[from] ::image::ImageError),
}

impl CalibrationError {
    /// Configuration errors abort the camera's run; the caller has to fix
    /// the inputs before retrying.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Spec(_)
                | Self::Detect(DetectError::ResolutionMismatch { .. })
                | Self::Aggregate(AggregateError::ImageSizeMismatch { .. })
                | Self::MissingManifest { .. }
                | Self::NoIntrinsicsTrial(_)
                | Self::NoExtrinsicsTrial(_)
                | Self::NoProfile(_)
                | Self::IntrinsicsResolution { .. }
                | Self::Config(_)
        )
    }
}
