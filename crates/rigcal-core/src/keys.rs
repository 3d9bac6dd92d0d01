//! Addressing keys for stored calibration records.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Intrinsics are a property of the device/lens/firmware combination, so they
/// are addressed by camera model and deployment profile (e.g. `720_60fps`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeploymentKey {
    pub camera_model: String,
    pub profile: String,
}

impl DeploymentKey {
    pub fn new(camera_model: impl Into<String>, profile: impl Into<String>) -> Self {
        Self {
            camera_model: camera_model.into(),
            profile: profile.into(),
        }
    }
}

impl fmt::Display for DeploymentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.camera_model, self.profile)
    }
}

/// Extrinsics depend on rig placement, so they are addressed per session and
/// camera slot.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionCameraKey {
    pub session: String,
    pub camera: String,
}

impl SessionCameraKey {
    pub fn new(session: impl Into<String>, camera: impl Into<String>) -> Self {
        Self {
            session: session.into(),
            camera: camera.into(),
        }
    }
}

impl fmt::Display for SessionCameraKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.session, self.camera)
    }
}
