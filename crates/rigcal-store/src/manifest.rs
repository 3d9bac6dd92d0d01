//! Trial manifest: which trials, with which target, produced an estimate.

use crate::error::StoreError;
use crate::records::{decode_versioned, FORMAT_VERSION};
use crate::store::check_component;
use rigcal_core::{CheckerboardSpec, TrialRole};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialEntry {
    pub id: String,
    #[serde(default)]
    pub role: TrialRole,
}

impl TrialEntry {
    pub fn new(id: impl Into<String>, role: TrialRole) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }
}

/// Ordered trial list plus the target and camera model they were recorded with.
///
/// Written after aggregation; read back to rerun a calibration without
/// re-entering its parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrialManifest {
    pub format_version: u32,
    pub camera_model: String,
    pub checkerboard: CheckerboardSpec,
    pub trials: Vec<TrialEntry>,
}

impl TrialManifest {
    pub fn new(
        camera_model: impl Into<String>,
        checkerboard: CheckerboardSpec,
        trials: Vec<TrialEntry>,
    ) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            camera_model: camera_model.into(),
            checkerboard,
            trials,
        }
    }

    /// Trials of a given role, in manifest order.
    pub fn trials_with_role(&self, role: TrialRole) -> impl Iterator<Item = &TrialEntry> + '_ {
        self.trials.iter().filter(move |t| t.role == role)
    }

    /// Load and validate a manifest file. A missing file is `NotFound`.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    key: path.display().to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        let manifest: Self = decode_versioned(path, serde_json::from_str(&raw)?)?;
        manifest.validate(path)?;
        Ok(manifest)
    }

    pub(crate) fn validate(&self, path: &Path) -> Result<(), StoreError> {
        let malformed = |reason: String| StoreError::Malformed {
            path: path.to_path_buf(),
            reason,
        };
        self.checkerboard
            .validate()
            .map_err(|e| malformed(e.to_string()))?;
        if self.trials.is_empty() {
            return Err(malformed("manifest lists no trials".into()));
        }
        // Trial ids name per-trial files next to the manifest.
        if let Some(t) = self.trials.iter().find(|t| check_component(&t.id).is_err()) {
            return Err(malformed(format!("trial id {:?} is not a plain name", t.id)));
        }
        Ok(())
    }
}
