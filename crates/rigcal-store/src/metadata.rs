//! Session metadata schema.

use crate::error::StoreError;
use rigcal_core::{CheckerboardSpec, SpecError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// Checkerboard block of a session metadata file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckerboardMetadata {
    #[serde(rename = "black2BlackCornersWidth_n")]
    pub corners_width: u32,
    #[serde(rename = "black2BlackCornersHeight_n")]
    pub corners_height: u32,
    #[serde(rename = "squareSideLength_mm")]
    pub square_side_mm: f64,
}

impl CheckerboardMetadata {
    pub fn to_spec(&self) -> Result<CheckerboardSpec, SpecError> {
        CheckerboardSpec::new(self.corners_width, self.corners_height, self.square_side_mm)
    }
}

/// Per-session metadata. Both blocks are optional; a present block must be
/// complete and valid.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    #[serde(rename = "checkerBoard", default, skip_serializing_if = "Option::is_none")]
    pub checkerboard: Option<CheckerboardMetadata>,
    #[serde(rename = "cameraModel", default, skip_serializing_if = "Option::is_none")]
    pub camera_model: Option<String>,
}

impl SessionMetadata {
    /// Read metadata from `path`; `Ok(None)` if the file does not exist.
    /// Malformed or invalid content is an error.
    pub fn load_optional(path: impl AsRef<Path>) -> Result<Option<Self>, StoreError> {
        let path = path.as_ref();
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let meta: Self = serde_json::from_str(&raw)?;
        if let Some(board) = &meta.checkerboard {
            board.to_spec().map_err(|e| StoreError::Malformed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        }
        Ok(Some(meta))
    }

    /// The session's checkerboard, or `default` when the block is absent.
    pub fn checkerboard_or(&self, default: CheckerboardSpec) -> Result<CheckerboardSpec, SpecError> {
        match &self.checkerboard {
            Some(board) => board.to_spec(),
            None => Ok(default),
        }
    }
}
