//! On-disk record schemas.
//!
//! Every record carries a `format_version`. Records written before
//! versioning (no `format_version` field) are read through a migration from
//! their loose key layout; records from a newer format are refused.

use crate::error::StoreError;
use log::warn;
use nalgebra::{Matrix3, Vector3};
use rigcal_core::{
    CameraExtrinsics, CameraIntrinsics, ComparisonTolerance, DeploymentKey, Distortion, ImageSize,
    IntrinsicComparison,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// Current record format.
pub const FORMAT_VERSION: u32 = 1;

/// Stored intrinsics of one deployment key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntrinsicsRecord {
    pub format_version: u32,
    /// Row-major camera matrix.
    pub camera_matrix: [[f64; 3]; 3],
    /// `[k1, k2, p1, p2, k3]`.
    pub distortion: [f64; Distortion::LEN],
    pub image_size: ImageSize,
    pub reprojection_error: f64,
}

impl IntrinsicsRecord {
    pub fn from_intrinsics(c: &CameraIntrinsics) -> Self {
        let k = c.camera_matrix();
        Self {
            format_version: FORMAT_VERSION,
            camera_matrix: [
                [k[(0, 0)], k[(0, 1)], k[(0, 2)]],
                [k[(1, 0)], k[(1, 1)], k[(1, 2)]],
                [k[(2, 0)], k[(2, 1)], k[(2, 2)]],
            ],
            distortion: c.distortion.to_array(),
            image_size: c.image_size,
            reprojection_error: c.reprojection_error,
        }
    }

    pub fn to_intrinsics(&self) -> CameraIntrinsics {
        let m = &self.camera_matrix;
        let k = Matrix3::new(
            m[0][0], m[0][1], m[0][2], m[1][0], m[1][1], m[1][2], m[2][0], m[2][1], m[2][2],
        );
        CameraIntrinsics::from_camera_matrix(
            &k,
            Distortion::from_array(self.distortion),
            self.image_size,
            self.reprojection_error,
        )
    }
}

/// Per-session pose of one camera, with the intrinsics it was solved against.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExtrinsicsRecord {
    pub format_version: u32,
    pub reference_frame: String,
    pub rotation: [[f64; 3]; 3],
    pub translation: [f64; 3],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intrinsics: Option<IntrinsicsRecord>,
}

impl ExtrinsicsRecord {
    pub fn new(extrinsics: &CameraExtrinsics, intrinsics: Option<&CameraIntrinsics>) -> Self {
        let r = &extrinsics.rotation;
        let t = &extrinsics.translation;
        Self {
            format_version: FORMAT_VERSION,
            reference_frame: extrinsics.reference_frame.clone(),
            rotation: [
                [r[(0, 0)], r[(0, 1)], r[(0, 2)]],
                [r[(1, 0)], r[(1, 1)], r[(1, 2)]],
                [r[(2, 0)], r[(2, 1)], r[(2, 2)]],
            ],
            translation: [t.x, t.y, t.z],
            intrinsics: intrinsics.map(IntrinsicsRecord::from_intrinsics),
        }
    }

    /// Validated pose. Fails if the stored rotation is not a rotation.
    pub fn to_extrinsics(&self, path: &Path) -> Result<CameraExtrinsics, StoreError> {
        let m = &self.rotation;
        let r = Matrix3::new(
            m[0][0], m[0][1], m[0][2], m[1][0], m[1][1], m[1][2], m[2][0], m[2][1], m[2][2],
        );
        let t = Vector3::from(self.translation);
        CameraExtrinsics::new(r, t, self.reference_frame.clone()).map_err(|e| {
            StoreError::Malformed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })
    }
}

/// Audit trail of one aggregation run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRecord {
    pub format_version: u32,
    pub key: DeploymentKey,
    /// Trials that produced the stored intrinsics, in aggregation order.
    pub trial_ids: Vec<String>,
    pub tolerance: ComparisonTolerance,
    pub flagged: Vec<String>,
    pub comparison: IntrinsicComparison,
}

impl ComparisonRecord {
    pub fn new(key: &DeploymentKey, comparison: IntrinsicComparison, tolerance: ComparisonTolerance) -> Self {
        let flagged = comparison
            .flagged(&tolerance)
            .into_iter()
            .map(str::to_string)
            .collect();
        Self {
            format_version: FORMAT_VERSION,
            key: key.clone(),
            trial_ids: comparison.trials.iter().map(|d| d.trial_id.clone()).collect(),
            tolerance,
            flagged,
            comparison,
        }
    }
}

fn malformed(path: &Path, reason: impl Into<String>) -> StoreError {
    StoreError::Malformed {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// `Some(version)` for versioned records, `None` for pre-versioning ones.
pub(crate) fn record_version(path: &Path, value: &Value) -> Result<Option<u32>, StoreError> {
    let Some(v) = value.get("format_version") else {
        return Ok(None);
    };
    let found = v
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| malformed(path, "format_version is not an unsigned integer"))?;
    if found > FORMAT_VERSION {
        return Err(StoreError::UnsupportedVersion {
            path: path.to_path_buf(),
            found,
            supported: FORMAT_VERSION,
        });
    }
    Ok(Some(found))
}

/// Decode a versioned record of the current format.
pub(crate) fn decode_versioned<T: DeserializeOwned>(path: &Path, value: Value) -> Result<T, StoreError> {
    match record_version(path, &value)? {
        Some(_) => Ok(serde_json::from_value(value)?),
        None => Err(malformed(path, "missing format_version")),
    }
}

/// All numbers of a (possibly nested) JSON array, row-major.
fn numbers(value: &Value) -> Option<Vec<f64>> {
    match value {
        Value::Number(n) => n.as_f64().map(|x| vec![x]),
        Value::Array(items) => {
            let mut out = Vec::new();
            for item in items {
                out.extend(numbers(item)?);
            }
            Some(out)
        }
        _ => None,
    }
}

fn legacy_field<'a>(path: &Path, value: &'a Value, name: &str) -> Result<&'a Value, StoreError> {
    value
        .get(name)
        .ok_or_else(|| malformed(path, format!("legacy record lacks `{name}`")))
}

fn legacy_numbers(path: &Path, value: &Value, name: &str, len: usize) -> Result<Vec<f64>, StoreError> {
    let v = numbers(legacy_field(path, value, name)?)
        .ok_or_else(|| malformed(path, format!("`{name}` is not numeric")))?;
    if v.len() < len {
        return Err(malformed(
            path,
            format!("`{name}` has {} values, expected {len}", v.len()),
        ));
    }
    Ok(v)
}

/// Intrinsics written before versioning: `intrinsicMat` (3x3),
/// `distortion` (1x5 or longer, extra terms dropped) and `imageSize`
/// as a column `[[height], [width]]`.
fn legacy_intrinsics(path: &Path, value: &Value) -> Result<IntrinsicsRecord, StoreError> {
    let k = legacy_numbers(path, value, "intrinsicMat", 9)?;
    let d = legacy_numbers(path, value, "distortion", Distortion::LEN)?;
    let size = legacy_numbers(path, value, "imageSize", 2)?;
    if size[0] < 1.0 || size[1] < 1.0 {
        return Err(malformed(path, "`imageSize` is not a valid resolution"));
    }
    let reprojection_error = match value.get("reprojectionError").and_then(numbers) {
        Some(v) if !v.is_empty() => v[0],
        _ => {
            warn!("{}: legacy record has no reprojection error, using 0", path.display());
            0.0
        }
    };
    Ok(IntrinsicsRecord {
        format_version: 0,
        camera_matrix: [[k[0], k[1], k[2]], [k[3], k[4], k[5]], [k[6], k[7], k[8]]],
        distortion: [d[0], d[1], d[2], d[3], d[4]],
        image_size: ImageSize::new(size[1] as u32, size[0] as u32),
        reprojection_error,
    })
}

pub(crate) fn decode_intrinsics(path: &Path, value: Value) -> Result<IntrinsicsRecord, StoreError> {
    match record_version(path, &value)? {
        Some(_) => Ok(serde_json::from_value(value)?),
        None => {
            warn!("{}: migrating unversioned intrinsics record", path.display());
            legacy_intrinsics(path, &value)
        }
    }
}

/// Combined intrinsics+extrinsics written before versioning: `rotation`
/// (3x3), `translation` (3 values, any nesting) and optionally the legacy
/// intrinsic fields.
pub(crate) fn decode_extrinsics(path: &Path, value: Value) -> Result<ExtrinsicsRecord, StoreError> {
    if record_version(path, &value)?.is_some() {
        return Ok(serde_json::from_value(value)?);
    }
    warn!("{}: migrating unversioned extrinsics record", path.display());
    let r = legacy_numbers(path, &value, "rotation", 9)?;
    let t = legacy_numbers(path, &value, "translation", 3)?;
    let intrinsics = if value.get("intrinsicMat").is_some() {
        Some(legacy_intrinsics(path, &value)?)
    } else {
        None
    };
    Ok(ExtrinsicsRecord {
        format_version: 0,
        reference_frame: "world".to_string(),
        rotation: [[r[0], r[1], r[2]], [r[3], r[4], r[5]], [r[6], r[7], r[8]]],
        translation: [t[0], t[1], t[2]],
        intrinsics,
    })
}
