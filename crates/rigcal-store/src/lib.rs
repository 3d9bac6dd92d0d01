//! Persistence of calibration results.
//!
//! Intrinsics live per [`DeploymentKey`](rigcal_core::DeploymentKey) and are
//! shared by every session using that camera model and profile; extrinsics
//! live per [`SessionCameraKey`](rigcal_core::SessionCameraKey). All records
//! are versioned JSON documents written atomically.

mod error;
mod manifest;
mod metadata;
mod records;
mod store;

pub use error::StoreError;
pub use manifest::{TrialEntry, TrialManifest};
pub use metadata::{CheckerboardMetadata, SessionMetadata};
pub use records::{ComparisonRecord, ExtrinsicsRecord, IntrinsicsRecord, FORMAT_VERSION};
pub use store::CalibrationStore;
