use crate::error::StoreError;
use crate::manifest::TrialManifest;
use crate::records::{
    decode_extrinsics, decode_intrinsics, decode_versioned, ComparisonRecord, ExtrinsicsRecord,
    IntrinsicsRecord,
};
use log::{debug, info};
use rigcal_core::{
    CameraExtrinsics, CameraIntrinsics, ComparisonTolerance, DeploymentKey, IntrinsicComparison,
    SessionCameraKey,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

const INTRINSICS_FILE: &str = "intrinsics.json";
const COMPARISON_FILE: &str = "comparison.json";
const MANIFEST_FILE: &str = "manifest.json";
const EXTRINSICS_FILE: &str = "extrinsics.json";

/// Filesystem-backed calibration store.
///
/// Layout under the root directory:
///
/// ```text
/// intrinsics/<camera model>/<profile>/intrinsics.json
///                                    /comparison.json
///                                    /manifest.json
/// sessions/<session>/<camera>/extrinsics.json
/// ```
///
/// Records are written to a temporary file in the target directory and
/// renamed into place, so readers see either the old or the new record.
/// Writers to the same key are serialized; different keys do not contend.
#[derive(Debug)]
pub struct CalibrationStore {
    root: PathBuf,
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

/// Reject key components that could escape their directory.
pub(crate) fn check_component(part: &str) -> Result<&str, StoreError> {
    let bad = part.is_empty()
        || part == "."
        || part == ".."
        || part.contains(['/', '\\', '\0'])
        || part.trim() != part;
    if bad {
        return Err(StoreError::InvalidKey(part.to_string()));
    }
    Ok(part)
}

impl CalibrationStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn deployment_dir(&self, key: &DeploymentKey) -> Result<PathBuf, StoreError> {
        Ok(self
            .root
            .join("intrinsics")
            .join(check_component(&key.camera_model)?)
            .join(check_component(&key.profile)?))
    }

    fn session_dir(&self, key: &SessionCameraKey) -> Result<PathBuf, StoreError> {
        Ok(self
            .root
            .join("sessions")
            .join(check_component(&key.session)?)
            .join(check_component(&key.camera)?))
    }

    pub fn intrinsics_path(&self, key: &DeploymentKey) -> Result<PathBuf, StoreError> {
        Ok(self.deployment_dir(key)?.join(INTRINSICS_FILE))
    }

    pub fn manifest_path(&self, key: &DeploymentKey) -> Result<PathBuf, StoreError> {
        Ok(self.deployment_dir(key)?.join(MANIFEST_FILE))
    }

    pub fn extrinsics_path(&self, key: &SessionCameraKey) -> Result<PathBuf, StoreError> {
        Ok(self.session_dir(key)?.join(EXTRINSICS_FILE))
    }

    /// Run `write` while holding the locks of every directory in `dirs`.
    ///
    /// Locks are taken in path order, so overlapping callers cannot deadlock.
    /// Entries no other writer holds are dropped from the lock table afterwards.
    fn with_dir_locks<R>(
        &self,
        dirs: &[PathBuf],
        write: impl FnOnce() -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let mut ordered: Vec<&PathBuf> = dirs.iter().collect();
        ordered.sort();
        ordered.dedup();

        let held: Vec<Arc<Mutex<()>>> = {
            let mut table = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            ordered
                .iter()
                .map(|dir| table.entry((*dir).clone()).or_default().clone())
                .collect()
        };
        let result = {
            let _guards: Vec<_> = held
                .iter()
                .map(|l| l.lock().unwrap_or_else(PoisonError::into_inner))
                .collect();
            write()
        };
        drop(held);

        let mut table = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        for dir in ordered {
            if table.get(dir).is_some_and(|l| Arc::strong_count(l) == 1) {
                table.remove(dir);
            }
        }
        result
    }

    /// Atomically replace `path`. Callers hold the lock of its directory.
    fn persist<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(value)?;
        let parent = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent)?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| StoreError::Persist {
            path: path.to_path_buf(),
            source: e.error,
        })?;
        debug!("wrote {}", path.display());
        Ok(())
    }

    fn write_atomic<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), StoreError> {
        let dir = path.parent().unwrap_or(&self.root).to_path_buf();
        self.with_dir_locks(&[dir], || self.persist(path, value))
    }

    fn profile_keys<S: AsRef<str>>(
        &self,
        camera_model: &str,
        profiles: &[S],
    ) -> Result<Vec<(DeploymentKey, PathBuf)>, StoreError> {
        profiles
            .iter()
            .map(|p| {
                let key = DeploymentKey::new(camera_model, p.as_ref());
                self.deployment_dir(&key).map(|dir| (key, dir))
            })
            .collect()
    }

    fn read_value(&self, path: &Path, key: &dyn std::fmt::Display) -> Result<Value, StoreError> {
        match fs::read(path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub fn put_intrinsics(
        &self,
        key: &DeploymentKey,
        intrinsics: &CameraIntrinsics,
    ) -> Result<PathBuf, StoreError> {
        let path = self.intrinsics_path(key)?;
        self.write_atomic(&path, &IntrinsicsRecord::from_intrinsics(intrinsics))?;
        info!("stored intrinsics for {key}");
        Ok(path)
    }

    /// Store the same intrinsics under several deployment profiles of one model.
    pub fn put_intrinsics_for_profiles<S: AsRef<str>>(
        &self,
        camera_model: &str,
        profiles: &[S],
        intrinsics: &CameraIntrinsics,
    ) -> Result<Vec<PathBuf>, StoreError> {
        // Validate every key before writing any of them.
        let keys = self.profile_keys(camera_model, profiles)?;
        keys.iter()
            .map(|(key, _)| self.put_intrinsics(key, intrinsics))
            .collect()
    }

    /// Store the outcome of one intrinsic run under every profile: the
    /// averaged intrinsics, the trial comparison and the trial manifest.
    ///
    /// All profiles are locked for the duration of the write, so the three
    /// records of a key always come from the same run even when runs for
    /// that key race. Nothing is written if a key or the manifest is invalid.
    pub fn put_intrinsics_run<S: AsRef<str>>(
        &self,
        camera_model: &str,
        profiles: &[S],
        intrinsics: &CameraIntrinsics,
        comparison: &IntrinsicComparison,
        tolerance: ComparisonTolerance,
        manifest: &TrialManifest,
    ) -> Result<Vec<PathBuf>, StoreError> {
        let keys = self.profile_keys(camera_model, profiles)?;
        for (_, dir) in &keys {
            manifest.validate(&dir.join(MANIFEST_FILE))?;
        }
        let dirs: Vec<PathBuf> = keys.iter().map(|(_, dir)| dir.clone()).collect();
        let record = IntrinsicsRecord::from_intrinsics(intrinsics);

        let stored = self.with_dir_locks(&dirs, || {
            let mut stored = Vec::with_capacity(keys.len());
            for (key, dir) in &keys {
                let path = dir.join(INTRINSICS_FILE);
                self.persist(&path, &record)?;
                let audit = ComparisonRecord::new(key, comparison.clone(), tolerance);
                self.persist(&dir.join(COMPARISON_FILE), &audit)?;
                self.persist(&dir.join(MANIFEST_FILE), manifest)?;
                stored.push(path);
            }
            Ok(stored)
        })?;
        for (key, _) in &keys {
            info!("stored intrinsics run for {key}");
        }
        Ok(stored)
    }

    /// Stored intrinsics, or `NotFound` if the key was never written.
    pub fn get_intrinsics(&self, key: &DeploymentKey) -> Result<CameraIntrinsics, StoreError> {
        let path = self.intrinsics_path(key)?;
        let value = self.read_value(&path, key)?;
        Ok(decode_intrinsics(&path, value)?.to_intrinsics())
    }

    pub fn put_comparison(
        &self,
        key: &DeploymentKey,
        record: &ComparisonRecord,
    ) -> Result<PathBuf, StoreError> {
        let path = self.deployment_dir(key)?.join(COMPARISON_FILE);
        self.write_atomic(&path, record)?;
        Ok(path)
    }

    pub fn get_comparison(&self, key: &DeploymentKey) -> Result<ComparisonRecord, StoreError> {
        let path = self.deployment_dir(key)?.join(COMPARISON_FILE);
        let value = self.read_value(&path, key)?;
        decode_versioned(&path, value)
    }

    pub fn put_manifest(
        &self,
        key: &DeploymentKey,
        manifest: &TrialManifest,
    ) -> Result<PathBuf, StoreError> {
        let path = self.manifest_path(key)?;
        manifest.validate(&path)?;
        self.write_atomic(&path, manifest)?;
        Ok(path)
    }

    pub fn get_manifest(&self, key: &DeploymentKey) -> Result<TrialManifest, StoreError> {
        let path = self.manifest_path(key)?;
        let value = self.read_value(&path, key)?;
        let manifest: TrialManifest = decode_versioned(&path, value)?;
        manifest.validate(&path)?;
        Ok(manifest)
    }

    /// Store a session camera's pose, optionally with the intrinsics it was
    /// solved against so the session record is self-contained.
    pub fn put_extrinsics(
        &self,
        key: &SessionCameraKey,
        extrinsics: &CameraExtrinsics,
        intrinsics: Option<&CameraIntrinsics>,
    ) -> Result<PathBuf, StoreError> {
        let path = self.extrinsics_path(key)?;
        self.write_atomic(&path, &ExtrinsicsRecord::new(extrinsics, intrinsics))?;
        info!("stored extrinsics for {key}");
        Ok(path)
    }

    pub fn get_extrinsics_record(&self, key: &SessionCameraKey) -> Result<ExtrinsicsRecord, StoreError> {
        let path = self.extrinsics_path(key)?;
        let value = self.read_value(&path, key)?;
        decode_extrinsics(&path, value)
    }

    /// Stored pose, or `NotFound` if the key was never written.
    pub fn get_extrinsics(&self, key: &SessionCameraKey) -> Result<CameraExtrinsics, StoreError> {
        let path = self.extrinsics_path(key)?;
        self.get_extrinsics_record(key)?.to_extrinsics(&path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_table_is_emptied_after_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = CalibrationStore::open(dir.path()).unwrap();
        let size = rigcal_core::ImageSize::new(1280, 720);
        let cam = CameraIntrinsics::pinhole(1000.0, 1000.0, 640.0, 360.0, size);
        for profile in ["a", "b", "c"] {
            store
                .put_intrinsics(&DeploymentKey::new("cam", profile), &cam)
                .unwrap();
        }
        store.put_intrinsics_for_profiles("cam", &["a", "d"], &cam).unwrap();
        assert!(store.locks.lock().unwrap().is_empty());
    }

    #[test]
    fn key_components_are_checked() {
        for bad in ["", ".", "..", "a/b", "a\\b", " x"] {
            assert!(check_component(bad).is_err(), "{bad:?}");
        }
        for good in ["SONY-RX0", "720_60fps", "Cam4b", "session.2024"] {
            assert!(check_component(good).is_ok(), "{good:?}");
        }
    }
}
