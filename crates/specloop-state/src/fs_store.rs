//! Filesystem-backed spec store.
//!
//! Layout:
//!
//! ```text
//! <root>/specs/<spec_id>.json
//! <root>/iterations/<spec_id>/<seq:08>.json
//! ```
//!
//! Every file is written to a temp file in the target directory and then
//! renamed into place, so readers never see a partial record.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::StorageError;
use crate::model::{IterationId, IterationRecord, SpecId, Specification};
use crate::storage_traits::{ensure_valid, SpecStore, StorageResult};

/// JSON-file spec store, the local fallback when no database is configured.
#[derive(Debug, Clone)]
pub struct FsSpecStore {
    root: PathBuf,
    // Serializes sequence-number allocation for appends in this process.
    append_lock: Arc<Mutex<()>>,
}

impl FsSpecStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("specs"))?;
        fs::create_dir_all(root.join("iterations"))?;
        Ok(Self {
            root,
            append_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn spec_path(root: &Path, spec_id: &SpecId) -> PathBuf {
        root.join("specs").join(format!("{}.json", spec_id.as_str()))
    }

    fn iterations_dir(root: &Path, spec_id: &SpecId) -> PathBuf {
        root.join("iterations").join(spec_id.as_str())
    }

    async fn blocking<T, F>(f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> StorageResult<T> + Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| StorageError::Backend(format!("blocking task failed: {e}")))?
    }
}

fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> StorageResult<()> {
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StorageError::Io(e.error))?;
    Ok(())
}

fn read_records(dir: &Path) -> StorageResult<Vec<(String, IterationRecord)>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut records = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let bytes = fs::read(&path)?;
        records.push((name, serde_json::from_slice(&bytes)?));
    }
    Ok(records)
}

#[async_trait]
impl SpecStore for FsSpecStore {
    async fn get_spec(&self, spec_id: &SpecId) -> StorageResult<Specification> {
        ensure_valid(spec_id)?;
        let path = Self::spec_path(&self.root, spec_id);
        let id = spec_id.0.clone();
        Self::blocking(move || {
            let bytes = fs::read(&path).map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    StorageError::NotFound { spec_id: id }
                } else {
                    StorageError::Io(e)
                }
            })?;
            Ok(serde_json::from_slice(&bytes)?)
        })
        .await
    }

    async fn put_spec(&self, spec_id: &SpecId, spec: &Specification) -> StorageResult<()> {
        ensure_valid(spec_id)?;
        let dir = self.root.join("specs");
        let path = Self::spec_path(&self.root, spec_id);
        let bytes = serde_json::to_vec_pretty(spec)?;
        debug!(spec_id = %spec_id, "writing spec file");
        Self::blocking(move || write_atomic(&dir, &path, &bytes)).await
    }

    async fn save_iteration(&self, record: &IterationRecord) -> StorageResult<IterationId> {
        ensure_valid(&record.spec_id)?;
        let dir = Self::iterations_dir(&self.root, &record.spec_id);
        let bytes = serde_json::to_vec_pretty(record)?;
        let iter_id = record.iter_id.clone();
        let lock = Arc::clone(&self.append_lock);

        Self::blocking(move || {
            let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
            let existing = read_records(&dir)?;
            if existing.iter().any(|(_, r)| r.iter_id == iter_id) {
                return Err(StorageError::DuplicateIteration { iter_id: iter_id.0 });
            }
            let path = dir.join(format!("{:08}.json", existing.len()));
            write_atomic(&dir, &path, &bytes)?;
            Ok(iter_id)
        })
        .await
    }

    async fn get_iterations(&self, spec_id: &SpecId) -> StorageResult<Vec<IterationRecord>> {
        ensure_valid(spec_id)?;
        let dir = Self::iterations_dir(&self.root, spec_id);
        Self::blocking(move || {
            let mut records = read_records(&dir)?;
            // File names carry the append sequence; timestamps order first.
            records.sort_by(|(na, a), (nb, b)| a.timestamp.cmp(&b.timestamp).then(na.cmp(nb)));
            Ok(records.into_iter().map(|(_, r)| r).collect())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IterationKind;

    fn make_store() -> (tempfile::TempDir, FsSpecStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsSpecStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn spec_file_lands_under_specs_dir() {
        let (dir, store) = make_store();
        let spec = Specification::new(SpecId::from("spec_fs"));
        store.put_spec(&spec.spec_id, &spec).await.unwrap();
        assert!(dir.path().join("specs").join("spec_fs.json").exists());
    }

    #[tokio::test]
    async fn iterations_get_sequential_file_names() {
        let (dir, store) = make_store();
        let spec = Specification::new(SpecId::from("spec_seq"));
        for i in 0..3 {
            let record = IterationRecord::new(
                IterationKind::Refinement,
                Some(i),
                None,
                spec.clone(),
                "prompt",
                Some(0.5),
            );
            store.save_iteration(&record).await.unwrap();
        }
        let iter_dir = dir.path().join("iterations").join("spec_seq");
        assert!(iter_dir.join("00000000.json").exists());
        assert!(iter_dir.join("00000002.json").exists());
    }

    #[tokio::test]
    async fn path_traversal_ids_are_rejected() {
        let (_dir, store) = make_store();
        let err = store.get_spec(&SpecId::from("../escape")).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidSpecId { .. }));
    }

    #[tokio::test]
    async fn missing_history_is_empty() {
        let (_dir, store) = make_store();
        let history = store.get_iterations(&SpecId::from("spec_none")).await.unwrap();
        assert!(history.is_empty());
    }
}
