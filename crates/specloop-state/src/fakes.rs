//! In-memory fakes for the storage trait (testing only)
//!
//! `MemorySpecStore` satisfies the [`SpecStore`] contract without any
//! external dependency. Both maps sit behind one mutex so a record append
//! is never observed half-written.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::model::{IterationId, IterationRecord, SpecId, Specification};
use crate::storage_traits::{ensure_valid, SpecStore, StorageResult};

#[derive(Debug, Default)]
struct Inner {
    specs: HashMap<SpecId, Specification>,
    iterations: HashMap<SpecId, Vec<IterationRecord>>,
    iter_ids: HashSet<String>,
}

/// In-memory spec store backed by `HashMap`s.
#[derive(Debug, Default)]
pub struct MemorySpecStore {
    inner: Mutex<Inner>,
}

impl MemorySpecStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of iteration records across all specs.
    pub fn iteration_count(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.iterations.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl SpecStore for MemorySpecStore {
    async fn get_spec(&self, spec_id: &SpecId) -> StorageResult<Specification> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .specs
            .get(spec_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                spec_id: spec_id.0.clone(),
            })
    }

    async fn put_spec(&self, spec_id: &SpecId, spec: &Specification) -> StorageResult<()> {
        ensure_valid(spec_id)?;
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.specs.insert(spec_id.clone(), spec.clone());
        Ok(())
    }

    async fn save_iteration(&self, record: &IterationRecord) -> StorageResult<IterationId> {
        ensure_valid(&record.spec_id)?;
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if !inner.iter_ids.insert(record.iter_id.0.clone()) {
            return Err(StorageError::DuplicateIteration {
                iter_id: record.iter_id.0.clone(),
            });
        }
        inner
            .iterations
            .entry(record.spec_id.clone())
            .or_default()
            .push(record.clone());
        Ok(record.iter_id.clone())
    }

    async fn get_iterations(&self, spec_id: &SpecId) -> StorageResult<Vec<IterationRecord>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut records = inner.iterations.get(spec_id).cloned().unwrap_or_default();
        // Stable sort keeps insertion order for equal timestamps.
        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }
}
