//! In-process analysis result store.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use uuid::Uuid;

use super::{AnalysisFilter, AnalysisRecord, AnalysisStore, RepositoryRollup, StorageError};

#[derive(Debug, Default)]
pub struct MemoryAnalysisStore {
    records: RwLock<HashMap<Uuid, AnalysisRecord>>,
    rollups: RwLock<HashMap<String, RepositoryRollup>>,
}

impl MemoryAnalysisStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().expect("analysis store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AnalysisStore for MemoryAnalysisStore {
    async fn save(&self, record: &AnalysisRecord) -> Result<Uuid, StorageError> {
        let mut records = self.records.write().expect("analysis store lock poisoned");
        let existing = records
            .values()
            .find(|r| {
                r.kind == record.kind
                    && r.repository == record.repository
                    && r.revision == record.revision
            })
            .map(|r| r.id);

        let mut stored = record.clone();
        if let Some(id) = existing {
            stored.id = id;
        }
        let id = stored.id;
        records.insert(id, stored);
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<AnalysisRecord>, StorageError> {
        Ok(self
            .records
            .read()
            .expect("analysis store lock poisoned")
            .get(&id)
            .cloned())
    }

    async fn find(&self, filter: &AnalysisFilter) -> Result<Vec<AnalysisRecord>, StorageError> {
        let records = self.records.read().expect("analysis store lock poisoned");
        let mut matching: Vec<AnalysisRecord> =
            records.values().filter(|r| filter.matches(r)).cloned().collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(filter.limit);
        Ok(matching)
    }

    async fn put_rollup(&self, rollup: &RepositoryRollup) -> Result<(), StorageError> {
        self.rollups
            .write()
            .expect("analysis store lock poisoned")
            .insert(rollup.repository.clone(), rollup.clone());
        Ok(())
    }

    async fn get_rollup(&self, repository: &str) -> Result<Option<RepositoryRollup>, StorageError> {
        Ok(self
            .rollups
            .read()
            .expect("analysis store lock poisoned")
            .get(repository)
            .cloned())
    }
}
