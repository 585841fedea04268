use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::collab::{Blacklist, RecordStore};
use crate::record::ItemRecord;

#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<Vec<ItemRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<ItemRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn add_batch(&self, records: &[ItemRecord]) -> anyhow::Result<()> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(records);
        Ok(())
    }

    async fn get_all(&self) -> anyhow::Result<Vec<ItemRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

#[derive(Debug, Default)]
pub struct MemoryBlacklist {
    ids: Mutex<HashSet<String>>,
}

impl MemoryBlacklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(&self) -> HashSet<String> {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Blacklist for MemoryBlacklist {
    async fn contains(&self, id: &str) -> anyhow::Result<bool> {
        Ok(self
            .ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id))
    }

    async fn add(&self, ids: &[String]) -> anyhow::Result<()> {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(ids.iter().cloned());
        Ok(())
    }
}
