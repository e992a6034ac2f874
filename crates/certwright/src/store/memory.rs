//! In-process backend

use async_trait::async_trait;
use dashmap::DashMap;

use super::{StoreBackend, StoreEntry};
use crate::error::StorageError;

/// Concurrent map backend; contents are lost on restart
#[derive(Debug, Default)]
pub struct MemoryBackend {
    name: String,
    entries: DashMap<String, Vec<u8>>,
}

impl MemoryBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn save(&self, key: &str, entry: &StoreEntry) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), entry.data.clone());
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }
}
