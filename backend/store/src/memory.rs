use std::collections::HashMap;

use crate::{StorageError, StorageTier, TierKind};

#[derive(Default)]
pub struct MemoryTier {
    entries: HashMap<String, String>,
}

impl StorageTier for MemoryTier {
    fn kind(&self) -> TierKind {
        TierKind::Memory
    }

    fn get(&mut self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }
}
