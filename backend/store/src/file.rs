//! # File Tier
//!
//! Persistent tier. One JSON object per file, `{ key: value }`.
//!
//! - Every read goes back to disk, so a file wiped by something else is seen
//!   immediately instead of being served from a stale in-memory copy
//! - Writes land in a sibling temp file first and are renamed over the original
//! - A missing file is an empty tier, not an error
use std::{
    fs,
    io::ErrorKind,
    path::PathBuf,
};

use serde_json::{Map, Value};

use crate::{StorageError, StorageTier, TierKind};

pub struct FileTier {
    path: PathBuf,
}

impl FileTier {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_map(&self) -> Result<Map<String, Value>, StorageError> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };

        if data.trim().is_empty() {
            return Ok(Map::new());
        }

        Ok(serde_json::from_str(&data)?)
    }

    fn write_map(&self, map: &Map<String, Value>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let temp = self.path.with_extension("tmp");
        fs::write(&temp, serde_json::to_vec(map)?)?;
        fs::rename(&temp, &self.path)?;

        Ok(())
    }
}

impl StorageTier for FileTier {
    fn kind(&self) -> TierKind {
        TierKind::Persistent
    }

    fn get(&mut self, key: &str) -> Result<Option<String>, StorageError> {
        let map = self.read_map()?;

        Ok(map.get(key).and_then(Value::as_str).map(str::to_string))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        // a corrupt file is replaced rather than blocking every future write
        let mut map = self.read_map().unwrap_or_default();
        map.insert(key.to_string(), Value::String(value.to_string()));

        self.write_map(&map)
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        let mut map = match self.read_map() {
            Ok(map) => map,
            Err(StorageError::Corrupt(_)) => Map::new(),
            Err(e) => return Err(e),
        };

        if map.remove(key).is_none() {
            return Ok(());
        }

        self.write_map(&map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut tier = FileTier::new(dir.path().join("absent.json"));

        assert_eq!(tier.get("anything").unwrap(), None);
    }

    #[test]
    fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");

        FileTier::new(&path).set("auth.user", r#"{"id":"42"}"#).unwrap();

        let mut reopened = FileTier::new(&path);
        assert_eq!(
            reopened.get("auth.user").unwrap().as_deref(),
            Some(r#"{"id":"42"}"#)
        );
    }

    #[test]
    fn test_external_wipe_is_observed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let mut tier = FileTier::new(&path);

        tier.set("k", "v").unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(tier.get("k").unwrap(), None);
    }

    #[test]
    fn test_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, "not json").unwrap();
        let mut tier = FileTier::new(&path);

        assert!(matches!(tier.get("k"), Err(StorageError::Corrupt(_))));

        tier.set("k", "v").unwrap();
        assert_eq!(tier.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_remove() {
        let dir = tempfile::tempdir().unwrap();
        let mut tier = FileTier::new(dir.path().join("session.json"));

        tier.set("a", "1").unwrap();
        tier.set("b", "2").unwrap();
        tier.remove("a").unwrap();

        assert_eq!(tier.get("a").unwrap(), None);
        assert_eq!(tier.get("b").unwrap().as_deref(), Some("2"));
    }
}
