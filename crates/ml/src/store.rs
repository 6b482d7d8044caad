use crate::model::TrainedModel;
use crate::tracker::HistoryEntry;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialization: {0}")]
    Json(#[from] serde_json::Error),
}

/// Persistence seam for the regression model. Only the model and the
/// history log survive across engine lifecycles.
pub trait ModelStore: Send + Sync {
    fn load(&self) -> Result<Option<TrainedModel>, StoreError>;
    fn save(&self, model: &TrainedModel) -> Result<(), StoreError>;
}

pub trait HistoryStore: Send + Sync {
    fn load(&self) -> Result<Vec<HistoryEntry>, StoreError>;
    fn save(&self, entries: &[HistoryEntry]) -> Result<(), StoreError>;
}

/// Writes go to a sibling tmp file first and land with a rename, so a
/// crash mid-write never leaves a truncated store behind.
fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_slice(&fs::read(path)?)?))
}

pub struct JsonModelStore {
    path: PathBuf,
}

impl JsonModelStore {
    pub fn new(path: impl Into<PathBuf>) -> JsonModelStore {
        JsonModelStore { path: path.into() }
    }
}

impl ModelStore for JsonModelStore {
    fn load(&self) -> Result<Option<TrainedModel>, StoreError> {
        read_json(&self.path)
    }

    fn save(&self, model: &TrainedModel) -> Result<(), StoreError> {
        write_atomic(&self.path, model)
    }
}

pub struct JsonHistoryStore {
    path: PathBuf,
}

impl JsonHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> JsonHistoryStore {
        JsonHistoryStore { path: path.into() }
    }
}

impl HistoryStore for JsonHistoryStore {
    fn load(&self) -> Result<Vec<HistoryEntry>, StoreError> {
        Ok(read_json(&self.path)?.unwrap_or_default())
    }

    fn save(&self, entries: &[HistoryEntry]) -> Result<(), StoreError> {
        write_atomic(&self.path, &entries)
    }
}

#[derive(Default)]
pub struct MemoryModelStore {
    model: Mutex<Option<TrainedModel>>,
}

impl ModelStore for MemoryModelStore {
    fn load(&self) -> Result<Option<TrainedModel>, StoreError> {
        Ok(self.model.lock().clone())
    }

    fn save(&self, model: &TrainedModel) -> Result<(), StoreError> {
        *self.model.lock() = Some(model.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryHistoryStore {
    entries: Mutex<Vec<HistoryEntry>>,
}

impl HistoryStore for MemoryHistoryStore {
    fn load(&self) -> Result<Vec<HistoryEntry>, StoreError> {
        Ok(self.entries.lock().clone())
    }

    fn save(&self, entries: &[HistoryEntry]) -> Result<(), StoreError> {
        *self.entries.lock() = entries.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_roundtrips_through_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonModelStore::new(dir.path().join("model.json"));
        assert!(store.load().unwrap().is_none());

        let model = TrainedModel {
            weights: vec![1.5, -0.5],
            intercept: 3.0,
            width: 2,
        };
        store.save(&model).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.weights, model.weights);
        assert_eq!(loaded.width, 2);
        assert!(!dir.path().join("model.tmp").exists());
    }

    #[test]
    fn history_store_defaults_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonHistoryStore::new(dir.path().join("history.json"));
        assert!(store.load().unwrap().is_empty());

        let entries = vec![HistoryEntry {
            timestamp: 1000,
            score: 80.0,
            success: true,
        }];
        store.save(&entries).unwrap();
        assert_eq!(store.load().unwrap(), entries);
    }
}
