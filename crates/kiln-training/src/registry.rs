//! Persistence of "entity X's trained model is at path Y".
//!
//! The supervisor writes through [`ModelRegistry`] once a run has completed and
//! an artifact was found. Registry failures never change a job's outcome.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid entity name: {0}")]
    InvalidEntity(String),

    #[error("failed to write registry entry for '{entity}': {reason}")]
    Write { entity: String, reason: String },

    #[error("failed to read registry: {0}")]
    Read(String),

    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

/// The trained model currently recorded for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModelRecord {
    pub entity: String,
    /// Path relative to the upload root, `/`-separated.
    pub model_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_percent: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait ModelRegistry: Send + Sync {
    /// Records `model_path` as the trained model of `entity`, replacing any
    /// previous record.
    async fn set_trained_model(
        &self,
        entity: &str,
        model_path: &str,
        accuracy_percent: Option<f64>,
    ) -> Result<(), RegistryError>;
}

/// Stores one JSON manifest per entity under a directory.
#[derive(Debug, Clone)]
pub struct FileModelRegistry {
    dir: PathBuf,
}

const MANIFEST_EXT: &str = "json";

impl FileModelRegistry {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn manifest_path(&self, entity: &str) -> Result<PathBuf, RegistryError> {
        if entity.trim().is_empty() || entity.split(['/', '\\']).any(|part| part == "..") {
            return Err(RegistryError::InvalidEntity(entity.to_string()));
        }
        // Nested folders flatten into one file name.
        let file = entity.replace(['/', '\\'], "__");
        Ok(self.dir.join(format!("{file}.{MANIFEST_EXT}")))
    }

    /// Reads the record of one entity, if present.
    pub fn get(&self, entity: &str) -> Result<Option<TrainedModelRecord>, RegistryError> {
        let path = self.manifest_path(entity)?;
        match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| RegistryError::Read(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RegistryError::Read(format!("{}: {e}", path.display()))),
        }
    }

    /// Lists every recorded trained model, ordered by entity name.
    /// A missing registry directory means no models.
    pub fn discover_trained_models(&self) -> Result<Vec<TrainedModelRecord>, RegistryError> {
        let mut out = Vec::new();
        let dir = match std::fs::read_dir(&self.dir) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(RegistryError::Read(format!("{}: {e}", self.dir.display()))),
        };

        for entry in dir {
            let entry = entry.map_err(|e| RegistryError::Read(e.to_string()))?;
            let path = entry.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(MANIFEST_EXT) {
                continue;
            }
            let bytes = std::fs::read(&path).map_err(|e| RegistryError::Read(format!("{}: {e}", path.display())))?;
            let record: TrainedModelRecord = serde_json::from_slice(&bytes)
                .map_err(|e| RegistryError::Read(format!("{}: {e}", path.display())))?;
            out.push(record);
        }

        out.sort_by(|a, b| a.entity.cmp(&b.entity));
        Ok(out)
    }
}

#[async_trait]
impl ModelRegistry for FileModelRegistry {
    async fn set_trained_model(
        &self,
        entity: &str,
        model_path: &str,
        accuracy_percent: Option<f64>,
    ) -> Result<(), RegistryError> {
        let path = self.manifest_path(entity)?;
        let write_err = |reason: String| RegistryError::Write { entity: entity.to_string(), reason };

        let record = TrainedModelRecord {
            entity: entity.to_string(),
            model_path: model_path.to_string(),
            accuracy_percent,
            updated_at: Utc::now(),
        };
        let bytes = serde_json::to_vec_pretty(&record).map_err(|e| write_err(e.to_string()))?;

        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| write_err(e.to_string()))?;
        // Write-then-rename so readers never see a partial manifest.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await.map_err(|e| write_err(e.to_string()))?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| write_err(e.to_string()))?;

        debug!(entity, model_path, manifest = %path.display(), "Recorded trained model");
        Ok(())
    }
}

/// Registry held in memory; useful for embedding and tests.
#[derive(Debug, Default)]
pub struct InMemoryModelRegistry {
    records: Mutex<BTreeMap<String, TrainedModelRecord>>,
}

impl InMemoryModelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, entity: &str) -> Option<TrainedModelRecord> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).get(entity).cloned()
    }

    #[must_use]
    pub fn records(&self) -> Vec<TrainedModelRecord> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).values().cloned().collect()
    }
}

#[async_trait]
impl ModelRegistry for InMemoryModelRegistry {
    async fn set_trained_model(
        &self,
        entity: &str,
        model_path: &str,
        accuracy_percent: Option<f64>,
    ) -> Result<(), RegistryError> {
        let record = TrainedModelRecord {
            entity: entity.to_string(),
            model_path: model_path.to_string(),
            accuracy_percent,
            updated_at: Utc::now(),
        };
        self.records.lock().unwrap_or_else(PoisonError::into_inner).insert(entity.to_string(), record);
        Ok(())
    }
}
