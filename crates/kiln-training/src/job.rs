use crate::error::{TrainingError, TrainingResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Identifier for a training job.
///
/// Shaped as `<folder>_<unix-seconds>_<suffix>` so every job of one trainable
/// entity shares the `<folder>_` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    #[must_use]
    pub fn generate(folder_name: &str, submitted_at: DateTime<Utc>) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{folder_name}_{}_{}", submitted_at.timestamp(), &suffix[..8]))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// The user a job belongs to. Broadcasts never cross owners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub u64);

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A request to run one training script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingJob {
    pub owner_id: OwnerId,
    /// Folder under the upload root holding the script; also the entity name.
    pub folder_name: String,
    /// Script file name relative to the folder, e.g. `train.py`.
    pub script_name: String,
    /// Interpreter to run the script with. Empty means the configured default.
    #[serde(default)]
    pub interpreter: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl TrainingJob {
    #[must_use]
    pub fn new(owner_id: OwnerId, folder_name: impl Into<String>, script_name: impl Into<String>) -> Self {
        Self {
            owner_id,
            folder_name: folder_name.into(),
            script_name: script_name.into(),
            interpreter: String::new(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Rejects names that would escape the upload root or are plainly empty.
    pub fn validate(&self) -> TrainingResult<()> {
        if self.folder_name.trim().is_empty() {
            return Err(TrainingError::InvalidRequest("folder_name is required".to_string()));
        }
        if self.script_name.trim().is_empty() {
            return Err(TrainingError::InvalidRequest("script_name is required".to_string()));
        }
        for (field, value) in [("folder_name", &self.folder_name), ("script_name", &self.script_name)] {
            if value.split(['/', '\\']).any(|part| part == "..") {
                return Err(TrainingError::InvalidRequest(format!("{field} must stay inside the upload root")));
            }
            if std::path::Path::new(value).is_absolute() {
                return Err(TrainingError::InvalidRequest(format!("{field} must be relative")));
            }
        }
        Ok(())
    }
}
