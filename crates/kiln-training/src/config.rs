//! Supervisor configuration.
//!
//! Precedence: explicit file, then `./kiln.toml`, then defaults; environment
//! overrides (`KILN_UPLOAD_ROOT`, `KILN_INTERPRETER`) are applied last.

use crate::error::{TrainingError, TrainingResult};
use crate::layout::UploadLayout;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Local config file looked up in the current directory.
pub const LOCAL_CONFIG_FILE: &str = "kiln.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Root under which every trainable folder lives.
    #[serde(default = "default_upload_root")]
    pub upload_root: PathBuf,

    /// Interpreter used when a request does not name one.
    #[serde(default = "default_interpreter")]
    pub default_interpreter: String,

    /// Advisory output directory name handed to scripts.
    #[serde(default = "default_output_dir_name")]
    pub output_dir_name: String,

    /// Environment variable set to `1` to ask for unbuffered output.
    #[serde(default = "default_unbuffered_env")]
    pub unbuffered_env: String,

    /// How long finished records are kept before eviction.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Registry manifests directory, relative to the upload root unless absolute.
    #[serde(default = "default_registry_dir")]
    pub registry_dir: PathBuf,
}

fn default_upload_root() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_output_dir_name() -> String {
    "saved_models".to_string()
}

fn default_unbuffered_env() -> String {
    "PYTHONUNBUFFERED".to_string()
}

const fn default_retention_secs() -> u64 {
    24 * 60 * 60
}

fn default_registry_dir() -> PathBuf {
    PathBuf::from(".kiln/registry")
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            upload_root: default_upload_root(),
            default_interpreter: default_interpreter(),
            output_dir_name: default_output_dir_name(),
            unbuffered_env: default_unbuffered_env(),
            retention_secs: default_retention_secs(),
            registry_dir: default_registry_dir(),
        }
    }
}

impl TrainingConfig {
    #[must_use]
    pub fn with_upload_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.upload_root = root.into();
        self
    }

    #[must_use]
    pub fn with_default_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.default_interpreter = interpreter.into();
        self
    }

    /// Loads configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> TrainingResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TrainingError::Config(format!("failed to read {}: {e}", path.display())))?;
        toml::from_str(&content).map_err(|e| TrainingError::Config(format!("failed to parse {}: {e}", path.display())))
    }

    /// Loads `explicit` if given, else `./kiln.toml` if present, else defaults,
    /// then applies environment overrides and validates.
    pub fn discover_and_load(explicit: Option<&Path>) -> TrainingResult<Self> {
        let mut config = match explicit {
            Some(path) => Self::load_from_file(path)?,
            None => {
                let local = Path::new(LOCAL_CONFIG_FILE);
                if local.is_file() { Self::load_from_file(local)? } else { Self::default() }
            }
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Applies `KILN_*` overrides using `lookup` to read variables.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(root) = lookup("KILN_UPLOAD_ROOT").filter(|v| !v.trim().is_empty()) {
            self.upload_root = PathBuf::from(root);
        }
        if let Some(interpreter) = lookup("KILN_INTERPRETER").filter(|v| !v.trim().is_empty()) {
            self.default_interpreter = interpreter;
        }
    }

    pub fn validate(&self) -> TrainingResult<()> {
        if self.default_interpreter.trim().is_empty() {
            return Err(TrainingError::Config("default_interpreter must not be empty".to_string()));
        }
        if self.output_dir_name.trim().is_empty() {
            return Err(TrainingError::Config("output_dir_name must not be empty".to_string()));
        }
        if self.unbuffered_env.trim().is_empty() {
            return Err(TrainingError::Config("unbuffered_env must not be empty".to_string()));
        }
        Ok(())
    }

    #[must_use]
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn layout(&self) -> TrainingResult<UploadLayout> {
        UploadLayout::new(&self.upload_root, self.output_dir_name.clone(), &self.registry_dir)
    }
}
