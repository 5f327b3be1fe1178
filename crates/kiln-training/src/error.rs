use thiserror::Error;

pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("folder '{0}' does not exist")]
    FolderNotFound(String),

    #[error("training script '{0}' not found")]
    ScriptNotFound(String),

    #[error("training job '{0}' not found")]
    JobNotFound(String),

    #[error("invalid training request: {0}")]
    InvalidRequest(String),

    #[error("failed to start training: {0}")]
    Launch(String),

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl TrainingError {
    /// Whether this error means "the thing you asked about is not there".
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::FolderNotFound(_) | Self::ScriptNotFound(_) | Self::JobNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_class() {
        assert!(TrainingError::FolderNotFound("mnist".into()).is_not_found());
        assert!(TrainingError::ScriptNotFound("train.py".into()).is_not_found());
        assert!(TrainingError::JobNotFound("x".into()).is_not_found());
        assert!(!TrainingError::Launch("boom".into()).is_not_found());
    }

    #[test]
    fn test_error_messages() {
        let err = TrainingError::ScriptNotFound("train.py".into());
        assert_eq!(err.to_string(), "training script 'train.py' not found");

        let err = TrainingError::Launch("No such file or directory (os error 2)".into());
        assert_eq!(err.to_string(), "failed to start training: No such file or directory (os error 2)");
    }
}
