//! Per-job progress records.
//!
//! A [`ProgressHandle`] is the only way to mutate a job's [`TrainingProgress`];
//! every mutation takes the handle's own lock, so two jobs never contend.

use crate::job::{JobId, OwnerId};
use crate::metrics::TrainingMetricSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TrainingStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Completed | Self::Failed => 2,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether moving from `self` to `next` respects pending -> running -> terminal.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        next.rank() > self.rank()
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TrainingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingProgress {
    pub job_id: JobId,
    pub owner_id: OwnerId,
    pub status: TrainingStatus,
    pub current_epoch: u32,
    pub total_epochs: u32,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(default)]
    pub metrics: Vec<TrainingMetricSnapshot>,
    #[serde(default)]
    pub final_metrics: Option<TrainingMetricSnapshot>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub model_path: Option<String>,
}

impl TrainingProgress {
    #[must_use]
    pub fn pending(job_id: JobId, owner_id: OwnerId, start_time: DateTime<Utc>) -> Self {
        Self {
            job_id,
            owner_id,
            status: TrainingStatus::Pending,
            current_epoch: 0,
            total_epochs: 0,
            start_time,
            end_time: None,
            logs: Vec::new(),
            metrics: Vec::new(),
            final_metrics: None,
            error_message: None,
            model_path: None,
        }
    }

    /// Accuracy to report for the trained model, as a 0-100 percentage.
    ///
    /// Final metrics win; otherwise the newest snapshot carrying any accuracy.
    #[must_use]
    pub fn final_accuracy_percent(&self) -> Option<f64> {
        self.final_metrics
            .as_ref()
            .and_then(TrainingMetricSnapshot::preferred_accuracy)
            .or_else(|| self.metrics.iter().rev().find_map(TrainingMetricSnapshot::preferred_accuracy))
            .map(|fraction| fraction * 100.0)
    }
}

/// Epoch counters after a snapshot was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressTick {
    pub status: TrainingStatus,
    pub current_epoch: u32,
    pub total_epochs: u32,
}

/// Shared, independently locked progress record of one job.
#[derive(Debug)]
pub struct ProgressHandle {
    job_id: JobId,
    owner_id: OwnerId,
    state: RwLock<TrainingProgress>,
}

impl ProgressHandle {
    #[must_use]
    pub fn new(progress: TrainingProgress) -> Self {
        Self { job_id: progress.job_id.clone(), owner_id: progress.owner_id, state: RwLock::new(progress) }
    }

    #[must_use]
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    #[must_use]
    pub fn owner_id(&self) -> OwnerId {
        self.owner_id
    }

    fn read(&self) -> RwLockReadGuard<'_, TrainingProgress> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TrainingProgress> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clone of the current state.
    #[must_use]
    pub fn snapshot(&self) -> TrainingProgress {
        self.read().clone()
    }

    #[must_use]
    pub fn status(&self) -> TrainingStatus {
        self.read().status
    }

    #[must_use]
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.read().end_time
    }

    #[must_use]
    pub fn tick(&self) -> ProgressTick {
        let state = self.read();
        ProgressTick { status: state.status, current_epoch: state.current_epoch, total_epochs: state.total_epochs }
    }

    /// Returns `false` when the job already left `pending`.
    pub fn mark_running(&self) -> bool {
        let mut state = self.write();
        if !state.status.can_transition_to(TrainingStatus::Running) {
            return false;
        }
        state.status = TrainingStatus::Running;
        true
    }

    /// Returns `false` when the job was already terminal.
    pub fn mark_completed(&self) -> bool {
        let mut state = self.write();
        if !state.status.can_transition_to(TrainingStatus::Completed) {
            return false;
        }
        state.status = TrainingStatus::Completed;
        state.end_time = Some(Utc::now());
        true
    }

    /// Returns `false` when the job was already terminal.
    pub fn mark_failed(&self, message: impl Into<String>) -> bool {
        let mut state = self.write();
        if !state.status.can_transition_to(TrainingStatus::Failed) {
            return false;
        }
        state.status = TrainingStatus::Failed;
        state.error_message = Some(message.into());
        state.end_time = Some(Utc::now());
        true
    }

    pub fn append_log(&self, line: impl Into<String>) {
        self.write().logs.push(line.into());
    }

    /// Appends a snapshot and updates epoch counters and final metrics.
    ///
    /// The current epoch never moves backwards when reports arrive out of order.
    pub fn record_metrics(&self, snapshot: TrainingMetricSnapshot) -> ProgressTick {
        let mut state = self.write();
        state.current_epoch = state.current_epoch.max(snapshot.epoch);
        state.total_epochs = state.total_epochs.max(snapshot.total_epochs);
        if snapshot.qualifies_as_final() {
            state.final_metrics = Some(snapshot.clone());
        }
        state.metrics.push(snapshot);
        ProgressTick { status: state.status, current_epoch: state.current_epoch, total_epochs: state.total_epochs }
    }

    /// Assigns the artifact path. Only the first assignment sticks.
    pub fn set_model_path(&self, path: impl Into<String>) -> bool {
        let mut state = self.write();
        if state.model_path.is_some() {
            return false;
        }
        state.model_path = Some(path.into());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::STATUS_TAG_KEY;

    fn handle() -> ProgressHandle {
        ProgressHandle::new(TrainingProgress::pending(JobId::from("mnist_1"), OwnerId(1), Utc::now()))
    }

    #[test]
    fn test_status_transitions_are_monotonic() {
        let h = handle();
        assert_eq!(h.status(), TrainingStatus::Pending);
        assert!(h.mark_running());
        assert!(!h.mark_running());
        assert!(h.mark_completed());
        assert!(!h.mark_failed("late"));
        assert_eq!(h.status(), TrainingStatus::Completed);
        assert!(h.snapshot().error_message.is_none());
        assert!(h.end_time().is_some());
    }

    #[test]
    fn test_failed_is_terminal() {
        let h = handle();
        assert!(h.mark_failed("boom"));
        assert!(!h.mark_running());
        assert!(!h.mark_completed());
        let snap = h.snapshot();
        assert_eq!(snap.status, TrainingStatus::Failed);
        assert_eq!(snap.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn test_epoch_clamps_and_total_is_monotonic() {
        let h = handle();
        h.record_metrics(TrainingMetricSnapshot { epoch: 3, total_epochs: 5, ..Default::default() });
        let tick = h.record_metrics(TrainingMetricSnapshot { epoch: 2, total_epochs: 4, ..Default::default() });
        assert_eq!(tick.current_epoch, 3);
        assert_eq!(tick.total_epochs, 5);
        assert_eq!(h.snapshot().metrics.len(), 2);
    }

    #[test]
    fn test_later_final_metrics_supersede() {
        let h = handle();
        h.record_metrics(TrainingMetricSnapshot { epoch: 1, total_epochs: 2, train_accuracy: Some(0.5), ..Default::default() });
        h.record_metrics(TrainingMetricSnapshot { epoch: 2, total_epochs: 2, train_loss: Some(0.1), ..Default::default() });
        let fin = h.snapshot().final_metrics.unwrap();
        assert_eq!(fin.epoch, 2);

        let mut tagged = TrainingMetricSnapshot { epoch: 2, total_epochs: 2, ..Default::default() };
        tagged.custom.insert(STATUS_TAG_KEY.into(), serde_json::json!("completed"));
        tagged.test_accuracy = Some(0.9);
        h.record_metrics(tagged);
        assert_eq!(h.snapshot().final_metrics.unwrap().test_accuracy, Some(0.9));
    }

    #[test]
    fn test_model_path_assigned_once() {
        let h = handle();
        assert!(h.set_model_path("mnist/best.pth"));
        assert!(!h.set_model_path("mnist/other.pth"));
        assert_eq!(h.snapshot().model_path.as_deref(), Some("mnist/best.pth"));
    }

    #[test]
    fn test_final_accuracy_percent_fallback() {
        let h = handle();
        h.record_metrics(TrainingMetricSnapshot { epoch: 1, total_epochs: 3, val_accuracy: Some(0.8), ..Default::default() });
        h.record_metrics(TrainingMetricSnapshot { epoch: 2, total_epochs: 3, train_loss: Some(0.3), ..Default::default() });
        let acc = h.snapshot().final_accuracy_percent().unwrap();
        assert!((acc - 80.0).abs() < 1e-9);
    }
}
