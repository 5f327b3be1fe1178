//! Metric snapshots reported by a training script.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Custom-field key carrying the script's own status tag.
pub const STATUS_TAG_KEY: &str = "status";
/// Status tag value marking a snapshot as the run's final report.
pub const COMPLETED_TAG: &str = "completed";

/// An accuracy exactly as the script reported it.
///
/// Scripts mix units: some print `0.93`, others `93.0`. Anything above 1 is
/// read as a percentage; this is the only place that rule lives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReportedAccuracy {
    Fraction(f64),
    Percent(f64),
}

impl ReportedAccuracy {
    #[must_use]
    pub fn classify(raw: f64) -> Self {
        if raw > 1.0 {
            Self::Percent(raw)
        } else {
            Self::Fraction(raw)
        }
    }

    /// The value as a 0-1 fraction.
    #[must_use]
    pub fn fraction(self) -> f64 {
        match self {
            Self::Fraction(v) => v,
            Self::Percent(v) => v / 100.0,
        }
    }
}

/// Shorthand for `ReportedAccuracy::classify(raw).fraction()`.
#[must_use]
pub fn normalize_accuracy(raw: f64) -> f64 {
    ReportedAccuracy::classify(raw).fraction()
}

/// One metrics report. Accuracies are always stored as fractions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetricSnapshot {
    pub epoch: u32,
    pub total_epochs: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub train_loss: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val_loss: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_loss: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub train_accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val_accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, serde_json::Value>,
}

impl TrainingMetricSnapshot {
    #[must_use]
    pub fn status_tag(&self) -> Option<&str> {
        self.custom.get(STATUS_TAG_KEY).and_then(serde_json::Value::as_str)
    }

    #[must_use]
    pub fn is_completed_tag(&self) -> bool {
        self.status_tag() == Some(COMPLETED_TAG)
    }

    #[must_use]
    pub fn has_accuracy(&self) -> bool {
        self.train_accuracy.is_some() || self.val_accuracy.is_some() || self.test_accuracy.is_some()
    }

    #[must_use]
    pub fn has_loss(&self) -> bool {
        self.train_loss.is_some() || self.val_loss.is_some() || self.test_loss.is_some()
    }

    #[must_use]
    pub fn is_last_epoch(&self) -> bool {
        self.total_epochs > 0 && self.epoch == self.total_epochs
    }

    /// Whether this snapshot carries anything worth recording.
    #[must_use]
    pub fn has_data(&self) -> bool {
        self.epoch > 0 || self.has_loss() || self.has_accuracy()
    }

    /// Whether this snapshot should replace the job's final metrics.
    #[must_use]
    pub fn qualifies_as_final(&self) -> bool {
        self.is_completed_tag() || self.has_accuracy() || self.is_last_epoch()
    }

    /// Best available accuracy, preferring test over validation over train.
    #[must_use]
    pub fn preferred_accuracy(&self) -> Option<f64> {
        [self.test_accuracy, self.val_accuracy, self.train_accuracy]
            .into_iter()
            .flatten()
            .find(|acc| *acc > 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage_round_trip() {
        assert!((normalize_accuracy(95.5) - 0.955).abs() < 1e-9);
        assert!((normalize_accuracy(0.42) - 0.42).abs() < 1e-12);
        assert!((normalize_accuracy(1.0) - 1.0).abs() < 1e-12);
        assert_eq!(ReportedAccuracy::classify(88.5), ReportedAccuracy::Percent(88.5));
    }

    #[test]
    fn test_final_qualification() {
        let mut snap = TrainingMetricSnapshot { epoch: 1, total_epochs: 3, ..Default::default() };
        assert!(!snap.qualifies_as_final());

        snap.epoch = 3;
        assert!(snap.qualifies_as_final());

        let mut tagged = TrainingMetricSnapshot { epoch: 1, total_epochs: 3, ..Default::default() };
        tagged.custom.insert(STATUS_TAG_KEY.into(), serde_json::json!("completed"));
        assert!(tagged.qualifies_as_final());

        let with_acc = TrainingMetricSnapshot { epoch: 1, train_accuracy: Some(0.5), ..Default::default() };
        assert!(with_acc.qualifies_as_final());
    }

    #[test]
    fn test_preferred_accuracy_order() {
        let snap = TrainingMetricSnapshot {
            train_accuracy: Some(0.7),
            val_accuracy: Some(0.8),
            ..Default::default()
        };
        assert_eq!(snap.preferred_accuracy(), Some(0.8));
    }
}
