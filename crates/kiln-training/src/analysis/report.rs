use crate::metrics::TrainingMetricSnapshot;
use crate::progress::{TrainingProgress, TrainingStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Accuracy (percent) below which both train and validation count as underfit.
pub const UNDERFIT_ACCURACY_PERCENT: f64 = 60.0;

/// Relative val-over-train loss gap above which a run counts as overfit.
pub const OVERFIT_GAP: f64 = 0.3;

/// Summary statistics of one metric series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesStats {
    pub initial: f64,
    #[serde(rename = "final")]
    pub last: f64,
    /// Minimum for losses, maximum for accuracies.
    pub best: f64,
    pub worst: f64,
    pub average: f64,
    pub std_dev: f64,
    /// First-vs-last change in percent; positive is better.
    pub improvement_percent: f64,
}

impl SeriesStats {
    fn of_loss(values: &[f64]) -> Option<Self> {
        let (&initial, &last) = (values.first()?, values.last()?);
        Some(Self {
            initial,
            last,
            best: min(values),
            worst: max(values),
            average: mean(values),
            std_dev: std_dev(values),
            improvement_percent: if initial > 0.0 { (initial - last) / initial * 100.0 } else { 0.0 },
        })
    }

    fn of_accuracy(values: &[f64]) -> Option<Self> {
        let (&initial, &last) = (values.first()?, values.last()?);
        Some(Self {
            initial,
            last,
            best: max(values),
            worst: min(values),
            average: mean(values),
            std_dev: std_dev(values),
            improvement_percent: if initial > 0.0 { (last - initial) / initial * 100.0 } else { 0.0 },
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossVariability {
    Stable,
    Moderate,
    Unstable,
}

impl LossVariability {
    fn classify(stats: &SeriesStats) -> Self {
        if stats.std_dev < stats.average * 0.1 {
            Self::Stable
        } else if stats.std_dev < stats.average * 0.3 {
            Self::Moderate
        } else {
            Self::Unstable
        }
    }

    const fn score_bonus(self) -> f64 {
        match self {
            Self::Stable => 10.0,
            Self::Moderate => 5.0,
            Self::Unstable => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceLevel {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl PerformanceLevel {
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= 85.0 {
            Self::Excellent
        } else if score >= 70.0 {
            Self::Good
        } else if score >= 50.0 {
            Self::Fair
        } else {
            Self::Poor
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Fair => "fair",
            Self::Poor => "poor",
        }
    }
}

impl std::fmt::Display for PerformanceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One chart row per recorded snapshot. Accuracies in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochRow {
    pub epoch: u32,
    pub train_loss: Option<f64>,
    pub val_loss: Option<f64>,
    pub train_accuracy: Option<f64>,
    pub val_accuracy: Option<f64>,
}

impl From<&TrainingMetricSnapshot> for EpochRow {
    fn from(s: &TrainingMetricSnapshot) -> Self {
        Self {
            epoch: s.epoch,
            train_loss: s.train_loss,
            val_loss: s.val_loss,
            train_accuracy: s.train_accuracy.map(percent),
            val_accuracy: s.val_accuracy.map(percent),
        }
    }
}

/// Deterministic analysis of a finished job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedMetrics {
    pub training_status: TrainingStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub total_duration_seconds: f64,
    pub completed_epochs: u32,
    pub total_epochs: u32,
    pub average_epoch_time_seconds: f64,

    pub train_loss: Option<SeriesStats>,
    pub val_loss: Option<SeriesStats>,
    /// Percent.
    pub train_accuracy: Option<SeriesStats>,
    /// Percent.
    pub val_accuracy: Option<SeriesStats>,
    pub test_accuracy: Option<f64>,
    pub test_loss: Option<f64>,

    pub is_converging: bool,
    pub is_overfitting: bool,
    pub is_underfitting: bool,
    /// Relative val-over-train loss gap in percent.
    pub train_val_gap_percent: f64,
    pub loss_variability: Option<LossVariability>,

    pub overall_score: f64,
    pub performance_level: PerformanceLevel,

    pub epoch_data: Vec<EpochRow>,
    pub loss_history: Vec<f64>,
    pub val_loss_history: Vec<f64>,
    pub accuracy_history: Vec<f64>,
    pub val_accuracy_history: Vec<f64>,

    pub insights: Vec<String>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,

    pub model_path: Option<String>,
    pub has_checkpoint: bool,
}

/// Analyzes a job's recorded metric series. Pure; safe on any job state.
#[must_use]
pub fn analyze(progress: &TrainingProgress) -> DetailedMetrics {
    let series = |f: fn(&TrainingMetricSnapshot) -> Option<f64>| -> Vec<f64> {
        progress.metrics.iter().filter_map(f).filter(|v| v.is_finite()).collect()
    };
    let loss_history = series(|s| s.train_loss);
    let val_loss_history = series(|s| s.val_loss);
    let accuracy_history: Vec<f64> = series(|s| s.train_accuracy).into_iter().map(percent).collect();
    let val_accuracy_history: Vec<f64> = series(|s| s.val_accuracy).into_iter().map(percent).collect();

    let total_duration_seconds = progress
        .end_time
        .map_or(0.0, |end| (end - progress.start_time).num_milliseconds() as f64 / 1000.0)
        .max(0.0);
    let average_epoch_time_seconds = if total_duration_seconds > 0.0 && progress.current_epoch > 0 {
        total_duration_seconds / f64::from(progress.current_epoch)
    } else {
        0.0
    };

    let final_metrics = progress.final_metrics.as_ref();
    let mut report = DetailedMetrics {
        training_status: progress.status,
        start_time: progress.start_time,
        end_time: progress.end_time,
        total_duration_seconds,
        completed_epochs: progress.current_epoch,
        total_epochs: progress.total_epochs,
        average_epoch_time_seconds,
        train_loss: SeriesStats::of_loss(&loss_history),
        val_loss: SeriesStats::of_loss(&val_loss_history),
        train_accuracy: SeriesStats::of_accuracy(&accuracy_history),
        val_accuracy: SeriesStats::of_accuracy(&val_accuracy_history),
        test_accuracy: final_metrics.and_then(|m| m.test_accuracy).map(percent),
        test_loss: final_metrics.and_then(|m| m.test_loss),
        is_converging: false,
        is_overfitting: false,
        is_underfitting: false,
        train_val_gap_percent: 0.0,
        loss_variability: None,
        overall_score: 0.0,
        performance_level: PerformanceLevel::Poor,
        epoch_data: progress.metrics.iter().map(EpochRow::from).collect(),
        loss_history,
        val_loss_history,
        accuracy_history,
        val_accuracy_history,
        insights: Vec::new(),
        warnings: Vec::new(),
        recommendations: Vec::new(),
        model_path: progress.model_path.clone(),
        has_checkpoint: progress.model_path.is_some(),
    };

    if progress.metrics.is_empty() {
        return report;
    }

    assess_behavior(&mut report);
    write_insights(&mut report);
    report.overall_score = overall_score(&report);
    report.performance_level = PerformanceLevel::from_score(report.overall_score);
    report
}

fn assess_behavior(report: &mut DetailedMetrics) {
    if let [.., a, b, c] = report.loss_history.as_slice() {
        let recent = [*a, *b, *c];
        report.is_converging = is_non_increasing(&recent) || std_dev(&recent) < mean(&recent) * 0.1;
    }

    if let (Some(train), Some(val)) = (report.train_loss, report.val_loss)
        && train.last > 0.0
    {
        let gap = (val.last - train.last) / train.last;
        report.train_val_gap_percent = gap * 100.0;
        if gap > OVERFIT_GAP {
            report.is_overfitting = true;
            report.warnings.push("Model shows signs of overfitting (large train/val gap)".to_string());
        }
    }

    // Without any accuracy series there is nothing to judge underfitting on.
    if report.train_accuracy.is_some() || report.val_accuracy.is_some() {
        let train = report.train_accuracy.map_or(0.0, |s| s.last);
        let val = report.val_accuracy.map_or(0.0, |s| s.last);
        if train < UNDERFIT_ACCURACY_PERCENT && val < UNDERFIT_ACCURACY_PERCENT {
            report.is_underfitting = true;
            report
                .warnings
                .push("Model may be underfitting (low accuracy on both train and validation)".to_string());
        }
    }

    if let Some(stats) = report.train_loss {
        let variability = LossVariability::classify(&stats);
        if variability == LossVariability::Unstable {
            report.warnings.push("Training loss is unstable; consider reducing the learning rate".to_string());
        }
        report.loss_variability = Some(variability);
    }
}

fn write_insights(report: &mut DetailedMetrics) {
    let completed = report.training_status == TrainingStatus::Completed;

    if let Some(loss) = report.train_loss {
        let improvement = loss.improvement_percent;
        if improvement > 50.0 {
            report.insights.push(format!("Excellent loss reduction: {improvement:.1}% improvement"));
        } else if improvement > 20.0 {
            report.insights.push(format!("Good loss reduction: {improvement:.1}% improvement"));
        } else if improvement < 10.0 {
            report
                .warnings
                .push("Poor loss reduction; the model may need more training or a learning rate adjustment".to_string());
            report.recommendations.push("Increase the number of epochs or adjust the learning rate".to_string());
        }
    }

    if let Some(val) = report.val_accuracy {
        let acc = val.last;
        if acc > 90.0 {
            report.insights.push(format!("Excellent validation accuracy: {acc:.2}%"));
        } else if acc > 80.0 {
            report.insights.push(format!("Good validation accuracy: {acc:.2}%"));
        } else if acc > 70.0 {
            report.insights.push(format!("Moderate validation accuracy: {acc:.2}%"));
            report.recommendations.push("Try data augmentation or model architecture improvements".to_string());
        } else {
            report.warnings.push(format!("Low validation accuracy: {acc:.2}%"));
            report.recommendations.push("Review data quality and model architecture".to_string());
        }
    }

    if report.is_overfitting {
        report.recommendations.extend([
            "Add dropout layers or L2 regularization".to_string(),
            "Increase training data or use data augmentation".to_string(),
            "Consider early stopping".to_string(),
        ]);
    }

    if report.average_epoch_time_seconds > 0.0 {
        let per_epoch = report.average_epoch_time_seconds;
        report.insights.push(format!("Average epoch time: {per_epoch:.1} seconds"));
        if !report.is_converging && completed {
            let minutes = per_epoch * 10.0 / 60.0;
            report.recommendations.push(format!("Model may benefit from 10 more epochs (~{minutes:.1} min)"));
        }
    }

    if report.is_converging {
        report.insights.push("Model is converging well".to_string());
    } else if completed {
        report.warnings.push("Model has not fully converged".to_string());
        report.recommendations.push("Continue training for more epochs".to_string());
    }
}

fn overall_score(report: &DetailedMetrics) -> f64 {
    let mut score = 0.0;
    if let Some(val) = report.val_accuracy
        && val.last > 0.0
    {
        score += val.last * 0.4;
    }
    if let Some(loss) = report.train_loss
        && loss.improvement_percent > 0.0
    {
        score += loss.improvement_percent.min(50.0) * 0.4;
    }
    if report.is_converging {
        score += 20.0;
    }
    if report.is_overfitting {
        score -= (report.train_val_gap_percent * 0.3).min(10.0);
    }
    if report.is_underfitting {
        score -= 10.0;
    }
    if let Some(variability) = report.loss_variability {
        score += variability.score_bonus();
    }
    score.clamp(0.0, 100.0)
}

fn percent(fraction: f64) -> f64 {
    fraction * 100.0
}

fn is_non_increasing(values: &[f64]) -> bool {
    values.windows(2).all(|w| w[1] <= w[0])
}

fn min(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::INFINITY, f64::min)
}

fn max(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let avg = mean(values);
    (values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}
