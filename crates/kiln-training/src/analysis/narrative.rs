//! Prose assessment of a training run.
//!
//! A [`TextGenerator`] writes the assessment when one is configured. Any
//! generator failure falls back to [`quick_analysis`], so callers always get
//! a result.

use crate::progress::{TrainingProgress, TrainingStatus};
use kiln_abstraction::{GenerationParameters, TextGenerator};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, warn};

/// How many trailing log lines are included in the prompt.
pub const PROMPT_LOG_LINES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisSource {
    Generated,
    Heuristic,
}

/// Key numbers shown next to the prose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub status: TrainingStatus,
    pub total_epochs: u32,
    pub completed_epochs: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub training_duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_train_loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_val_loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_train_accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_val_accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loss_improvement_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy_improvement_percent: Option<f64>,
}

impl MetricsSummary {
    #[must_use]
    pub fn of(progress: &TrainingProgress) -> Self {
        let last = progress.metrics.last();
        let first = progress.metrics.first().filter(|_| progress.metrics.len() >= 2);
        let improvement = |initial: Option<f64>, latest: Option<f64>, lower_is_better: bool| match (initial, latest) {
            (Some(a), Some(b)) if a > 0.0 && b > 0.0 => {
                Some(if lower_is_better { (a - b) / a * 100.0 } else { (b - a) / a * 100.0 })
            }
            _ => None,
        };

        Self {
            status: progress.status,
            total_epochs: progress.total_epochs,
            completed_epochs: progress.current_epoch,
            training_duration_seconds: progress
                .end_time
                .map(|end| (end - progress.start_time).num_milliseconds() as f64 / 1000.0),
            final_train_loss: last.and_then(|m| m.train_loss),
            final_val_loss: last.and_then(|m| m.val_loss),
            final_train_accuracy: last.and_then(|m| m.train_accuracy),
            final_val_accuracy: last.and_then(|m| m.val_accuracy),
            test_accuracy: progress.final_metrics.as_ref().and_then(|m| m.test_accuracy),
            loss_improvement_percent: first
                .and_then(|f| improvement(f.train_loss, last.and_then(|m| m.train_loss), true)),
            accuracy_improvement_percent: first
                .and_then(|f| improvement(f.train_accuracy, last.and_then(|m| m.train_accuracy), false)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceAnalysis {
    pub summary: String,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub recommendations: Vec<String>,
    pub overall_assessment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_analysis: Option<String>,
    pub metrics: MetricsSummary,
    pub source: AnalysisSource,
}

/// Writes a prose assessment, through a generator when available.
#[derive(Clone, Default)]
pub struct NarrativeAnalyzer {
    generator: Option<Arc<dyn TextGenerator>>,
    parameters: GenerationParameters,
}

impl std::fmt::Debug for NarrativeAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NarrativeAnalyzer")
            .field("generator", &self.generator.as_ref().map(|g| g.model_id().to_string()))
            .finish_non_exhaustive()
    }
}

impl NarrativeAnalyzer {
    /// Analyzer without a generator; always uses the heuristic path.
    #[must_use]
    pub fn heuristic() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_generator(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator: Some(generator), parameters: GenerationParameters::default() }
    }

    #[must_use]
    pub fn with_parameters(mut self, parameters: GenerationParameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Never fails; generator errors degrade to [`quick_analysis`].
    pub async fn analyze(&self, progress: &TrainingProgress) -> PerformanceAnalysis {
        let Some(generator) = &self.generator else {
            return quick_analysis(progress);
        };

        let prompt = build_prompt(progress);
        match generator.generate_text(&prompt, Some(self.parameters.clone())).await {
            Ok(reply) => {
                debug!(job_id = %progress.job_id, model = generator.model_id(), "Generated narrative analysis");
                let mut analysis = parse_response(&reply.content, MetricsSummary::of(progress));
                analysis.raw_analysis = Some(reply.content);
                analysis
            }
            Err(e) => {
                warn!(job_id = %progress.job_id, error = %e, "Narrative analysis failed; using heuristic summary");
                quick_analysis(progress)
            }
        }
    }
}

/// Renders the run as a markdown prompt: overview, first/middle/last epochs,
/// final metrics, recent logs and the error if any.
#[must_use]
pub fn build_prompt(progress: &TrainingProgress) -> String {
    let mut out = String::new();
    out.push_str("# Model Training Performance Analysis\n\n");
    out.push_str("Analyze the following machine learning training results and provide insights.\n\n");

    out.push_str("## Training Overview\n");
    let _ = writeln!(out, "- Status: {}", progress.status);
    let _ = writeln!(out, "- Total Epochs: {}", progress.total_epochs);
    if let Some(end) = progress.end_time {
        let _ = writeln!(out, "- Duration: {}s", (end - progress.start_time).num_seconds());
    }
    if let Some(path) = &progress.model_path {
        let _ = writeln!(out, "- Model Path: {path}");
    }
    out.push('\n');

    let metrics = &progress.metrics;
    if !metrics.is_empty() {
        out.push_str("## Training Metrics Progression\n\n");
        let mut milestones = vec![0];
        if metrics.len() > 2 {
            milestones.push(metrics.len() / 2);
        }
        if metrics.len() > 1 {
            milestones.push(metrics.len() - 1);
        }
        for m in milestones.into_iter().map(|i| &metrics[i]) {
            let _ = writeln!(out, "### Epoch {}/{}", m.epoch, m.total_epochs);
            if let Some(v) = m.train_loss {
                let _ = writeln!(out, "- Training Loss: {v:.4}");
            }
            if let Some(v) = m.val_loss {
                let _ = writeln!(out, "- Validation Loss: {v:.4}");
            }
            if let Some(v) = m.train_accuracy {
                let _ = writeln!(out, "- Training Accuracy: {:.2}%", v * 100.0);
            }
            if let Some(v) = m.val_accuracy {
                let _ = writeln!(out, "- Validation Accuracy: {:.2}%", v * 100.0);
            }
            out.push('\n');
        }
    }

    if let Some(m) = &progress.final_metrics {
        out.push_str("## Final Performance\n");
        if let Some(v) = m.test_accuracy {
            let _ = writeln!(out, "- Test Accuracy: {:.2}%", v * 100.0);
        }
        if let Some(v) = m.train_loss {
            let _ = writeln!(out, "- Final Training Loss: {v:.4}");
        }
        if let Some(v) = m.val_loss {
            let _ = writeln!(out, "- Final Validation Loss: {v:.4}");
        }
        out.push('\n');
    }

    if !progress.logs.is_empty() {
        out.push_str("## Recent Training Logs\n```\n");
        let skip = progress.logs.len().saturating_sub(PROMPT_LOG_LINES);
        for line in &progress.logs[skip..] {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str("```\n\n");
    }

    if let Some(err) = &progress.error_message {
        let _ = write!(out, "## Errors\n```\n{err}\n```\n\n");
    }

    out.push_str("## Analysis Request\n\n");
    out.push_str("Please provide:\n");
    out.push_str("1. **Summary**: Brief overview of the training performance\n");
    out.push_str("2. **Strengths**: What went well in this training run\n");
    out.push_str("3. **Weaknesses**: Areas of concern or poor performance\n");
    out.push_str("4. **Recommendations**: Specific suggestions for improvement\n");
    out.push_str("5. **Overall Assessment**: Is this model ready for production? Should we retrain?\n");
    out
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Summary,
    Strengths,
    Weaknesses,
    Recommendations,
    Overall,
}

/// Whether `line` is shaped like a heading: markdown `#`, a numbered or bold
/// label, a trailing colon, or a short phrase without a full stop.
fn looks_like_heading(line: &str) -> bool {
    line.starts_with('#')
        || line.starts_with("**")
        || line.ends_with(':')
        || line.split_once(". ").is_some_and(|(n, _)| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
        || (line.split_whitespace().count() <= 3 && !line.ends_with('.'))
}

fn section_heading(line: &str) -> Option<Section> {
    if !looks_like_heading(line) {
        return None;
    }
    let lower = line.to_lowercase();
    if lower.contains("summary") || lower.contains("overview") {
        Some(Section::Summary)
    } else if lower.contains("strength") {
        Some(Section::Strengths)
    } else if lower.contains("weakness") || lower.contains("concern") {
        Some(Section::Weaknesses)
    } else if lower.contains("recommendation") || lower.contains("suggestion") {
        Some(Section::Recommendations)
    } else if lower.contains("overall") || lower.contains("assessment") {
        Some(Section::Overall)
    } else {
        None
    }
}

/// Splits a free-form reply into sections by heading keywords.
///
/// Bullets under strengths/weaknesses/recommendations become list items;
/// plain lines under summary/overall are joined. A reply with no summary
/// becomes the summary as a whole.
#[must_use]
pub fn parse_response(response: &str, metrics: MetricsSummary) -> PerformanceAnalysis {
    let mut analysis = PerformanceAnalysis {
        summary: String::new(),
        strengths: Vec::new(),
        weaknesses: Vec::new(),
        recommendations: Vec::new(),
        overall_assessment: String::new(),
        raw_analysis: None,
        metrics,
        source: AnalysisSource::Generated,
    };
    let mut section = Section::None;
    let mut summary = Vec::new();
    let mut overall = Vec::new();

    for line in response.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let bullet = line
            .strip_prefix(['-', '*', '•'])
            .filter(|_| !line.starts_with("**"))
            .map(|rest| rest.trim_start_matches(['-', '*', '•', ' ']));
        if bullet.is_none()
            && let Some(next) = section_heading(line)
        {
            section = next;
            continue;
        }

        match (bullet, section) {
            (Some(item), Section::Strengths) => analysis.strengths.push(item.to_string()),
            (Some(item), Section::Weaknesses) => analysis.weaknesses.push(item.to_string()),
            (Some(item), Section::Recommendations) => analysis.recommendations.push(item.to_string()),
            (None, Section::Summary) => summary.push(line),
            (None, Section::Overall) => overall.push(line),
            _ => {}
        }
    }

    analysis.summary = if summary.is_empty() { response.trim().to_string() } else { summary.join(" ") };
    analysis.overall_assessment = overall.join(" ");
    analysis
}

/// Deterministic assessment from first and last snapshots.
#[must_use]
pub fn quick_analysis(progress: &TrainingProgress) -> PerformanceAnalysis {
    let mut strengths = Vec::new();
    let mut weaknesses = Vec::new();
    let mut recommendations = Vec::new();

    if let (Some(first), Some(last)) = (progress.metrics.first(), progress.metrics.last())
        && progress.metrics.len() >= 2
    {
        if let (Some(initial), Some(latest)) = (first.train_loss, last.train_loss) {
            if latest < initial * 0.5 {
                strengths.push("Training loss decreased significantly".to_string());
            } else if latest > initial * 0.9 {
                weaknesses.push("Training loss did not decrease much".to_string());
                recommendations.push("Consider adjusting the learning rate".to_string());
            }
        }

        if let (Some(train), Some(val)) = (last.train_loss, last.val_loss)
            && train > 0.0
            && (val - train) / train > super::report::OVERFIT_GAP
        {
            weaknesses.push("Significant gap between training and validation loss (possible overfitting)".to_string());
            recommendations.push("Add regularization or dropout".to_string());
            recommendations.push("Increase training data or use data augmentation".to_string());
        }

        if let Some(val_acc) = last.val_accuracy {
            if val_acc > 0.9 {
                strengths.push(format!("High validation accuracy: {:.2}%", val_acc * 100.0));
            } else if val_acc < 0.6 {
                weaknesses.push("Low validation accuracy".to_string());
                recommendations.push("Review model architecture and data quality".to_string());
            }
        }
    }

    let overall_assessment = match progress.status {
        TrainingStatus::Completed if weaknesses.is_empty() => {
            "Training completed successfully with good performance metrics"
        }
        TrainingStatus::Completed if weaknesses.len() > strengths.len() => {
            "Training completed with performance concerns; retraining with adjustments is recommended"
        }
        TrainingStatus::Completed => "Training completed with acceptable performance; minor improvements possible",
        TrainingStatus::Failed => "Training failed; review the error logs",
        TrainingStatus::Pending | TrainingStatus::Running => "Training has not finished yet",
    }
    .to_string();

    let metrics = MetricsSummary::of(progress);
    let summary = match metrics.final_val_accuracy.or(metrics.final_train_accuracy) {
        Some(acc) => format!(
            "{} after {} of {} epochs, final accuracy {:.2}%",
            progress.status,
            progress.current_epoch,
            progress.total_epochs,
            acc * 100.0
        ),
        None => format!("{} after {} of {} epochs", progress.status, progress.current_epoch, progress.total_epochs),
    };

    PerformanceAnalysis {
        summary,
        strengths,
        weaknesses,
        recommendations,
        overall_assessment,
        raw_analysis: None,
        metrics,
        source: AnalysisSource::Heuristic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobId, OwnerId};
    use crate::metrics::TrainingMetricSnapshot;
    use chrono::Utc;
    use kiln_abstraction::{GenerationError, StaticGenerator};

    fn progress() -> TrainingProgress {
        let mut p = TrainingProgress::pending(JobId::from("mnist_1"), OwnerId(1), Utc::now());
        p.status = TrainingStatus::Completed;
        p.current_epoch = 2;
        p.total_epochs = 2;
        p.metrics = vec![
            TrainingMetricSnapshot {
                epoch: 1,
                total_epochs: 2,
                train_loss: Some(1.0),
                val_loss: Some(1.1),
                val_accuracy: Some(0.7),
                ..TrainingMetricSnapshot::default()
            },
            TrainingMetricSnapshot {
                epoch: 2,
                total_epochs: 2,
                train_loss: Some(0.4),
                val_loss: Some(0.45),
                val_accuracy: Some(0.95),
                ..TrainingMetricSnapshot::default()
            },
        ];
        p.logs = (0..30).map(|i| format!("line {i}")).collect();
        p
    }

    #[test]
    fn test_prompt_contains_milestones_and_recent_logs() {
        let prompt = build_prompt(&progress());
        assert!(prompt.contains("### Epoch 1/2"));
        assert!(prompt.contains("### Epoch 2/2"));
        assert!(prompt.contains("- Validation Accuracy: 95.00%"));
        assert!(prompt.contains("line 29"));
        assert!(prompt.contains("line 10"));
        assert!(!prompt.contains("line 9\n"));
    }

    #[test]
    fn test_parse_sections() {
        let reply = "## Summary\nSolid run overall.\nLoss fell steadily.\n\n## Strengths\n- Fast convergence\n* Low loss\n\n## Weaknesses\n- Small dataset\n\n## Recommendations\n- More data\n\n## Overall Assessment\nReady for staging.\n";
        let analysis = parse_response(reply, MetricsSummary::of(&progress()));
        assert_eq!(analysis.summary, "Solid run overall. Loss fell steadily.");
        assert_eq!(analysis.strengths, vec!["Fast convergence", "Low loss"]);
        assert_eq!(analysis.weaknesses, vec!["Small dataset"]);
        assert_eq!(analysis.recommendations, vec!["More data"]);
        assert_eq!(analysis.overall_assessment, "Ready for staging.");
    }

    #[test]
    fn test_unstructured_reply_becomes_summary() {
        let analysis = parse_response("Looks fine to me.", MetricsSummary::of(&progress()));
        assert_eq!(analysis.summary, "Looks fine to me.");
        assert!(analysis.strengths.is_empty());
    }

    #[test]
    fn test_quick_analysis() {
        let analysis = quick_analysis(&progress());
        assert_eq!(analysis.source, AnalysisSource::Heuristic);
        assert_eq!(analysis.strengths.len(), 2);
        assert!(analysis.weaknesses.is_empty());
        assert_eq!(analysis.overall_assessment, "Training completed successfully with good performance metrics");
        assert!((analysis.metrics.loss_improvement_percent.unwrap() - 60.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_generator_failure_falls_back() {
        let analyzer =
            NarrativeAnalyzer::with_generator(Arc::new(StaticGenerator::failing(GenerationError::NotConfigured("no key".into()))));
        let analysis = analyzer.analyze(&progress()).await;
        assert_eq!(analysis.source, AnalysisSource::Heuristic);
    }

    #[tokio::test]
    async fn test_generator_reply_is_parsed() {
        let analyzer = NarrativeAnalyzer::with_generator(Arc::new(StaticGenerator::answering(
            "Summary\nGood.\nStrengths\n- Converged",
        )));
        let analysis = analyzer.analyze(&progress()).await;
        assert_eq!(analysis.source, AnalysisSource::Generated);
        assert_eq!(analysis.summary, "Good.");
        assert_eq!(analysis.strengths, vec!["Converged"]);
        assert!(analysis.raw_analysis.is_some());

        let heuristic = NarrativeAnalyzer::heuristic().analyze(&progress()).await;
        assert_eq!(heuristic.source, AnalysisSource::Heuristic);
    }
}
