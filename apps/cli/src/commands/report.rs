//! Human-readable rendering of events and analyses.

use colored::Colorize;
use kiln_training::analysis::PerformanceAnalysis;
use kiln_training::{DetailedMetrics, JobEvent, TrainingMetricSnapshot, TrainingProgress, TrainingStatus};

pub fn print_event(event: &JobEvent) {
    match event {
        JobEvent::Log { text, is_error, .. } => {
            if *is_error {
                println!("  {}", text.yellow());
            } else {
                println!("  {}", text.dimmed());
            }
        }
        JobEvent::Metrics(snapshot) => println!("{}", format_snapshot(snapshot).cyan()),
        JobEvent::Status { status, error_message, .. } => {
            let line = format!("● {status}");
            match status {
                TrainingStatus::Failed => {
                    println!("{}", line.red().bold());
                    if let Some(message) = error_message {
                        println!("  {}", message.red());
                    }
                }
                TrainingStatus::Completed => println!("{}", line.green().bold()),
                TrainingStatus::Pending | TrainingStatus::Running => println!("{}", line.bold()),
            }
        }
        JobEvent::Progress(_) => {}
    }
}

fn format_snapshot(s: &TrainingMetricSnapshot) -> String {
    let mut parts = vec![format!("epoch {}/{}", s.epoch, s.total_epochs)];
    let mut push = |label: &str, value: Option<f64>, percent: bool| {
        if let Some(v) = value {
            parts.push(if percent { format!("{label} {:.2}%", v * 100.0) } else { format!("{label} {v:.4}") });
        }
    };
    push("loss", s.train_loss, false);
    push("val_loss", s.val_loss, false);
    push("test_loss", s.test_loss, false);
    push("acc", s.train_accuracy, true);
    push("val_acc", s.val_accuracy, true);
    push("test_acc", s.test_accuracy, true);
    parts.join("  ")
}

pub fn print_summary(progress: &TrainingProgress) {
    println!();
    println!("{}", "Training Summary".bold().cyan());
    println!("  Job:     {}", progress.job_id.to_string().cyan());
    let status = match progress.status {
        TrainingStatus::Completed => progress.status.to_string().green(),
        TrainingStatus::Failed => progress.status.to_string().red(),
        _ => progress.status.to_string().normal(),
    };
    println!("  Status:  {status}");
    println!("  Epochs:  {}/{}", progress.current_epoch, progress.total_epochs);
    if let Some(end) = progress.end_time {
        println!("  Elapsed: {}s", (end - progress.start_time).num_seconds());
    }
    match &progress.model_path {
        Some(path) => println!("  Model:   {}", path.green()),
        None => println!("  Model:   {}", "none detected".dimmed()),
    }
    if let Some(accuracy) = progress.final_accuracy_percent() {
        println!("  Accuracy: {accuracy:.2}%");
    }
}

pub fn print_analysis(report: &DetailedMetrics, narrative: &PerformanceAnalysis) {
    println!();
    println!("{}", "Analysis".bold().cyan());
    println!(
        "  Score:   {:.1} ({})",
        report.overall_score,
        report.performance_level.to_string().bold()
    );
    let flag = |set: bool| if set { "yes".yellow() } else { "no".dimmed() };
    println!(
        "  Converging: {}  Overfitting: {}  Underfitting: {}",
        flag(report.is_converging),
        flag(report.is_overfitting),
        flag(report.is_underfitting)
    );
    if let Some(variability) = report.loss_variability {
        println!("  Loss variability: {}", format!("{variability:?}").to_lowercase());
    }

    for insight in &report.insights {
        println!("  {} {insight}", "✓".green());
    }
    for warning in &report.warnings {
        println!("  {} {warning}", "!".yellow());
    }
    for recommendation in &report.recommendations {
        println!("  {} {recommendation}", "→".cyan());
    }

    println!();
    println!("  {}", narrative.summary);
    if !narrative.overall_assessment.is_empty() {
        println!("  {}", narrative.overall_assessment.bold());
    }
    println!();
}
