//! `kiln analyze`: analysis of a saved progress document.

use super::report;
use anyhow::{Context, Result};
use kiln_training::analysis::NarrativeAnalyzer;
use kiln_training::{analyze, TrainingProgress};
use serde_json::json;
use std::path::Path;

pub async fn execute(path: &Path, json_output: bool) -> Result<()> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let progress: TrainingProgress =
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse progress document {}", path.display()))?;

    let detailed = analyze(&progress);
    let narrative = NarrativeAnalyzer::heuristic().analyze(&progress).await;

    if json_output {
        let out = json!({ "analysis": detailed, "assessment": narrative });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    report::print_summary(&progress);
    report::print_analysis(&detailed, &narrative);
    Ok(())
}
