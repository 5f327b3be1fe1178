//! `kiln models`: trained models recorded in the registry.

use anyhow::{Context, Result};
use colored::Colorize;
use kiln_training::{FileModelRegistry, TrainingConfig};
use std::path::Path;

pub fn execute(config_path: Option<&Path>, json_output: bool) -> Result<()> {
    let config = TrainingConfig::discover_and_load(config_path).context("Failed to load configuration")?;
    let layout = config.layout()?;
    let registry = FileModelRegistry::new(layout.registry_dir());
    let models = registry.discover_trained_models().context("Failed to read the model registry")?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&models)?);
        return Ok(());
    }

    println!();
    println!("{}", format!("Trained Models ({})", models.len()).bold().cyan());
    println!();

    if models.is_empty() {
        println!("  {}", "No trained models recorded yet.".dimmed());
        println!("  {}", "Tip: `kiln run --folder <name> --script <file>` registers the model it produces.".dimmed());
        return Ok(());
    }

    println!("{:<24} {:<10} {:<22} Path", "Entity", "Accuracy", "Updated");
    println!("{}", "─".repeat(90));
    for m in models {
        let accuracy = m.accuracy_percent.map_or_else(|| "-".to_string(), |a| format!("{a:.2}%"));
        println!(
            "{:<24} {:<10} {:<22} {}",
            m.entity.cyan(),
            accuracy,
            m.updated_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            m.model_path
        );
    }
    println!();
    Ok(())
}
