//! `kiln run`: one supervised training job in the foreground.

use super::report;
use anyhow::{Context, Result};
use colored::Colorize;
use kiln_training::analysis::NarrativeAnalyzer;
use kiln_training::{
    analyze, BroadcastGateway, ChannelSubscriber, FileModelRegistry, OwnerId, ProcessSupervisor, ProgressStore,
    TrainingConfig, TrainingJob, TrainingStatus,
};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug)]
pub struct RunOptions {
    pub folder: String,
    pub script: String,
    pub interpreter: Option<String>,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub owner: u64,
    pub json: bool,
}

/// Parses a `KEY=VALUE` pair.
pub fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

pub async fn execute(config_path: Option<&Path>, options: RunOptions) -> Result<()> {
    let config = TrainingConfig::discover_and_load(config_path).context("Failed to load configuration")?;
    let layout = config.layout()?;
    let registry = Arc::new(FileModelRegistry::new(layout.registry_dir()));
    let gateway = Arc::new(BroadcastGateway::new());
    let supervisor = Arc::new(ProcessSupervisor::new(config, Arc::new(ProgressStore::new()), gateway.clone(), registry)?);

    let owner = OwnerId(options.owner);
    let (subscriber, mut events) = ChannelSubscriber::channel();
    gateway.subscribe(owner, None, Arc::new(subscriber));

    let mut job = TrainingJob::new(owner, &options.folder, &options.script);
    if let Some(interpreter) = options.interpreter {
        job = job.with_interpreter(interpreter);
    }
    job.args = options.args;
    job.env.extend(options.env);

    let (job_id, _) = supervisor
        .start_training(job)
        .with_context(|| format!("Failed to start training for '{}'", options.folder))?;
    if !options.json {
        println!("Started {}", job_id.to_string().cyan());
    }

    let finished = supervisor.wait_for(&job_id);
    tokio::pin!(finished);
    let progress = loop {
        tokio::select! {
            Some(message) = events.recv() => {
                if options.json {
                    println!("{}", serde_json::to_string(&message)?);
                } else {
                    report::print_event(&message.event);
                }
            }
            result = &mut finished => break result?,
            _ = tokio::signal::ctrl_c() => supervisor.shutdown(),
        }
    };
    while let Ok(message) = events.try_recv() {
        if options.json {
            println!("{}", serde_json::to_string(&message)?);
        } else {
            report::print_event(&message.event);
        }
    }

    let detailed = analyze(&progress);
    let narrative = NarrativeAnalyzer::heuristic().analyze(&progress).await;
    if options.json {
        let summary = json!({
            "training_id": progress.job_id,
            "type": "summary",
            "data": { "progress": progress, "analysis": detailed, "assessment": narrative },
        });
        println!("{}", serde_json::to_string(&summary)?);
    } else {
        report::print_summary(&progress);
        report::print_analysis(&detailed, &narrative);
    }

    if progress.status == TrainingStatus::Failed {
        anyhow::bail!(
            "training job {} failed: {}",
            progress.job_id,
            progress.error_message.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_pair() {
        assert_eq!(parse_env_pair("LR=0.01").unwrap(), ("LR".to_string(), "0.01".to_string()));
        assert_eq!(parse_env_pair("EMPTY=").unwrap(), ("EMPTY".to_string(), String::new()));
        assert_eq!(parse_env_pair("A=b=c").unwrap(), ("A".to_string(), "b=c".to_string()));
        assert!(parse_env_pair("novalue").is_err());
        assert!(parse_env_pair("=x").is_err());
    }
}
