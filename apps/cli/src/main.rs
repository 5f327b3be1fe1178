//! Kiln CLI - run and inspect training scripts from the command line.
//!
//! The `kiln` command launches a script under the training supervisor,
//! streams its events, and prints the post-run analysis.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use commands::{analyze, models, run};

/// Kiln - supervised training runs for user-supplied scripts
#[derive(Parser, Debug)]
#[command(name = "kiln", author, version, about = "Kiln - supervised training runs")]
struct Args {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` takes precedence.
    #[arg(short, long, default_value = "warn", global = true)]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Configuration file (defaults to ./kiln.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a training script and stream its progress
    ///
    /// The script runs with `<upload_root>/<folder>` as its working directory.
    /// Exits non-zero if the job fails.
    Run {
        /// Folder under the upload root that holds the script
        #[arg(long)]
        folder: String,

        /// Script file inside the folder
        #[arg(long)]
        script: String,

        /// Interpreter to run the script with (defaults to the configured one)
        #[arg(long)]
        interpreter: Option<String>,

        /// Extra argument passed to the script (repeatable)
        #[arg(long = "arg", allow_hyphen_values = true)]
        args: Vec<String>,

        /// Extra environment variable as KEY=VALUE (repeatable)
        #[arg(long = "env", value_parser = run::parse_env_pair)]
        env: Vec<(String, String)>,

        /// Owner the job is attributed to
        #[arg(long, default_value_t = 0)]
        owner: u64,

        /// Print every event as a JSON line
        #[arg(long)]
        json: bool,
    },

    /// List trained models recorded in the registry
    Models {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Analyze a saved progress document
    Analyze {
        /// Path to a progress JSON file
        #[arg(long)]
        progress: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(level: &str, json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false).with_writer(std::io::stderr);
    if json {
        builder.json().try_init().map_err(|e| anyhow::anyhow!(e))?;
    } else {
        builder.without_time().try_init().map_err(|e| anyhow::anyhow!(e))?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level, args.log_json)?;
    tracing::debug!(command = ?args.command, "dispatching");

    match args.command {
        Command::Run { folder, script, interpreter, args: script_args, env, owner, json } => {
            let options = run::RunOptions { folder, script, interpreter, args: script_args, env, owner, json };
            run::execute(args.config.as_deref(), options).await?;
        }
        Command::Models { json } => {
            models::execute(args.config.as_deref(), json)?;
        }
        Command::Analyze { progress, json } => {
            analyze::execute(&progress, json).await?;
        }
    }

    Ok(())
}
