mod cmd;
mod output;
mod tools;

use clap::{Parser, Subcommand};
use cmd::Overrides;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "claude-pipe",
    about = "Bitbucket Pipelines pipe: run Claude on pull requests, commits and schedules",
    version,
    propagate_version = true
)]
struct Cli {
    /// Repository checkout the assistant works in (default: current directory)
    #[arg(long, global = true, env = "BITBUCKET_CLONE_DIR")]
    repo_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect the trigger, run Claude and post the result (pipe entry point)
    Run {
        #[command(flatten)]
        overrides: Overrides,

        /// Write the execution summary as JSON to this file
        #[arg(long, env = "SUMMARY_FILE")]
        summary_file: Option<PathBuf>,
    },

    /// Show the prompt and tool selection without posting or running anything
    Prepare {
        #[command(flatten)]
        overrides: Overrides,

        /// Output as JSON
        #[arg(long, short = 'j')]
        json: bool,
    },

    /// Classify a request as actionable or informational
    Classify {
        /// Request text, e.g. "please fix the null check on line 42"
        text: String,

        /// Output as JSON
        #[arg(long, short = 'j')]
        json: bool,
    },

    /// Serve Bitbucket tools over MCP on stdio (launched by the Claude CLI)
    Mcp,
}

fn debug_requested() -> bool {
    std::env::var("DEBUG")
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

fn main() {
    let cli = Cli::parse();

    let default_level = if debug_requested() {
        tracing::Level::DEBUG
    } else {
        match &cli.command {
            Commands::Run { .. } | Commands::Mcp => tracing::Level::INFO,
            _ => tracing::Level::WARN,
        }
    };

    // stdout carries comments, summaries and the MCP channel; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let repo_path = cli.repo_path.as_deref();

    let result = match cli.command {
        Commands::Run {
            overrides,
            summary_file,
        } => cmd::run::run(repo_path, &overrides, summary_file.as_deref()),
        Commands::Prepare { overrides, json } => cmd::prepare::run(repo_path, &overrides, json),
        Commands::Classify { text, json } => cmd::classify::run(&text, json),
        Commands::Mcp => cmd::mcp::run(),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
