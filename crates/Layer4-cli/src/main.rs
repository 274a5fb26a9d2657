//! agentbox CLI - Main entry point

mod cli;

use agentbox_foundation::AgentboxConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// agentbox - run coding tasks in disposable, isolated workspaces
#[derive(Parser, Debug)]
#[command(name = "agentbox")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    command: Command,

    /// Workspace root (overrides config and AGENTBOX_WORKSPACE_ROOT)
    #[arg(short, long, global = true)]
    workspace: Option<PathBuf>,

    /// Print job details as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Schedule a task and follow it until it finishes
    Run {
        /// Task description
        task: String,

        /// Seconds to wait for the job to finish
        #[arg(short, long, default_value = "300")]
        timeout: u64,
    },
    /// Show a job's status and log
    Status {
        job_id: String,
    },
    /// List known jobs
    List,
    /// Show a job's file tree
    Files {
        job_id: String,
    },
    /// Print one file from a job's workspace
    Cat {
        job_id: String,
        path: String,
    },
    /// Run a command against a completed job
    Exec {
        job_id: String,

        /// Command line (joined with spaces)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },
    /// Remove every sandbox container and stop background processes
    Cleanup,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Load configuration
    let mut config = AgentboxConfig::load().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config, using defaults: {}", e);
        AgentboxConfig::default()
    });
    if let Some(root) = &args.workspace {
        config = config.with_workspace_root(root);
    }
    tracing::debug!("Workspace root: {}", config.workspace.root.display());

    let app = cli::App::new(config)?;
    app.dispatch(args.command, args.json).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_exec_trailing_args() {
        let args = Args::try_parse_from(["agentbox", "exec", "job_1", "ls", "-la"]).unwrap();
        assert_eq!(
            args.command,
            Command::Exec {
                job_id: "job_1".into(),
                command: vec!["ls".into(), "-la".into()],
            }
        );
    }

    #[test]
    fn test_parse_run_defaults() {
        let args = Args::try_parse_from(["agentbox", "--debug", "run", "Build a counter"]).unwrap();
        assert!(args.debug);
        assert_eq!(
            args.command,
            Command::Run {
                task: "Build a counter".into(),
                timeout: 300,
            }
        );
    }
}
