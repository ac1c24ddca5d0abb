use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "hailstorm")]
#[command(about = "Hailstorm - input and output safety gates for AI agents")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "hailstorm.json")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP gateway
    Serve,
    /// Dry-run one gate against a prompt (exit code 1 on denial)
    Check {
        /// Agent the prompt is addressed to
        #[arg(long)]
        agent: String,
        /// Caller role for RBAC
        #[arg(long)]
        role: Option<String>,
        /// Gate to run
        #[arg(long, value_enum, default_value = "input")]
        stage: StageArg,
        /// Agent response to check (output stage only)
        #[arg(long)]
        response: Option<String>,
        /// Prompt text
        prompt: String,
    },
    /// Run the weighted-graph route demo through both gates
    Simulate {
        /// Scenario file (defaults to the built-in four-node ring)
        #[arg(long)]
        scenario: Option<PathBuf>,
    },
    /// View gate audit entries
    Audit {
        /// Show last N entries
        #[arg(long, default_value = "50")]
        tail: usize,
        /// Export every entry
        #[arg(long)]
        export: bool,
        /// Export format (json or csv)
        #[arg(long, default_value = "json")]
        format: String,
    },
    /// Show audit statistics and the configured gates
    Status,
    /// Initialize Hailstorm configuration
    Init,
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StageArg {
    Input,
    Output,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the gates a config file sets up
    Show,
    /// Overwrite the config file with a template
    Template {
        /// Template name (default, strict)
        name: String,
    },
}
