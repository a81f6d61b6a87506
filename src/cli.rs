use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::config::ReportFormat;

#[derive(Parser)]
#[command(name = "converge")]
#[command(version)]
#[command(about = "Declarative, idempotent host provisioning", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Converge a host to the state declared in a task file
    Apply(ApplyArgs),

    /// Show the execution layers of a task file without contacting a host
    Plan {
        /// Task file (TOML or JSON)
        file: PathBuf,
    },

    /// Check a task file: dependencies, parameters, templates
    Validate {
        /// Task file (TOML or JSON)
        file: PathBuf,

        /// Extra template variable (KEY=VALUE), repeatable
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<(String, String)>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Apply
// ============================================================================

#[derive(Args)]
pub struct ApplyArgs {
    /// Task file (TOML or JSON)
    pub file: PathBuf,

    /// Probe and report without mutating anything
    #[arg(long)]
    pub check: bool,

    /// Show content diffs for file changes
    #[arg(long)]
    pub diff: bool,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Maximum concurrent tasks per layer
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Target host (overrides the task file; `localhost` runs locally)
    #[arg(long, env = "CONVERGE_HOST")]
    pub host: Option<String>,

    /// Remote user
    #[arg(long)]
    pub user: Option<String>,

    /// Authentication reference: `agent` or `key:<path>`
    #[arg(long = "auth-ref")]
    pub auth_ref: Option<String>,

    /// SSH port
    #[arg(long)]
    pub port: Option<u16>,

    /// Escalate privileges on the target with sudo
    #[arg(long = "become")]
    pub become_root: bool,

    /// Extra template variable (KEY=VALUE), repeatable
    #[arg(long = "var", value_parser = parse_var)]
    pub vars: Vec<(String, String)>,

    /// Report format
    #[arg(long, value_enum)]
    pub format: Option<ReportFormat>,

    /// Cancel the run after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

/// Parse `KEY=VALUE`
fn parse_var(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}
