//! CLI command definitions and dispatch for the `pwright` binary.
//!
//! Uses clap derive macros for argument parsing. Commands operate on workflow
//! document files and the artifact database; `run` executes against scripted
//! replay providers.

pub mod artifacts;
pub mod cache;
pub mod run;
pub mod validate;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Execute declarative browser workflows.
#[derive(Parser)]
#[command(name = "pwright", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Parse and validate a workflow document.
    Validate {
        /// Path to the workflow JSON file.
        file: PathBuf,
    },

    /// Execute a workflow document.
    Run {
        /// Path to the workflow JSON file.
        file: PathBuf,

        /// Initial context variable, KEY=VALUE; values parse as JSON when
        /// possible, strings otherwise. Repeatable.
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,

        /// Replay script supplying scripted browser and reasoning providers.
        #[arg(long, value_name = "SCRIPT")]
        replay: Option<PathBuf>,

        /// Override the document's execution timeout.
        #[arg(long, value_name = "SECONDS")]
        timeout_secs: Option<u64>,

        /// Print selectors learned during this run.
        #[arg(long)]
        show_cache: bool,
    },

    /// Show the artifact trail of a past execution.
    Artifacts {
        /// Execution UUID.
        execution_id: String,

        /// Narrow to one node.
        #[arg(long)]
        node: Option<String>,
    },

    /// Explain the selector cache lifetime.
    Cache {
        /// Domain of interest.
        #[arg(long)]
        domain: Option<String>,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
