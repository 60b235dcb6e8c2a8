//! Pagewright CLI entry point.
//!
//! Binary name: `pwright`
//!
//! Parses CLI arguments, initializes the artifact database and provider
//! wiring where a command needs them, then dispatches to the command handler.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,pagewright=debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "pwright", &mut std::io::stdout());
        return Ok(());
    }

    match cli.command {
        Commands::Validate { file } => {
            cli::validate::validate_file(&file, cli.json).await?;
        }

        Commands::Run {
            file,
            vars,
            replay,
            timeout_secs,
            show_cache,
        } => {
            let state = AppState::init().await?;
            cli::run::run_workflow(
                &state,
                &file,
                &vars,
                replay.as_deref(),
                timeout_secs,
                show_cache,
                cli.json,
            )
            .await?;
        }

        Commands::Artifacts { execution_id, node } => {
            let state = AppState::init().await?;
            cli::artifacts::show_artifacts(&state, &execution_id, node.as_deref(), cli.json)
                .await?;
        }

        Commands::Cache { domain } => {
            cli::cache::explain_cache(domain.as_deref(), cli.json)?;
        }

        Commands::Completions { .. } => unreachable!("handled above"),
    }

    Ok(())
}
