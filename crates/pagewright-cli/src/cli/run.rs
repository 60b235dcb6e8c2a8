//! Workflow execution command.
//!
//! Wires a replay script's providers into the engine and runs one document
//! to completion. Ctrl-C aborts the run cooperatively, so the artifact trail
//! is flushed before the process exits.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use serde_json::Value;

use pagewright_core::workflow::validate::{parse_document, DocumentError};
use pagewright_infra::replay::ReplayScript;
use pagewright_types::run::RunStatus;

use crate::state::AppState;

/// Execute a workflow file against scripted providers.
///
/// # Examples
///
/// ```bash
/// pwright run workflows/mail-triage.json --replay scripts/happy-path.json
/// pwright run workflows/mail-triage.json --replay s.json --var batchSize=5
/// ```
#[allow(clippy::too_many_arguments)]
pub async fn run_workflow(
    state: &AppState,
    file: &Path,
    vars: &[String],
    replay: Option<&Path>,
    timeout_secs: Option<u64>,
    show_cache: bool,
    json: bool,
) -> Result<()> {
    let text = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;

    let mut document = match parse_document(&text) {
        Ok(document) => document,
        Err(DocumentError::Parse(message)) => bail!("cannot parse {}: {message}", file.display()),
        Err(err @ DocumentError::Invalid(_)) => {
            let codes: Vec<&str> = err.issues().iter().map(|i| i.code.as_str()).collect();
            bail!(
                "{err} [{}]; run `pwright validate {}` for details",
                codes.join(", "),
                file.display()
            );
        }
    };

    if let Some(secs) = timeout_secs {
        document.config.execution_timeout_ms = secs.saturating_mul(1000);
    }

    let initial = parse_vars(vars)?;

    let (browser, cognition) = match replay {
        Some(script_path) => {
            let script = ReplayScript::load(script_path)
                .await
                .with_context(|| format!("loading replay script {}", script_path.display()))?;
            script.into_providers()
        }
        None => bail!(
            "no live browser backend is wired into this build; \
             supply --replay <script.json> with scripted provider responses"
        ),
    };

    let engine = state.engine(browser, cognition);

    // Ctrl-C aborts cooperatively instead of killing the process, so
    // in-flight artifacts land in the store before we exit.
    let abort_engine = engine.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            for execution_id in abort_engine.active_runs() {
                abort_engine.abort(execution_id);
            }
        }
    });

    let outcome = engine.run(&document, initial).await;
    ctrl_c.abort();

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        render_outcome(&outcome);
        if show_cache {
            render_cache(engine.selector_cache().entries());
        }
    }

    if outcome.status != RunStatus::Succeeded {
        std::process::exit(1);
    }
    Ok(())
}

/// Parse `KEY=VALUE` pairs; values parse as JSON first, raw string second, so
/// `--var limit=5` yields a number and `--var folder=Inbox` a string.
fn parse_vars(vars: &[String]) -> Result<HashMap<String, Value>> {
    let mut initial = HashMap::new();
    for var in vars {
        let Some((key, raw)) = var.split_once('=') else {
            bail!("--var expects KEY=VALUE, got {var:?}");
        };
        if key.is_empty() {
            bail!("--var expects a non-empty key, got {var:?}");
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        initial.insert(key.to_string(), value);
    }
    Ok(initial)
}

fn render_outcome(outcome: &pagewright_types::run::RunOutcome) {
    let status = match outcome.status {
        RunStatus::Succeeded => style("succeeded").green().bold(),
        RunStatus::Failed => style("failed").red().bold(),
        RunStatus::Escalated => style("escalated").yellow().bold(),
        RunStatus::Aborted => style("aborted").yellow().bold(),
    };
    let duration_ms = (outcome.finished_at - outcome.started_at)
        .num_milliseconds()
        .max(0);

    println!();
    println!(
        "  {} run {} {} in {duration_ms} ms",
        status,
        style(&outcome.workflow_id).cyan(),
        style(outcome.execution_id).dim(),
    );

    if !outcome.visited.is_empty() {
        println!("  path: {}", outcome.visited.join(" → "));
    }
    if let Some(error) = &outcome.error {
        println!("  {} {error}", style("error:").red());
    }
    if let Some(node) = &outcome.failed_node {
        println!("  stopped at: {}", style(node).cyan());
    }
    if let Some(artifact) = &outcome.last_artifact {
        println!(
            "  last artifact: {artifact} (pwright artifacts {})",
            outcome.execution_id
        );
    }
    println!();
}

fn render_cache(
    entries: Vec<(
        pagewright_types::selector::CacheKey,
        pagewright_types::selector::SelectorCacheEntry,
    )>,
) {
    if entries.is_empty() {
        println!("  {} no selectors learned in this run", style("i").blue().bold());
        println!();
        return;
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Domain").fg(Color::White),
        Cell::new("Kind").fg(Color::White),
        Cell::new("Selector").fg(Color::White),
        Cell::new("Tier").fg(Color::White),
        Cell::new("Reliability").fg(Color::White),
        Cell::new("Uses").fg(Color::White),
    ]);

    for (key, entry) in &entries {
        table.add_row(vec![
            Cell::new(&key.domain).fg(Color::Cyan),
            Cell::new(key.action_kind.as_str()).fg(Color::White),
            Cell::new(&entry.selector).fg(Color::White),
            Cell::new(entry.tier.as_str()).fg(Color::Magenta),
            Cell::new(format!("{:.2}", entry.reliability)).fg(Color::Yellow),
            Cell::new(entry.usage_count).fg(Color::DarkGrey),
        ]);
    }

    println!("  Selectors learned this run");
    println!();
    println!("{table}");
    println!();
}
