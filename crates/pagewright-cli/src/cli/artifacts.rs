//! Artifact trail browsing command.
//!
//! Renders the per-action audit records of a past execution from the SQLite
//! store, in capture order.

use anyhow::{Context, Result};
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use uuid::Uuid;

use pagewright_core::provider::ArtifactStore;
use pagewright_types::artifact::{ActionStatus, MemoryArtifact, ResolutionPath};

use crate::state::AppState;

/// Show the artifact trail for one execution.
///
/// # Examples
///
/// ```bash
/// pwright artifacts 0192f3a1-0d75-7e4a-b0c4-3f7d2f9f4e21
/// pwright artifacts 0192f3a1-0d75-7e4a-b0c4-3f7d2f9f4e21 --node do-archive
/// ```
pub async fn show_artifacts(
    state: &AppState,
    execution_id: &str,
    node: Option<&str>,
    json: bool,
) -> Result<()> {
    let execution_id = Uuid::parse_str(execution_id)
        .with_context(|| format!("'{execution_id}' is not a valid execution UUID"))?;

    let artifacts = state
        .artifact_store()
        .query(execution_id, node)
        .await
        .context("querying the artifact store")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&artifacts)?);
        return Ok(());
    }

    if artifacts.is_empty() {
        println!();
        println!(
            "  {} no artifacts for execution {}{}",
            style("i").blue().bold(),
            style(execution_id).cyan(),
            node.map(|n| format!(" node '{n}'")).unwrap_or_default(),
        );
        println!();
        return Ok(());
    }

    render_artifact_table(&artifacts);
    Ok(())
}

fn render_artifact_table(artifacts: &[MemoryArtifact]) {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Node").fg(Color::White),
        Cell::new("#").fg(Color::White),
        Cell::new("Instruction").fg(Color::White),
        Cell::new("Path").fg(Color::White),
        Cell::new("Tries").fg(Color::White),
        Cell::new("ms").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Detail").fg(Color::White),
    ]);

    for artifact in artifacts {
        let instruction = truncate(&artifact.inputs.instruction, 48);

        let path_cell = match artifact.processing.path {
            ResolutionPath::Primary => Cell::new("primary").fg(Color::Green),
            ResolutionPath::Cached => Cell::new("cached").fg(Color::Cyan),
            ResolutionPath::Fallback => Cell::new("fallback").fg(Color::Magenta),
            ResolutionPath::None => Cell::new("-").fg(Color::DarkGrey),
        };

        let status_cell = match artifact.outputs.status {
            ActionStatus::Succeeded => Cell::new("ok").fg(Color::Green),
            ActionStatus::Failed => Cell::new("failed").fg(Color::Red),
            ActionStatus::Aborted => Cell::new("aborted").fg(Color::Yellow),
        };

        let detail = match (&artifact.outputs.error, &artifact.processing.learned) {
            (Some(error), _) => truncate(error, 40),
            (None, Some(learned)) => format!("learned {}", learned.selector),
            (None, None) => artifact
                .processing
                .selector_used
                .as_deref()
                .map(|s| truncate(s, 40))
                .unwrap_or_default(),
        };

        table.add_row(vec![
            Cell::new(&artifact.node_id).fg(Color::Cyan),
            Cell::new(artifact.action_index).fg(Color::DarkGrey),
            Cell::new(instruction).fg(Color::White),
            path_cell,
            Cell::new(artifact.processing.attempts).fg(Color::Yellow),
            Cell::new(artifact.processing.duration_ms).fg(Color::DarkGrey),
            status_cell,
            Cell::new(detail).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!(
        "  Artifacts for execution {}",
        style(artifacts[0].execution_id).cyan().bold()
    );
    println!();
    println!("{table}");
    println!();
    println!(
        "  {} artifact{}",
        style(artifacts.len()).bold(),
        if artifacts.len() == 1 { "" } else { "s" }
    );
    println!();
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let prefix: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{prefix}...")
    } else {
        text.to_string()
    }
}
