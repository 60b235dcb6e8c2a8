//! Workflow document validation command.
//!
//! Parses the file and runs the full structural validator, printing every
//! issue found rather than stopping at the first.

use std::path::Path;

use anyhow::{Context, Result};
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;

use pagewright_core::workflow::validate::{parse_document, DocumentError};

/// Validate a workflow file and report issues.
///
/// # Examples
///
/// ```bash
/// pwright validate workflows/mail-triage.json
/// pwright validate workflows/mail-triage.json --json
/// ```
pub async fn validate_file(file: &Path, json: bool) -> Result<()> {
    let text = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;

    match parse_document(&text) {
        Ok(doc) => {
            if json {
                let report = serde_json::json!({
                    "valid": true,
                    "workflow": doc.meta.id,
                    "version": doc.meta.version,
                    "nodes": doc.workflow.nodes.len(),
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!();
                println!(
                    "  {} '{}' v{} is valid ({} node{})",
                    style("✓").green().bold(),
                    style(&doc.meta.id).cyan(),
                    doc.meta.version,
                    doc.workflow.nodes.len(),
                    if doc.workflow.nodes.len() == 1 { "" } else { "s" },
                );
                println!();
            }
            Ok(())
        }
        Err(DocumentError::Parse(message)) => {
            if json {
                let report = serde_json::json!({"valid": false, "parseError": message});
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!();
                println!("  {} {}", style("✗").red().bold(), message);
                println!();
            }
            std::process::exit(1);
        }
        Err(DocumentError::Invalid(issues)) => {
            if json {
                let report = serde_json::json!({"valid": false, "issues": issues});
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                render_issue_table(&issues);
            }
            std::process::exit(1);
        }
    }
}

fn render_issue_table(issues: &[pagewright_types::error::ValidationIssue]) {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Code").fg(Color::White),
        Cell::new("Node").fg(Color::White),
        Cell::new("Message").fg(Color::White),
    ]);

    for issue in issues {
        table.add_row(vec![
            Cell::new(&issue.code).fg(Color::Yellow),
            Cell::new(issue.node_id.as_deref().unwrap_or("-")).fg(Color::Cyan),
            Cell::new(&issue.message).fg(Color::White),
        ]);
    }

    println!();
    println!(
        "  {} document failed validation",
        style("✗").red().bold(),
    );
    println!();
    println!("{table}");
    println!();
    println!(
        "  {} issue{}",
        style(issues.len()).bold(),
        if issues.len() == 1 { "" } else { "s" }
    );
    println!();
}
