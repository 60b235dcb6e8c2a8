//! Selector cache information command.
//!
//! The selector cache lives for the lifetime of the engine process and is not
//! persisted, so a standalone invocation has nothing to show. This command
//! explains that and points at `run --show-cache`.

use anyhow::Result;
use console::style;

pub fn explain_cache(domain: Option<&str>, json: bool) -> Result<()> {
    if json {
        let report = serde_json::json!({
            "entries": [],
            "note": "the selector cache is process-lifetime; use `pwright run --show-cache` to see selectors learned during a run",
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} the selector cache lives inside a running engine process and is not persisted.",
        style("i").blue().bold(),
    );
    if let Some(domain) = domain {
        println!(
            "  Selectors learned for {} exist only while the engine that learned them runs.",
            style(domain).cyan()
        );
    }
    println!(
        "  Use {} to print the selectors a run learned before the process exits.",
        style("pwright run --show-cache").cyan()
    );
    println!();
    Ok(())
}
