//! `agentbridge config`: show the effective configuration.

use std::path::Path;

use anyhow::Result;
use console::style;

use agentbridge_types::config::BridgeConfig;

/// Print `config` as TOML (or JSON), with any validation adjustments.
pub fn show_config(config: &BridgeConfig, source: Option<&Path>, notes: &[String], json: bool) -> Result<()> {
    if json {
        let out = serde_json::json!({
            "source": source.map(|p| p.display().to_string()),
            "adjustments": notes,
            "config": config,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    match source {
        Some(path) if path.exists() => println!("  {} {}", style("Config:").bold(), style(path.display()).cyan()),
        Some(path) => println!(
            "  {} {} {}",
            style("Config:").bold(),
            style(path.display()).dim(),
            style("(not found, using defaults)").yellow()
        ),
        None => println!("  {} {}", style("Config:").bold(), style("defaults").dim()),
    }
    for note in notes {
        println!("  {} {note}", style("!").yellow().bold());
    }
    println!();
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
