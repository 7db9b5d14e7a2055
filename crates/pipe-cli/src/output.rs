use crate::cmd::run::ExecutionSummary;
use serde::Serialize;
use std::path::Path;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json + "\n")?;
    Ok(())
}

/// Human-readable block printed at the end of a pipe step.
pub fn print_summary(summary: &ExecutionSummary) {
    println!();
    println!("── Claude pipe summary ──");
    println!("status:   {}", summary.status);
    println!("mode:     {}", summary.mode);
    if let Some(pr) = summary.pr_id {
        println!("pr:       #{pr}");
    }
    println!("elapsed:  {:.1}s", summary.elapsed_ms as f64 / 1000.0);
    println!("turns:    {}", summary.turns);
    if summary.tools_used.is_empty() {
        println!("tools:    none");
    } else {
        println!(
            "tools:    {} ({})",
            summary.tool_uses,
            summary.tools_used.join(", ")
        );
    }
    if let Some(error) = &summary.error {
        println!("error:    {error}");
    }
}
