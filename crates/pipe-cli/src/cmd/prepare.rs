use super::{load_config, Overrides};
use crate::output::print_json;
use pipe_core::host::BitbucketClient;
use std::path::Path;

/// Dry run: resolve the trigger, tools and prompt without posting anything
/// or starting the assistant.
pub fn run(repo_path: Option<&Path>, overrides: &Overrides, json: bool) -> anyhow::Result<()> {
    let config = load_config(repo_path, overrides, false)?;
    let client = BitbucketClient::new(config.host.clone())?;

    let rt = tokio::runtime::Runtime::new()?;
    let prepared = rt.block_on(pipe_core::prepare::prepare(&config, &client, true));

    if json {
        return print_json(&prepared);
    }

    println!("mode:     {}", prepared.mode);
    println!("event:    {}", prepared.context.event_type);
    if let Some(pr) = &prepared.context.pull_request {
        println!("pr:       #{} {}", pr.id, pr.title);
    }
    if !prepared.should_execute {
        println!("execute:  no ({} mode does not apply to this event)", prepared.mode);
        return Ok(());
    }
    if let Some(source) = &prepared.trigger_source {
        println!("trigger:  {source:?}");
    }
    if let Some(kind) = prepared.request_kind {
        println!("request:  {kind}");
    }
    println!(
        "allowed:  {}",
        if prepared.allowed_tools.is_empty() {
            "(CLI defaults)".to_string()
        } else {
            prepared.allowed_tools.join(", ")
        }
    );
    if !prepared.blocked_tools.is_empty() {
        println!("blocked:  {}", prepared.blocked_tools.join(", "));
    }
    println!();
    println!("{}", prepared.prompt);
    Ok(())
}
