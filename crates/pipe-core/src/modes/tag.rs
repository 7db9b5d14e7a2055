use super::{
    comments_or_empty, diff_or_empty, diff_section, extract_after_phrase, find_trigger,
    inline_section, pull_request_section, repository_header, ModeContext, ModeStrategy,
    TriggerSource, DEFAULT_REQUEST,
};
use crate::config::{Mode, PipeConfig};
use crate::context::{CommitSnapshot, PullRequestSnapshot, TriggerContext};
use crate::host::HostApi;
use crate::tools::select_tools;
use async_trait::async_trait;

/// Responds to a human mention of the trigger phrase.
pub struct TagMode;

#[async_trait]
impl ModeStrategy for TagMode {
    fn mode(&self) -> Mode {
        Mode::Tag
    }

    /// Applicability was decided by whoever selected tag mode.
    fn should_trigger(&self, _config: &PipeConfig, _context: &TriggerContext) -> bool {
        true
    }

    async fn prepare_context(
        &self,
        config: &PipeConfig,
        context: &TriggerContext,
        host: &dyn HostApi,
    ) -> ModeContext {
        match (&context.pull_request, &context.commit) {
            (Some(pr), _) => pull_request_context(config, context, pr, host).await,
            (None, Some(commit)) => commit_context(config, context, commit),
            (None, None) => repository_context(config, context),
        }
    }
}

async fn pull_request_context(
    config: &PipeConfig,
    context: &TriggerContext,
    pr: &PullRequestSnapshot,
    host: &dyn HostApi,
) -> ModeContext {
    let comments = comments_or_empty(host, pr.id).await;
    let diff = diff_or_empty(host, pr.id).await;

    let mut out = ModeContext::default();
    if let Some(found) = find_trigger(pr, &comments, &config.trigger_phrase) {
        tracing::info!(source = ?found.source, "found trigger phrase");
        out.apply_trigger(&found);
    } else {
        tracing::info!(pr_id = pr.id, "no trigger phrase found; using default request");
    }

    let request = out.user_request.as_deref().unwrap_or(DEFAULT_REQUEST);
    let mut prompt = String::new();
    prompt.push_str("You are assisting with a Bitbucket pull request.\n\n");
    prompt.push_str(&repository_header(context));
    prompt.push('\n');
    prompt.push_str(&pull_request_section(pr));
    prompt.push_str(&format!("\n## Request\n{request}\n"));
    if let Some(anchor) = &out.inline {
        prompt.push_str(&inline_section(anchor));
    }
    prompt.push_str(&diff_section(&diff));
    prompt.push_str(&format!(
        "\nYou are working in a checkout of `{}`. Make changes only when the request asks \
         for them, and finish with a concise summary of what you did or found.\n",
        pr.source_branch
    ));

    out.prompt = prompt;
    out.tools = select_tools(config, out.user_request.as_deref());
    out
}

fn commit_context(config: &PipeConfig, context: &TriggerContext, commit: &CommitSnapshot) -> ModeContext {
    let mut out = ModeContext::default();
    if let Some(rest) = extract_after_phrase(&commit.message, &config.trigger_phrase) {
        out.trigger_source = Some(TriggerSource::Commit);
        out.user_request = Some(rest).filter(|r| !r.is_empty());
    }

    let request = out
        .user_request
        .as_deref()
        .unwrap_or("Review this commit and provide feedback.");
    let mut prompt = String::new();
    prompt.push_str("You are assisting with a commit in a Bitbucket repository.\n\n");
    prompt.push_str(&repository_header(context));
    prompt.push_str(&format!(
        "\n## Commit {}\n- Author: {}\n",
        commit.hash, commit.author
    ));
    if let Some(branch) = &config.branch {
        prompt.push_str(&format!("- Branch: {branch}\n"));
    }
    if !commit.message.trim().is_empty() {
        prompt.push_str(&format!("\n### Message\n{}\n", commit.message.trim()));
    }
    prompt.push_str(&format!("\n## Request\n{request}\n"));

    out.prompt = prompt;
    out.tools = select_tools(config, out.user_request.as_deref());
    out
}

fn repository_context(config: &PipeConfig, context: &TriggerContext) -> ModeContext {
    let mut prompt = String::new();
    prompt.push_str("You are assisting with a Bitbucket repository.\n\n");
    prompt.push_str(&repository_header(context));
    if let Some(branch) = &config.branch {
        prompt.push_str(&format!("Branch: {branch}\n"));
    }
    prompt.push_str(
        "\n## Request\nReview the repository and provide feedback on code quality \
         and any issues you notice.\n",
    );
    ModeContext {
        prompt,
        tools: select_tools(config, None),
        ..ModeContext::default()
    }
}
