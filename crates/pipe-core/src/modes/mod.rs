//! Mode strategies: when to run and what to ask.
//!
//! Each strategy answers two questions for a [`TriggerContext`]: should the
//! assistant run at all, and with which prompt and tool permissions.
//! Host API reads inside a strategy never fail the invocation; they degrade
//! to whatever context is available locally.

use crate::config::{Mode, PipeConfig};
use crate::context::{InlineAnchor, PrComment, PullRequestSnapshot, TriggerContext};
use crate::host::HostApi;
use crate::tools::ToolSelection;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod agent;
pub mod review;
pub mod tag;

pub use agent::AgentMode;
pub use review::ReviewMode;
pub use tag::TagMode;

/// Diffs beyond this size are cut before embedding in a prompt.
pub const MAX_DIFF_BYTES: usize = 60_000;

pub const DEFAULT_REQUEST: &str = "Please review this pull request and provide feedback.";

// ---------------------------------------------------------------------------
// ModeContext
// ---------------------------------------------------------------------------

/// Where the trigger phrase was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Description,
    Comment,
    Commit,
}

/// Output of [`ModeStrategy::prepare_context`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModeContext {
    pub prompt: String,
    pub tools: ToolSelection,
    pub trigger_source: Option<TriggerSource>,
    /// The comment carrying the trigger phrase.
    pub trigger_comment_id: Option<u64>,
    pub inline: Option<InlineAnchor>,
    /// Replies are threaded under this comment.
    pub parent_comment_id: Option<u64>,
    /// Text after the trigger phrase, when a human asked for something.
    pub user_request: Option<String>,
}

// ---------------------------------------------------------------------------
// ModeStrategy
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ModeStrategy: Send + Sync {
    fn mode(&self) -> Mode;

    fn should_trigger(&self, config: &PipeConfig, context: &TriggerContext) -> bool;

    async fn prepare_context(
        &self,
        config: &PipeConfig,
        context: &TriggerContext,
        host: &dyn HostApi,
    ) -> ModeContext;
}

/// The strategy for a configured mode.
pub fn strategy_for(mode: Mode) -> Box<dyn ModeStrategy> {
    match mode {
        Mode::Tag => Box::new(TagMode),
        Mode::Agent => Box::new(AgentMode),
        Mode::Review => Box::new(ReviewMode),
    }
}

// ---------------------------------------------------------------------------
// Trigger scanning
// ---------------------------------------------------------------------------

/// A located trigger phrase.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerMatch {
    pub source: TriggerSource,
    /// Non-empty text after the phrase.
    pub request: Option<String>,
    pub comment: Option<PrComment>,
}

/// `Some(rest)` when `text` contains `phrase` (ASCII case-insensitive);
/// `rest` is the trimmed text after the first occurrence and may be empty.
pub fn extract_after_phrase(text: &str, phrase: &str) -> Option<String> {
    if phrase.is_empty() {
        return None;
    }
    let idx = text
        .to_ascii_lowercase()
        .find(&phrase.to_ascii_lowercase())?;
    Some(text[idx + phrase.len()..].trim().to_string())
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Newest comment containing the phrase. Comments are oldest first.
pub fn latest_trigger_comment<'a>(comments: &'a [PrComment], phrase: &str) -> Option<&'a PrComment> {
    comments
        .iter()
        .rev()
        .find(|c| extract_after_phrase(&c.raw, phrase).is_some())
}

/// Scan comments newest to oldest.
pub fn find_in_comments(comments: &[PrComment], phrase: &str) -> Option<TriggerMatch> {
    let comment = latest_trigger_comment(comments, phrase)?;
    let request = extract_after_phrase(&comment.raw, phrase).and_then(non_empty);
    Some(TriggerMatch {
        source: TriggerSource::Comment,
        request,
        comment: Some(comment.clone()),
    })
}

/// Description first, then comments newest to oldest.
pub fn find_trigger(
    pr: &PullRequestSnapshot,
    comments: &[PrComment],
    phrase: &str,
) -> Option<TriggerMatch> {
    if let Some(rest) = extract_after_phrase(&pr.description, phrase) {
        return Some(TriggerMatch {
            source: TriggerSource::Description,
            request: non_empty(rest),
            comment: None,
        });
    }
    find_in_comments(comments, phrase)
}

impl ModeContext {
    /// Copy threading details from a comment match.
    fn apply_trigger(&mut self, found: &TriggerMatch) {
        self.trigger_source = Some(found.source);
        self.user_request = found.request.clone();
        if let Some(comment) = &found.comment {
            self.trigger_comment_id = Some(comment.id);
            self.parent_comment_id = Some(comment.id);
            self.inline = comment.inline.clone();
        }
    }
}

// ---------------------------------------------------------------------------
// Degrading reads
// ---------------------------------------------------------------------------

pub(crate) async fn comments_or_empty(host: &dyn HostApi, pr_id: u64) -> Vec<PrComment> {
    match host.get_pull_request_comments(pr_id).await {
        Ok(comments) => comments,
        Err(e) => {
            tracing::warn!(pr_id, error = %e, "could not list comments; continuing without them");
            Vec::new()
        }
    }
}

pub(crate) async fn diff_or_empty(host: &dyn HostApi, pr_id: u64) -> String {
    match host.get_pull_request_diff(pr_id).await {
        Ok(diff) => diff,
        Err(e) => {
            tracing::warn!(pr_id, error = %e, "could not fetch diff; continuing without it");
            String::new()
        }
    }
}

// ---------------------------------------------------------------------------
// Prompt fragments
// ---------------------------------------------------------------------------

pub(crate) fn repository_header(context: &TriggerContext) -> String {
    format!(
        "Repository: {} (default branch: {})\nEvent: {}\nTriggered by: {}\n",
        context.repository.full_name,
        context.repository.default_branch,
        context.event_type,
        context.actor
    )
}

pub(crate) fn pull_request_section(pr: &PullRequestSnapshot) -> String {
    let mut out = format!(
        "## Pull Request #{}: {}\n- Author: {}\n- Branch: {} -> {}\n- State: {}\n",
        pr.id, pr.title, pr.author, pr.source_branch, pr.destination_branch, pr.state
    );
    if !pr.description.trim().is_empty() {
        out.push_str("\n### Description\n");
        out.push_str(pr.description.trim());
        out.push('\n');
    }
    out
}

pub(crate) fn diff_section(diff: &str) -> String {
    if diff.trim().is_empty() {
        return String::new();
    }
    let (body, truncated) = if diff.len() > MAX_DIFF_BYTES {
        let mut end = MAX_DIFF_BYTES;
        while !diff.is_char_boundary(end) {
            end -= 1;
        }
        (&diff[..end], true)
    } else {
        (diff, false)
    };
    let mut out = format!("\n## Changes\n```diff\n{}\n```\n", body.trim_end());
    if truncated {
        out.push_str("(diff truncated; read the files directly for the rest)\n");
    }
    out
}

pub(crate) fn inline_section(anchor: &InlineAnchor) -> String {
    format!(
        "\nThis request was left as an inline comment on `{anchor}`. Focus on that location.\n"
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn comment(id: u64, raw: &str) -> PrComment {
        PrComment {
            id,
            author: "bob".into(),
            raw: raw.into(),
            inline: None,
            parent_id: None,
        }
    }

    #[test]
    fn extracts_text_after_phrase_case_insensitively() {
        assert_eq!(
            extract_after_phrase("Hey @Claude  please fix the null check ", "@claude"),
            Some("please fix the null check".into())
        );
        assert_eq!(extract_after_phrase("@claude", "@claude"), Some(String::new()));
        assert_eq!(extract_after_phrase("no mention here", "@claude"), None);
        assert_eq!(extract_after_phrase("anything", ""), None);
    }

    #[test]
    fn latest_of_three_comments_wins() {
        let comments = vec![
            comment(1, "@claude first"),
            comment(2, "unrelated"),
            comment(3, "@claude second"),
            comment(4, "@claude third"),
            comment(5, "thanks!"),
        ];
        let found = find_in_comments(&comments, "@claude").unwrap();
        assert_eq!(found.request.as_deref(), Some("third"));
        assert_eq!(found.comment.unwrap().id, 4);
    }

    #[test]
    fn description_takes_precedence_over_comments() {
        let pr = PullRequestSnapshot {
            id: 1,
            title: "t".into(),
            description: "@claude add tests".into(),
            source_branch: String::new(),
            destination_branch: String::new(),
            author: String::new(),
            state: "OPEN".into(),
            created_on: None,
            updated_on: None,
        };
        let found = find_trigger(&pr, &[comment(9, "@claude other")], "@claude").unwrap();
        assert_eq!(found.source, TriggerSource::Description);
        assert_eq!(found.request.as_deref(), Some("add tests"));
        assert!(found.comment.is_none());
    }

    #[test]
    fn bare_phrase_yields_no_request() {
        let found = find_in_comments(&[comment(2, "@claude")], "@claude").unwrap();
        assert!(found.request.is_none());
    }

    #[test]
    fn large_diffs_are_truncated() {
        let diff = "+x\n".repeat(MAX_DIFF_BYTES);
        let section = diff_section(&diff);
        assert!(section.contains("diff truncated"));
        assert!(section.len() < MAX_DIFF_BYTES + 200);
        assert_eq!(diff_section("  \n"), "");
    }

    #[test]
    fn factory_maps_modes() {
        for mode in [Mode::Tag, Mode::Agent, Mode::Review] {
            assert_eq!(strategy_for(mode).mode(), mode);
        }
    }
}
