use crate::classifier::RequestKind;
use crate::comment::tracking_body;
use crate::config::{Mode, PipeConfig};
use crate::context::{InlineAnchor, TriggerContext};
use crate::host::HostApi;
use crate::modes::{strategy_for, TriggerSource};
use crate::runner::RunRequest;
use serde::{Deserialize, Serialize};

/// Everything the runner needs, decided once before it starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparedExecution {
    pub should_execute: bool,
    pub mode: Mode,
    pub context: TriggerContext,
    pub prompt: String,
    pub allowed_tools: Vec<String>,
    pub blocked_tools: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_kind: Option<RequestKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_request: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_source: Option<TriggerSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_comment_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracking_comment_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline: Option<InlineAnchor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_comment_id: Option<u64>,
}

impl PreparedExecution {
    fn skipped(mode: Mode, context: TriggerContext) -> Self {
        Self {
            should_execute: false,
            mode,
            context,
            prompt: String::new(),
            allowed_tools: Vec::new(),
            blocked_tools: Vec::new(),
            request_kind: None,
            user_request: None,
            trigger_source: None,
            trigger_comment_id: None,
            tracking_comment_id: None,
            inline: None,
            parent_comment_id: None,
        }
    }

    /// Hand off to the runner. Updates thread under the trigger comment, or
    /// under the tracking comment when there is none.
    pub fn into_run_request(self) -> RunRequest {
        RunRequest {
            prompt: self.prompt,
            pr_id: self.context.pull_request.as_ref().map(|pr| pr.id),
            tracking_comment_id: self.tracking_comment_id,
            inline: self.inline,
            parent_comment_id: self.parent_comment_id.or(self.tracking_comment_id),
            allowed_tools: self.allowed_tools,
            blocked_tools: self.blocked_tools,
        }
    }
}

/// Decide whether to run and build the prompt.
///
/// With `dry_run` no tracking comment is posted. Host failures never
/// surface here; they degrade the context instead.
pub async fn prepare(config: &PipeConfig, host: &dyn HostApi, dry_run: bool) -> PreparedExecution {
    let context = TriggerContext::build(config, host).await;
    let strategy = strategy_for(config.mode);

    if !strategy.should_trigger(config, &context) {
        tracing::info!(mode = %config.mode, event = %context.event_type, "mode does not apply; skipping");
        return PreparedExecution::skipped(config.mode, context);
    }

    let prepared = strategy.prepare_context(config, &context, host).await;
    tracing::info!(
        mode = %config.mode,
        source = ?prepared.trigger_source,
        allowed = prepared.tools.allowed.len(),
        "prepared assistant run"
    );

    let tracking_comment_id = match (&context.pull_request, dry_run) {
        (Some(pr), false) => {
            host.create_pull_request_comment(
                pr.id,
                &tracking_body(config.mode),
                None,
                prepared.trigger_comment_id,
            )
            .await
        }
        _ => None,
    };

    PreparedExecution {
        should_execute: true,
        mode: config.mode,
        context,
        prompt: prepared.prompt,
        allowed_tools: prepared.tools.allowed,
        blocked_tools: prepared.tools.blocked,
        request_kind: prepared.tools.request_kind,
        user_request: prepared.user_request,
        trigger_source: prepared.trigger_source,
        trigger_comment_id: prepared.trigger_comment_id,
        tracking_comment_id,
        inline: prepared.inline,
        parent_comment_id: prepared.parent_comment_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EventType;
    use crate::host::testing::FakeHost;
    use crate::testing::config_with;

    #[tokio::test]
    async fn posts_tracking_comment_under_trigger() {
        let mut cfg = config_with(&[]);
        cfg.pr_id = Some(9);
        let host = FakeHost::with_pr(9, "Add retries", "").comment(4, "@claude please add docs");

        let prepared = prepare(&cfg, &host, false).await;
        assert!(prepared.should_execute);
        assert_eq!(prepared.trigger_source, Some(TriggerSource::Comment));
        assert!(prepared.tracking_comment_id.is_some());

        let posted = host.posted();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].parent_id, Some(4));
        assert!(posted[0].body.contains("working on it"));

        let request = prepared.into_run_request();
        assert_eq!(request.pr_id, Some(9));
        assert_eq!(request.parent_comment_id, Some(4));
    }

    #[tokio::test]
    async fn later_updates_thread_under_tracking_comment_without_trigger() {
        let mut cfg = config_with(&[]);
        cfg.pr_id = Some(9);
        let host = FakeHost::with_pr(9, "Add retries", "");

        let prepared = prepare(&cfg, &host, false).await;
        let tracking = prepared.tracking_comment_id;
        assert!(tracking.is_some());
        assert_eq!(prepared.into_run_request().parent_comment_id, tracking);
    }

    #[tokio::test]
    async fn dry_run_posts_nothing() {
        let mut cfg = config_with(&[]);
        cfg.pr_id = Some(9);
        let host = FakeHost::with_pr(9, "Add retries", "@claude fix the typo in README");

        let prepared = prepare(&cfg, &host, true).await;
        assert_eq!(prepared.trigger_source, Some(TriggerSource::Description));
        assert_eq!(prepared.request_kind, Some(RequestKind::Actionable));
        assert!(prepared.tracking_comment_id.is_none());
        assert!(host.posted().is_empty());
    }

    #[tokio::test]
    async fn review_mode_skips_non_lifecycle_events() {
        let mut cfg = config_with(&[("MODE", "review")]);
        cfg.pr_id = Some(9);
        cfg.event_type = Some(EventType::Push);
        let host = FakeHost::with_pr(9, "Add retries", "");

        let prepared = prepare(&cfg, &host, false).await;
        assert!(!prepared.should_execute);
        assert!(prepared.prompt.is_empty());
        assert!(host.posted().is_empty());
    }
}
