use crate::config::Mode;
use crate::context::InlineAnchor;
use crate::host::HostApi;
use crate::runner::RunStatus;
use chrono::Utc;
use std::time::Duration;
use tokio::time::Instant;

/// Minimum spacing between accepted partial updates.
pub const THROTTLE_WINDOW: Duration = Duration::from_millis(1000);

// ---------------------------------------------------------------------------
// ThrottleState
// ---------------------------------------------------------------------------

/// Last accepted update for one invocation.
#[derive(Debug, Default)]
pub struct ThrottleState {
    last_accepted: Option<Instant>,
}

impl ThrottleState {
    /// Accept a partial update if the window has passed.
    fn admit_partial(&mut self, now: Instant) -> bool {
        match self.last_accepted {
            Some(last) if now.duration_since(last) < THROTTLE_WINDOW => false,
            _ => {
                self.last_accepted = Some(now);
                true
            }
        }
    }

    fn record(&mut self, now: Instant) {
        self.last_accepted = Some(now);
    }
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

const FOOTER_BRAND: &str = "Claude for Bitbucket Pipelines";

pub fn tracking_body(mode: Mode) -> String {
    format!(
        "🤖 **Claude is working on it…**\n\nRunning in `{mode}` mode. \
         This thread will be updated with the result.\n\n---\n_{FOOTER_BRAND}_"
    )
}

pub fn format_partial(content: &str) -> String {
    format!(
        "🔄 **Claude is working…**\n\n{}\n\n---\n_In progress · updated {} UTC_",
        content.trim(),
        Utc::now().format("%H:%M:%S")
    )
}

pub fn format_final(content: &str, status: RunStatus, error: Option<&str>) -> String {
    let banner = match status {
        RunStatus::Success => "✅ **Claude completed the task**",
        RunStatus::Error => "❌ **Claude failed**",
        RunStatus::Timeout => "⏱️ **Claude timed out**",
    };
    let mut body = format!("{banner}\n\n");
    let content = content.trim();
    if content.is_empty() {
        body.push_str("_No response text was produced._\n");
    } else {
        body.push_str(content);
        body.push('\n');
    }
    if let Some(error) = error.filter(|e| !e.trim().is_empty()) {
        body.push_str(&format!("\n**Error**\n```\n{}\n```\n", error.trim()));
    }
    body.push_str(&format!("\n---\n_{FOOTER_BRAND} · status: {status}_"));
    body
}

// ---------------------------------------------------------------------------
// CommentUpdater
// ---------------------------------------------------------------------------

/// Where updates land.
#[derive(Debug, Clone, Default)]
pub struct CommentTarget {
    pub pr_id: Option<u64>,
    pub inline: Option<InlineAnchor>,
    pub parent_comment_id: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Posted(u64),
    /// Partial suppressed by the throttle window.
    Throttled,
    /// Partial with nowhere to go.
    Dropped,
    /// Final written to stdout for lack of a remote target.
    PrintedLocally,
    /// Remote write failed; already logged.
    Failed,
}

/// Pushes partial and final output to the pull request.
///
/// Failures never escape: every call resolves to an [`UpdateOutcome`].
pub struct CommentUpdater<'a> {
    host: &'a dyn HostApi,
    target: CommentTarget,
    throttle: ThrottleState,
}

impl<'a> CommentUpdater<'a> {
    pub fn new(host: &'a dyn HostApi, target: CommentTarget) -> Self {
        Self {
            host,
            target,
            throttle: ThrottleState::default(),
        }
    }

    pub fn target(&self) -> &CommentTarget {
        &self.target
    }

    fn remote_pr(&self) -> Option<u64> {
        self.target.pr_id.filter(|_| self.host.is_authenticated())
    }

    pub async fn partial(&mut self, content: &str) -> UpdateOutcome {
        let Some(pr_id) = self.remote_pr() else {
            return UpdateOutcome::Dropped;
        };
        if !self.throttle.admit_partial(Instant::now()) {
            tracing::trace!(pr_id, "partial update throttled");
            return UpdateOutcome::Throttled;
        }
        self.post(pr_id, &format_partial(content)).await
    }

    pub async fn finish(
        &mut self,
        content: &str,
        status: RunStatus,
        error: Option<&str>,
    ) -> UpdateOutcome {
        let body = format_final(content, status, error);
        self.throttle.record(Instant::now());
        match self.remote_pr() {
            Some(pr_id) => self.post(pr_id, &body).await,
            None => {
                println!("{body}");
                UpdateOutcome::PrintedLocally
            }
        }
    }

    async fn post(&self, pr_id: u64, body: &str) -> UpdateOutcome {
        let posted = self
            .host
            .create_pull_request_comment(
                pr_id,
                body,
                self.target.inline.as_ref(),
                self.target.parent_comment_id,
            )
            .await;
        match posted {
            Some(id) => UpdateOutcome::Posted(id),
            None => UpdateOutcome::Failed,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
