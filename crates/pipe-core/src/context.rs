use crate::config::{invalid, PipeConfig};
use crate::error::{PipeError, Result};
use crate::host::HostApi;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// EventType
// ---------------------------------------------------------------------------

/// The CI event the pipe is responding to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "pullrequest:created")]
    PullRequestCreated,
    #[serde(rename = "pullrequest:updated")]
    PullRequestUpdated,
    #[serde(rename = "pullrequest:approved")]
    PullRequestApproved,
    #[serde(rename = "pullrequest:unapproved")]
    PullRequestUnapproved,
    #[serde(rename = "pullrequest:comment_created")]
    PullRequestComment,
    #[serde(rename = "push")]
    Push,
    #[serde(rename = "manual")]
    Manual,
    #[serde(rename = "schedule")]
    Schedule,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PullRequestCreated => "pullrequest:created",
            EventType::PullRequestUpdated => "pullrequest:updated",
            EventType::PullRequestApproved => "pullrequest:approved",
            EventType::PullRequestUnapproved => "pullrequest:unapproved",
            EventType::PullRequestComment => "pullrequest:comment_created",
            EventType::Push => "push",
            EventType::Manual => "manual",
            EventType::Schedule => "schedule",
        }
    }

    /// Pull-request lifecycle events; review mode reacts only to these.
    pub fn is_pull_request_lifecycle(&self) -> bool {
        matches!(
            self,
            EventType::PullRequestCreated
                | EventType::PullRequestUpdated
                | EventType::PullRequestApproved
                | EventType::PullRequestUnapproved
        )
    }

    /// Explicit `EVENT_TYPE` wins; otherwise infer from what the CI exposed.
    pub fn detect(config: &PipeConfig) -> Self {
        if let Some(explicit) = config.event_type {
            return explicit;
        }
        if config.pr_id.is_some() {
            EventType::PullRequestUpdated
        } else if config.commit.is_some() {
            EventType::Push
        } else {
            EventType::Manual
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = PipeError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase();
        let event = match normalized.as_str() {
            "pullrequest:created" | "pr_created" => EventType::PullRequestCreated,
            "pullrequest:updated" | "pr_updated" => EventType::PullRequestUpdated,
            "pullrequest:approved" | "pr_approved" => EventType::PullRequestApproved,
            "pullrequest:unapproved" | "pr_unapproved" => EventType::PullRequestUnapproved,
            "pullrequest:comment_created" | "pr_comment" => EventType::PullRequestComment,
            "push" | "repo:push" => EventType::Push,
            "manual" => EventType::Manual,
            "schedule" | "scheduled" => EventType::Schedule,
            other => {
                return Err(invalid(
                    "EVENT_TYPE",
                    other,
                    "expected a pullrequest:* event, push, manual or schedule",
                ))
            }
        };
        Ok(event)
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequestSnapshot {
    pub id: u64,
    pub title: String,
    pub description: String,
    pub source_branch: String,
    pub destination_branch: String,
    pub author: String,
    pub state: String,
    pub created_on: Option<DateTime<Utc>>,
    pub updated_on: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitSnapshot {
    pub hash: String,
    pub message: String,
    pub author: String,
    pub date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositorySnapshot {
    pub name: String,
    pub full_name: String,
    pub default_branch: String,
}

/// A line-anchored comment position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineAnchor {
    pub path: String,
    pub from_line: Option<u32>,
    pub to_line: Option<u32>,
}

impl fmt::Display for InlineAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.from_line, self.to_line) {
            (Some(from), Some(to)) if from != to => write!(f, "{}:{from}-{to}", self.path),
            (Some(line), _) | (None, Some(line)) => write!(f, "{}:{line}", self.path),
            (None, None) => f.write_str(&self.path),
        }
    }
}

/// One pull-request comment as the Host API returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrComment {
    pub id: u64,
    pub author: String,
    pub raw: String,
    pub inline: Option<InlineAnchor>,
    pub parent_id: Option<u64>,
}

// ---------------------------------------------------------------------------
// Local fallbacks
// ---------------------------------------------------------------------------

/// Pull-request snapshot from CI-provided variables only.
pub fn fallback_pull_request(config: &PipeConfig, id: u64) -> PullRequestSnapshot {
    PullRequestSnapshot {
        id,
        title: format!("Pull Request #{id}"),
        description: String::new(),
        source_branch: config.branch.clone().unwrap_or_default(),
        destination_branch: config
            .destination_branch
            .clone()
            .unwrap_or_else(|| "main".to_string()),
        author: config.actor.clone().unwrap_or_else(|| "unknown".to_string()),
        state: "OPEN".to_string(),
        created_on: None,
        updated_on: None,
    }
}

pub fn fallback_commit(config: &PipeConfig, hash: &str) -> CommitSnapshot {
    CommitSnapshot {
        hash: hash.to_string(),
        message: String::new(),
        author: config.actor.clone().unwrap_or_else(|| "unknown".to_string()),
        date: None,
    }
}

pub fn fallback_repository(config: &PipeConfig) -> RepositorySnapshot {
    RepositorySnapshot {
        name: config.host.repo_slug.clone(),
        full_name: config.host.full_name(),
        default_branch: "main".to_string(),
    }
}

/// Host data when available, the local snapshot otherwise.
pub async fn pull_request_or_fallback(
    config: &PipeConfig,
    host: &dyn HostApi,
    id: u64,
) -> PullRequestSnapshot {
    match host.get_pull_request(id).await {
        Ok(Some(pr)) => pr,
        Ok(None) => fallback_pull_request(config, id),
        Err(e) => {
            tracing::warn!(pr_id = id, error = %e, "could not fetch pull request; using local context");
            fallback_pull_request(config, id)
        }
    }
}

pub async fn commit_or_fallback(
    config: &PipeConfig,
    host: &dyn HostApi,
    hash: &str,
) -> CommitSnapshot {
    match host.get_commit(hash).await {
        Ok(Some(c)) => c,
        Ok(None) => fallback_commit(config, hash),
        Err(e) => {
            tracing::warn!(commit = hash, error = %e, "could not fetch commit; using local context");
            fallback_commit(config, hash)
        }
    }
}

pub async fn repository_or_fallback(config: &PipeConfig, host: &dyn HostApi) -> RepositorySnapshot {
    match host.get_repository().await {
        Ok(Some(r)) => r,
        Ok(None) => fallback_repository(config),
        Err(e) => {
            tracing::warn!(error = %e, "could not fetch repository; using local context");
            fallback_repository(config)
        }
    }
}

// ---------------------------------------------------------------------------
// TriggerContext
// ---------------------------------------------------------------------------

/// What the pipe is responding to. Built once per invocation, read-only after.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerContext {
    pub event_type: EventType,
    pub actor: String,
    pub pull_request: Option<PullRequestSnapshot>,
    pub commit: Option<CommitSnapshot>,
    pub repository: RepositorySnapshot,
}

impl TriggerContext {
    /// Merge Host API data with CI-provided variables. Read failures are
    /// logged and replaced by the local fallback; this never fails.
    pub async fn build(config: &PipeConfig, host: &dyn HostApi) -> Self {
        let pull_request = match config.pr_id {
            Some(id) => Some(pull_request_or_fallback(config, host, id).await),
            None => None,
        };
        let commit = match config.commit.as_deref() {
            Some(hash) => Some(commit_or_fallback(config, host, hash).await),
            None => None,
        };
        let repository = repository_or_fallback(config, host).await;

        let actor = config
            .actor
            .clone()
            .or_else(|| pull_request.as_ref().map(|pr| pr.author.clone()))
            .or_else(|| commit.as_ref().map(|c| c.author.clone()))
            .unwrap_or_else(|| "unknown".to_string());

        Self {
            event_type: EventType::detect(config),
            actor,
            pull_request,
            commit,
            repository,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
