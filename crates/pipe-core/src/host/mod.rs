//! Repository host access (Bitbucket Cloud).
//!
//! Everything above this module talks to [`HostApi`], never to HTTP directly,
//! so strategies and the comment updater can be exercised against a fake.

use crate::context::{
    CommitSnapshot, InlineAnchor, PrComment, PullRequestSnapshot, RepositorySnapshot,
};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod bitbucket;
#[cfg(test)]
pub(crate) mod testing;

pub use bitbucket::BitbucketClient;

/// Parameters for opening a pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPullRequest {
    pub title: String,
    pub description: String,
    pub source_branch: String,
    pub destination_branch: String,
}

/// Read and write operations the pipe needs from the repository host.
///
/// Read methods return `Ok(None)` / empty values when no credential is
/// configured; callers substitute locally derived data. Comment creation
/// never fails outward: it returns the new id or `None`.
#[async_trait]
pub trait HostApi: Send + Sync {
    /// A write credential is configured.
    fn is_authenticated(&self) -> bool;

    async fn get_pull_request(&self, id: u64) -> Result<Option<PullRequestSnapshot>>;

    /// Unified diff text; empty when unauthenticated.
    async fn get_pull_request_diff(&self, id: u64) -> Result<String>;

    /// All non-deleted comments, oldest first.
    async fn get_pull_request_comments(&self, id: u64) -> Result<Vec<PrComment>>;

    async fn create_pull_request_comment(
        &self,
        id: u64,
        body: &str,
        inline: Option<&InlineAnchor>,
        parent_id: Option<u64>,
    ) -> Option<u64>;

    async fn get_commit(&self, hash: &str) -> Result<Option<CommitSnapshot>>;

    async fn get_repository(&self) -> Result<Option<RepositorySnapshot>>;

    async fn create_branch(&self, name: &str, target_hash: &str) -> Result<()>;

    async fn create_pull_request(&self, request: &NewPullRequest) -> Result<Option<u64>>;
}
