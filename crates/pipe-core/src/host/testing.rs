//! In-memory [`HostApi`] for unit tests.

use super::{HostApi, NewPullRequest};
use crate::context::{
    CommitSnapshot, InlineAnchor, PrComment, PullRequestSnapshot, RepositorySnapshot,
};
use crate::error::{PipeError, Result};
use async_trait::async_trait;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub struct PostedComment {
    pub pr_id: u64,
    pub body: String,
    pub inline: Option<InlineAnchor>,
    pub parent_id: Option<u64>,
}

pub struct FakeHost {
    pub authenticated: bool,
    pub fail_reads: bool,
    pub fail_writes: bool,
    pub pull_request: Option<PullRequestSnapshot>,
    pub diff: String,
    pub comments: Vec<PrComment>,
    pub posted: Mutex<Vec<PostedComment>>,
    next_id: Mutex<u64>,
}

impl Default for FakeHost {
    fn default() -> Self {
        Self {
            authenticated: true,
            fail_reads: false,
            fail_writes: false,
            pull_request: None,
            diff: String::new(),
            comments: Vec::new(),
            posted: Mutex::new(Vec::new()),
            next_id: Mutex::new(1000),
        }
    }
}

impl FakeHost {
    pub fn failing() -> Self {
        Self {
            fail_reads: true,
            fail_writes: true,
            ..Self::default()
        }
    }

    pub fn unauthenticated() -> Self {
        Self {
            authenticated: false,
            ..Self::default()
        }
    }

    pub fn with_pr(id: u64, title: &str, description: &str) -> Self {
        Self {
            pull_request: Some(PullRequestSnapshot {
                id,
                title: title.to_string(),
                description: description.to_string(),
                source_branch: "feature/work".to_string(),
                destination_branch: "main".to_string(),
                author: "alice".to_string(),
                state: "OPEN".to_string(),
                created_on: None,
                updated_on: None,
            }),
            ..Self::default()
        }
    }

    pub fn comment(mut self, id: u64, raw: &str) -> Self {
        self.comments.push(PrComment {
            id,
            author: "bob".to_string(),
            raw: raw.to_string(),
            inline: None,
            parent_id: None,
        });
        self
    }

    pub fn inline_comment(mut self, id: u64, raw: &str, anchor: InlineAnchor) -> Self {
        self.comments.push(PrComment {
            id,
            author: "bob".to_string(),
            raw: raw.to_string(),
            inline: Some(anchor),
            parent_id: None,
        });
        self
    }

    pub fn posted(&self) -> Vec<PostedComment> {
        self.posted.lock().map(|p| p.clone()).unwrap_or_default()
    }

    fn read_error() -> PipeError {
        PipeError::Api {
            status: 500,
            body: "fake host failure".into(),
        }
    }
}

#[async_trait]
impl HostApi for FakeHost {
    fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    async fn get_pull_request(&self, id: u64) -> Result<Option<PullRequestSnapshot>> {
        if self.fail_reads {
            return Err(Self::read_error());
        }
        if !self.authenticated {
            return Ok(None);
        }
        Ok(self.pull_request.clone().filter(|pr| pr.id == id))
    }

    async fn get_pull_request_diff(&self, _id: u64) -> Result<String> {
        if self.fail_reads {
            return Err(Self::read_error());
        }
        Ok(self.diff.clone())
    }

    async fn get_pull_request_comments(&self, _id: u64) -> Result<Vec<PrComment>> {
        if self.fail_reads {
            return Err(Self::read_error());
        }
        Ok(self.comments.clone())
    }

    async fn create_pull_request_comment(
        &self,
        id: u64,
        body: &str,
        inline: Option<&InlineAnchor>,
        parent_id: Option<u64>,
    ) -> Option<u64> {
        if self.fail_writes || !self.authenticated {
            return None;
        }
        let mut next = self.next_id.lock().ok()?;
        *next += 1;
        self.posted.lock().ok()?.push(PostedComment {
            pr_id: id,
            body: body.to_string(),
            inline: inline.cloned(),
            parent_id,
        });
        Some(*next)
    }

    async fn get_commit(&self, _hash: &str) -> Result<Option<CommitSnapshot>> {
        if self.fail_reads {
            return Err(Self::read_error());
        }
        Ok(None)
    }

    async fn get_repository(&self) -> Result<Option<RepositorySnapshot>> {
        if self.fail_reads {
            return Err(Self::read_error());
        }
        Ok(None)
    }

    async fn create_branch(&self, _name: &str, _target_hash: &str) -> Result<()> {
        if self.fail_writes {
            return Err(Self::read_error());
        }
        Ok(())
    }

    async fn create_pull_request(&self, _request: &NewPullRequest) -> Result<Option<u64>> {
        if self.fail_writes {
            return Err(Self::read_error());
        }
        Ok(Some(1))
    }
}
