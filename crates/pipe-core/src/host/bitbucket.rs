use super::{HostApi, NewPullRequest};
use crate::config::{HostAuth, HostSettings};
use crate::context::{
    CommitSnapshot, InlineAnchor, PrComment, PullRequestSnapshot, RepositorySnapshot,
};
use crate::error::{PipeError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

const REQUEST_TIMEOUT_SECS: u64 = 30;
const COMMENTS_PAGE_LEN: u32 = 100;
/// Upper bound on followed `next` links when listing comments.
const MAX_PAGES: usize = 20;
const MAX_ERROR_BODY_LEN: usize = 300;

// ---------------------------------------------------------------------------
// BitbucketClient
// ---------------------------------------------------------------------------

/// Bitbucket Cloud REST API 2.0 client.
pub struct BitbucketClient {
    http: reqwest::Client,
    settings: HostSettings,
}

impl BitbucketClient {
    pub fn new(settings: HostSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("claude-pipe/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { http, settings })
    }

    pub fn settings(&self) -> &HostSettings {
        &self.settings
    }

    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repositories/{}/{}{}",
            self.settings.api_base, self.settings.workspace, self.settings.repo_slug, path
        )
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.settings.auth {
            Some(HostAuth::Token(token)) => req.bearer_auth(token),
            Some(HostAuth::AppPassword { username, password }) => {
                req.basic_auth(username, Some(password))
            }
            None => req,
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let resp = self.authorize(req).send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(PipeError::Api {
            status: status.as_u16(),
            body: truncate(&body, MAX_ERROR_BODY_LEN),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let resp = self.send(self.http.get(url)).await?;
        Ok(resp.json::<T>().await?)
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let resp = self.send(self.http.post(url).json(body)).await?;
        Ok(resp.json::<T>().await?)
    }

    async fn post_comment(
        &self,
        id: u64,
        body: &str,
        inline: Option<&InlineAnchor>,
        parent_id: Option<u64>,
    ) -> Result<u64> {
        let url = self.repo_url(&format!("/pullrequests/{id}/comments"));
        let payload = comment_payload(body, inline, parent_id);
        let created: IdOnly = self.post_json(&url, &payload).await?;
        Ok(created.id)
    }
}

#[async_trait]
impl HostApi for BitbucketClient {
    fn is_authenticated(&self) -> bool {
        self.settings.auth.is_some()
    }

    async fn get_pull_request(&self, id: u64) -> Result<Option<PullRequestSnapshot>> {
        if !self.is_authenticated() {
            return Ok(None);
        }
        let raw: ApiPullRequest = self
            .get_json(&self.repo_url(&format!("/pullrequests/{id}")))
            .await?;
        Ok(Some(raw.into()))
    }

    async fn get_pull_request_diff(&self, id: u64) -> Result<String> {
        if !self.is_authenticated() {
            return Ok(String::new());
        }
        let url = self.repo_url(&format!("/pullrequests/{id}/diff"));
        let resp = self.send(self.http.get(&url)).await?;
        Ok(resp.text().await?)
    }

    async fn get_pull_request_comments(&self, id: u64) -> Result<Vec<PrComment>> {
        if !self.is_authenticated() {
            return Ok(Vec::new());
        }
        // Newest first, so truncation drops the oldest comments.
        let mut url = Some(self.repo_url(&format!(
            "/pullrequests/{id}/comments?pagelen={COMMENTS_PAGE_LEN}&sort=-id"
        )));
        let mut comments = Vec::new();
        let mut pages = 0;
        while let Some(next) = url.take() {
            let page: Page<ApiComment> = self.get_json(&next).await?;
            comments.extend(
                page.values
                    .into_iter()
                    .filter(|c| !c.deleted)
                    .map(PrComment::from),
            );
            pages += 1;
            if pages >= MAX_PAGES {
                tracing::warn!(pr_id = id, "comment listing truncated after {MAX_PAGES} pages");
                break;
            }
            url = page.next;
        }
        comments.sort_by_key(|c| c.id);
        Ok(comments)
    }

    async fn create_pull_request_comment(
        &self,
        id: u64,
        body: &str,
        inline: Option<&InlineAnchor>,
        parent_id: Option<u64>,
    ) -> Option<u64> {
        if !self.is_authenticated() {
            tracing::warn!(pr_id = id, "no Bitbucket credential; comment not posted");
            return None;
        }
        match self.post_comment(id, body, inline, parent_id).await {
            Ok(comment_id) => {
                tracing::debug!(pr_id = id, comment_id, "posted comment");
                Some(comment_id)
            }
            Err(e) => {
                tracing::warn!(pr_id = id, error = %e, "failed to post comment");
                None
            }
        }
    }

    async fn get_commit(&self, hash: &str) -> Result<Option<CommitSnapshot>> {
        if !self.is_authenticated() {
            return Ok(None);
        }
        let raw: ApiCommit = self
            .get_json(&self.repo_url(&format!("/commit/{hash}")))
            .await?;
        Ok(Some(raw.into()))
    }

    async fn get_repository(&self) -> Result<Option<RepositorySnapshot>> {
        if !self.is_authenticated() {
            return Ok(None);
        }
        let raw: ApiRepository = self.get_json(&self.repo_url("")).await?;
        Ok(Some(raw.into()))
    }

    async fn create_branch(&self, name: &str, target_hash: &str) -> Result<()> {
        if !self.is_authenticated() {
            return Err(PipeError::Api {
                status: 401,
                body: "no Bitbucket credential configured".into(),
            });
        }
        let payload = serde_json::json!({
            "name": name,
            "target": { "hash": target_hash },
        });
        let _: serde_json::Value = self
            .post_json(&self.repo_url("/refs/branches"), &payload)
            .await?;
        Ok(())
    }

    async fn create_pull_request(&self, request: &NewPullRequest) -> Result<Option<u64>> {
        if !self.is_authenticated() {
            return Ok(None);
        }
        let payload = serde_json::json!({
            "title": request.title,
            "description": request.description,
            "source": { "branch": { "name": request.source_branch } },
            "destination": { "branch": { "name": request.destination_branch } },
            "close_source_branch": true,
        });
        let created: IdOnly = self
            .post_json(&self.repo_url("/pullrequests"), &payload)
            .await?;
        Ok(Some(created.id))
    }
}

fn comment_payload(
    body: &str,
    inline: Option<&InlineAnchor>,
    parent_id: Option<u64>,
) -> serde_json::Value {
    let mut payload = serde_json::json!({ "content": { "raw": body } });
    if let Some(anchor) = inline {
        let mut inline = serde_json::json!({ "path": anchor.path });
        if let Some(from) = anchor.from_line {
            inline["from"] = from.into();
        }
        if let Some(to) = anchor.to_line {
            inline["to"] = to.into();
        }
        payload["inline"] = inline;
    }
    if let Some(parent) = parent_id {
        payload["parent"] = serde_json::json!({ "id": parent });
    }
    payload
}

fn truncate(body: &str, max: usize) -> String {
    if body.len() <= max {
        return body.to_string();
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated)", &body[..end])
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    values: Vec<T>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Deserialize)]
struct IdOnly {
    id: u64,
}

#[derive(Deserialize, Default)]
struct ApiUser {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    nickname: Option<String>,
}

impl ApiUser {
    fn name(self) -> String {
        self.display_name
            .or(self.nickname)
            .unwrap_or_else(|| "unknown".to_string())
    }
}

#[derive(Deserialize, Default)]
struct ApiBranchRef {
    #[serde(default)]
    branch: Option<ApiName>,
}

#[derive(Deserialize)]
struct ApiName {
    name: String,
}

#[derive(Deserialize)]
struct ApiPullRequest {
    id: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    state: String,
    #[serde(default)]
    author: ApiUser,
    #[serde(default)]
    source: ApiBranchRef,
    #[serde(default)]
    destination: ApiBranchRef,
    #[serde(default)]
    created_on: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_on: Option<DateTime<Utc>>,
}

impl From<ApiPullRequest> for PullRequestSnapshot {
    fn from(pr: ApiPullRequest) -> Self {
        Self {
            id: pr.id,
            title: pr.title,
            description: pr.description.unwrap_or_default(),
            source_branch: pr.source.branch.map(|b| b.name).unwrap_or_default(),
            destination_branch: pr.destination.branch.map(|b| b.name).unwrap_or_default(),
            author: pr.author.name(),
            state: pr.state,
            created_on: pr.created_on,
            updated_on: pr.updated_on,
        }
    }
}

#[derive(Deserialize)]
struct ApiContent {
    #[serde(default)]
    raw: String,
}

#[derive(Deserialize)]
struct ApiInline {
    path: String,
    #[serde(default)]
    from: Option<u32>,
    #[serde(default)]
    to: Option<u32>,
}

#[derive(Deserialize)]
struct ApiParent {
    id: u64,
}

#[derive(Deserialize)]
struct ApiComment {
    id: u64,
    content: ApiContent,
    #[serde(default)]
    user: ApiUser,
    #[serde(default)]
    inline: Option<ApiInline>,
    #[serde(default)]
    parent: Option<ApiParent>,
    #[serde(default)]
    deleted: bool,
}

impl From<ApiComment> for PrComment {
    fn from(c: ApiComment) -> Self {
        Self {
            id: c.id,
            author: c.user.name(),
            raw: c.content.raw,
            inline: c.inline.map(|i| InlineAnchor {
                path: i.path,
                from_line: i.from,
                to_line: i.to,
            }),
            parent_id: c.parent.map(|p| p.id),
        }
    }
}

#[derive(Deserialize, Default)]
struct ApiCommitAuthor {
    #[serde(default)]
    raw: Option<String>,
    #[serde(default)]
    user: Option<ApiUser>,
}

#[derive(Deserialize)]
struct ApiCommit {
    hash: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    author: ApiCommitAuthor,
    #[serde(default)]
    date: Option<DateTime<Utc>>,
}

impl From<ApiCommit> for CommitSnapshot {
    fn from(c: ApiCommit) -> Self {
        let author = match (c.author.user, c.author.raw) {
            (Some(user), _) => user.name(),
            (None, Some(raw)) => raw,
            (None, None) => "unknown".to_string(),
        };
        Self {
            hash: c.hash,
            message: c.message,
            author,
            date: c.date,
        }
    }
}

#[derive(Deserialize)]
struct ApiRepository {
    name: String,
    full_name: String,
    #[serde(default)]
    mainbranch: Option<ApiName>,
}

impl From<ApiRepository> for RepositorySnapshot {
    fn from(r: ApiRepository) -> Self {
        Self {
            name: r.name,
            full_name: r.full_name,
            default_branch: r
                .mainbranch
                .map(|b| b.name)
                .unwrap_or_else(|| "main".to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client(server: &mockito::Server, auth: Option<HostAuth>) -> BitbucketClient {
        BitbucketClient::new(HostSettings {
            workspace: "acme".into(),
            repo_slug: "widgets".into(),
            auth,
            api_base: server.url(),
        })
        .unwrap()
    }

    fn token() -> Option<HostAuth> {
        Some(HostAuth::Token("tok".into()))
    }

    #[tokio::test]
    async fn fetches_pull_request_with_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/repositories/acme/widgets/pullrequests/7")
            .match_header("authorization", "Bearer tok")
            .with_status(200)
            .with_body(
                r#"{"id":7,"title":"Add retries","description":"@claude review","state":"OPEN",
                   "author":{"display_name":"Alice"},
                   "source":{"branch":{"name":"feature/retries"}},
                   "destination":{"branch":{"name":"main"}},
                   "created_on":"2024-05-01T10:00:00.000000+00:00"}"#,
            )
            .create_async()
            .await;

        let pr = client(&server, token())
            .get_pull_request(7)
            .await
            .unwrap()
            .unwrap();
        mock.assert_async().await;
        assert_eq!(pr.title, "Add retries");
        assert_eq!(pr.author, "Alice");
        assert_eq!(pr.source_branch, "feature/retries");
        assert_eq!(pr.destination_branch, "main");
        assert!(pr.created_on.is_some());
    }

    #[tokio::test]
    async fn unauthenticated_reads_skip_the_network() {
        let server = mockito::Server::new_async().await;
        let c = client(&server, None);
        assert!(!c.is_authenticated());
        assert!(c.get_pull_request(7).await.unwrap().is_none());
        assert_eq!(c.get_pull_request_diff(7).await.unwrap(), "");
        assert!(c.get_pull_request_comments(7).await.unwrap().is_empty());
        assert!(c.create_pull_request_comment(7, "hi", None, None).await.is_none());
    }

    #[tokio::test]
    async fn comments_follow_pagination_and_skip_deleted() {
        let mut server = mockito::Server::new_async().await;
        let page2 = format!("{}/page2", server.url());
        let first = server
            .mock("GET", "/repositories/acme/widgets/pullrequests/3/comments")
            .match_query(Matcher::UrlEncoded("pagelen".into(), "100".into()))
            .with_body(format!(
                r#"{{"values":[
                    {{"id":1,"content":{{"raw":"first"}},"user":{{"display_name":"Bob"}}}},
                    {{"id":2,"content":{{"raw":"gone"}},"deleted":true}}
                  ],"next":"{page2}"}}"#
            ))
            .create_async()
            .await;
        let second = server
            .mock("GET", "/page2")
            .with_body(
                r#"{"values":[{"id":5,"content":{"raw":"@claude fix"},"user":{"nickname":"carol"},
                    "inline":{"path":"src/lib.rs","from":null,"to":42},"parent":{"id":1}}]}"#,
            )
            .create_async()
            .await;

        let comments = client(&server, token())
            .get_pull_request_comments(3)
            .await
            .unwrap();
        first.assert_async().await;
        second.assert_async().await;

        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].author, "Bob");
        let inline = comments[1].inline.as_ref().unwrap();
        assert_eq!(inline.path, "src/lib.rs");
        assert_eq!(inline.from_line, None);
        assert_eq!(inline.to_line, Some(42));
        assert_eq!(comments[1].parent_id, Some(1));
    }

    #[tokio::test]
    async fn truncated_comment_listing_keeps_newest() {
        let mut server = mockito::Server::new_async().await;
        let older = format!("{}/older", server.url());
        let newest = server
            .mock("GET", "/repositories/acme/widgets/pullrequests/3/comments")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("pagelen".into(), "100".into()),
                Matcher::UrlEncoded("sort".into(), "-id".into()),
            ]))
            .with_body(format!(
                r#"{{"values":[
                    {{"id":300,"content":{{"raw":"@claude latest request"}}}},
                    {{"id":299,"content":{{"raw":"noted"}}}}
                  ],"next":"{older}"}}"#
            ))
            .create_async()
            .await;
        let pages = server
            .mock("GET", "/older")
            .with_body(format!(
                r#"{{"values":[{{"id":10,"content":{{"raw":"@claude old request"}}}}],"next":"{older}"}}"#
            ))
            .expect(MAX_PAGES - 1)
            .create_async()
            .await;

        let comments = client(&server, token())
            .get_pull_request_comments(3)
            .await
            .unwrap();
        newest.assert_async().await;
        pages.assert_async().await;

        assert_eq!(comments.first().unwrap().id, 10);
        assert_eq!(comments.last().unwrap().id, 300);
        assert!(comments.windows(2).all(|w| w[0].id <= w[1].id));
    }

    #[tokio::test]
    async fn create_comment_sends_inline_and_parent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/repositories/acme/widgets/pullrequests/3/comments")
            .match_body(Matcher::Json(serde_json::json!({
                "content": {"raw": "done"},
                "inline": {"path": "src/lib.rs", "from": 10, "to": 12},
                "parent": {"id": 5}
            })))
            .with_status(201)
            .with_body(r#"{"id":99}"#)
            .create_async()
            .await;

        let anchor = InlineAnchor {
            path: "src/lib.rs".into(),
            from_line: Some(10),
            to_line: Some(12),
        };
        let id = client(&server, token())
            .create_pull_request_comment(3, "done", Some(&anchor), Some(5))
            .await;
        mock.assert_async().await;
        assert_eq!(id, Some(99));
    }

    #[tokio::test]
    async fn create_comment_failure_returns_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/repositories/acme/widgets/pullrequests/3/comments")
            .with_status(429)
            .with_body("rate limited")
            .create_async()
            .await;
        let id = client(&server, token())
            .create_pull_request_comment(3, "x", None, None)
            .await;
        assert!(id.is_none());
    }

    #[tokio::test]
    async fn api_errors_carry_status_and_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repositories/acme/widgets/pullrequests/4/diff")
            .with_status(404)
            .with_body("not found")
            .create_async()
            .await;
        let err = client(&server, token())
            .get_pull_request_diff(4)
            .await
            .unwrap_err();
        match err {
            PipeError::Api { status, body } => {
                assert_eq!(status, 404);
                assert_eq!(body, "not found");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn app_password_uses_basic_auth_for_repository() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/repositories/acme/widgets")
            .match_header("authorization", Matcher::Regex("^Basic ".into()))
            .with_body(r#"{"name":"widgets","full_name":"acme/widgets","mainbranch":{"name":"develop"}}"#)
            .create_async()
            .await;
        let repo = client(
            &server,
            Some(HostAuth::AppPassword {
                username: "bot".into(),
                password: "pw".into(),
            }),
        )
        .get_repository()
        .await
        .unwrap()
        .unwrap();
        mock.assert_async().await;
        assert_eq!(repo.default_branch, "develop");
    }

    #[tokio::test]
    async fn creates_branch_and_pull_request() {
        let mut server = mockito::Server::new_async().await;
        let branch = server
            .mock("POST", "/repositories/acme/widgets/refs/branches")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "name": "claude/fix-1",
                "target": {"hash": "abc"}
            })))
            .with_status(201)
            .with_body(r#"{"name":"claude/fix-1"}"#)
            .create_async()
            .await;
        let pr = server
            .mock("POST", "/repositories/acme/widgets/pullrequests")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "source": {"branch": {"name": "claude/fix-1"}}
            })))
            .with_status(201)
            .with_body(r#"{"id":12}"#)
            .create_async()
            .await;

        let c = client(&server, token());
        c.create_branch("claude/fix-1", "abc").await.unwrap();
        let id = c
            .create_pull_request(&NewPullRequest {
                title: "Fix".into(),
                description: "by claude".into(),
                source_branch: "claude/fix-1".into(),
                destination_branch: "main".into(),
            })
            .await
            .unwrap();
        branch.assert_async().await;
        pr.assert_async().await;
        assert_eq!(id, Some(12));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "é".repeat(10);
        let t = truncate(&s, 5);
        assert!(t.ends_with("(truncated)"));
        assert_eq!(truncate("short", 10), "short");
    }
}
