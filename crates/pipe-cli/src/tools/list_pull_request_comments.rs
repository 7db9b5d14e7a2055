use super::{pr_id_schema, required_u64, PipeTool};
use async_trait::async_trait;
use pipe_core::host::HostApi;
use serde_json::Value;

pub struct ListPullRequestCommentsTool;

#[async_trait]
impl PipeTool for ListPullRequestCommentsTool {
    fn name(&self) -> &str {
        "bitbucket_list_pull_request_comments"
    }

    fn description(&self) -> &str {
        "List the comments on a pull request, oldest first, including inline anchors and reply parents"
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "pr_id": pr_id_schema() },
            "required": ["pr_id"]
        })
    }

    async fn call(&self, args: Value, host: &dyn HostApi) -> Result<Value, String> {
        let id = required_u64(&args, "pr_id")?;
        let comments = host
            .get_pull_request_comments(id)
            .await
            .map_err(|e| e.to_string())?;
        Ok(serde_json::json!({
            "pr_id": id,
            "count": comments.len(),
            "comments": comments,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::client;

    #[tokio::test]
    async fn lists_comments_with_inline_anchor() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repositories/acme/widgets/pullrequests/8/comments")
            .match_query(mockito::Matcher::Any)
            .with_body(
                r#"{"values":[
                    {"id":1,"content":{"raw":"looks good"},"user":{"display_name":"Eve"}},
                    {"id":2,"content":{"raw":"@claude why?"},"user":{"display_name":"Eve"},
                     "inline":{"path":"src/lib.rs","to":12},"parent":{"id":1}}
                ]}"#,
            )
            .create_async()
            .await;

        let out = ListPullRequestCommentsTool
            .call(serde_json::json!({"pr_id": 8}), &client(&server))
            .await
            .unwrap();
        assert_eq!(out["count"], 2);
        assert_eq!(out["comments"][1]["inline"]["path"], "src/lib.rs");
        assert_eq!(out["comments"][1]["parent_id"], 1);
    }
}
