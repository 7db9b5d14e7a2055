use super::{
    comments_or_empty, diff_or_empty, diff_section, find_in_comments, inline_section,
    pull_request_section, repository_header, ModeContext, ModeStrategy,
};
use crate::config::{Mode, PipeConfig};
use crate::context::TriggerContext;
use crate::host::HostApi;
use crate::tools::select_tools;
use async_trait::async_trait;

/// Most recent comments shown to the reviewer.
const RECENT_COMMENTS: usize = 10;

const REVIEW_INSTRUCTIONS: &str = "\
## Review checklist
Review the changes above and cover each area:

- **Code quality**: readability, naming, duplication, structure.
- **Functionality**: correctness, edge cases, error handling.
- **Performance**: needless allocation, blocking calls, algorithmic cost.
- **Security**: input validation, secrets, injection, unsafe operations.
- **Testing**: coverage of new behaviour, missing cases.
- **Documentation**: comments, READMEs and changelogs that need updating.

Tag every finding with a severity: 🔴 critical, 🟡 warning or 🔵 suggestion.
Reference files and line numbers, and end with an overall verdict.";

/// Automatic review on pull-request lifecycle events.
pub struct ReviewMode;

#[async_trait]
impl ModeStrategy for ReviewMode {
    fn mode(&self) -> Mode {
        Mode::Review
    }

    fn should_trigger(&self, _config: &PipeConfig, context: &TriggerContext) -> bool {
        context.event_type.is_pull_request_lifecycle() && context.pull_request.is_some()
    }

    async fn prepare_context(
        &self,
        config: &PipeConfig,
        context: &TriggerContext,
        host: &dyn HostApi,
    ) -> ModeContext {
        let mut out = ModeContext::default();
        let mut prompt = String::new();
        prompt.push_str("You are reviewing a Bitbucket pull request.\n\n");
        prompt.push_str(&repository_header(context));

        if let Some(pr) = &context.pull_request {
            let (diff, comments) = if host.is_authenticated() {
                (
                    diff_or_empty(host, pr.id).await,
                    comments_or_empty(host, pr.id).await,
                )
            } else {
                (String::new(), Vec::new())
            };

            prompt.push('\n');
            prompt.push_str(&pull_request_section(pr));
            prompt.push_str(&diff_section(&diff));

            let recent = &comments[comments.len().saturating_sub(RECENT_COMMENTS)..];
            if !recent.is_empty() {
                prompt.push_str("\n## Recent comments\n");
                for c in recent {
                    let location = c
                        .inline
                        .as_ref()
                        .map(|a| format!(" on `{a}`"))
                        .unwrap_or_default();
                    prompt.push_str(&format!("- {}{location}: {}\n", c.author, c.raw.trim()));
                }
            }

            if let Some(found) = find_in_comments(&comments, &config.trigger_phrase) {
                out.apply_trigger(&found);
            }
        }

        prompt.push('\n');
        prompt.push_str(REVIEW_INSTRUCTIONS);
        prompt.push('\n');
        if let Some(request) = &out.user_request {
            prompt.push_str(&format!("\n## Additional request\n{request}\n"));
        }
        if let Some(anchor) = &out.inline {
            prompt.push_str(&inline_section(anchor));
        }

        out.prompt = prompt;
        out.tools = select_tools(config, out.user_request.as_deref());
        out
    }
}
