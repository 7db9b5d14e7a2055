use super::{pull_request_section, repository_header, ModeContext, ModeStrategy};
use crate::config::{Mode, PipeConfig};
use crate::context::TriggerContext;
use crate::host::HostApi;
use crate::tools::agent_tools;
use async_trait::async_trait;

const ANALYSIS_TEMPLATE: &str = "\
Perform a comprehensive analysis of this repository:

1. Summarize the architecture and the purpose of the main modules.
2. Identify bugs, unsafe patterns and error-handling gaps.
3. Point out performance problems and obvious inefficiencies.
4. Flag security concerns such as leaked secrets or unchecked input.
5. Note missing or weak tests and documentation.

Report findings ordered by importance, each with file paths and a concrete suggestion.";

/// Scheduled or manual runs without a human-authored trigger.
pub struct AgentMode;

#[async_trait]
impl ModeStrategy for AgentMode {
    fn mode(&self) -> Mode {
        Mode::Agent
    }

    fn should_trigger(&self, config: &PipeConfig, _context: &TriggerContext) -> bool {
        config.mode == Mode::Agent
    }

    async fn prepare_context(
        &self,
        config: &PipeConfig,
        context: &TriggerContext,
        _host: &dyn HostApi,
    ) -> ModeContext {
        let task = config.task_prompt.as_deref().unwrap_or(ANALYSIS_TEMPLATE);

        let mut prompt = String::new();
        prompt.push_str("You are running as an automated agent in a Bitbucket pipeline.\n\n");
        prompt.push_str(&repository_header(context));
        if let Some(branch) = &config.branch {
            prompt.push_str(&format!("Branch: {branch}\n"));
        }
        if let Some(pr) = &context.pull_request {
            prompt.push('\n');
            prompt.push_str(&pull_request_section(pr));
        }
        prompt.push_str("\n## Task\n");
        prompt.push_str(task.trim());
        prompt.push('\n');

        ModeContext {
            prompt,
            tools: agent_tools(config),
            user_request: config.task_prompt.clone(),
            ..ModeContext::default()
        }
    }
}
