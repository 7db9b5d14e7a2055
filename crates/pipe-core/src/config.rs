use crate::context::EventType;
use crate::error::{PipeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_TRIGGER_PHRASE: &str = "@claude";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_MAX_TURNS: u32 = 30;
pub const DEFAULT_TIMEOUT_MINUTES: u32 = 30;
pub const DEFAULT_API_BASE: &str = "https://api.bitbucket.org/2.0";

// ---------------------------------------------------------------------------
// Mode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Tag,
    Agent,
    Review,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Tag => "tag",
            Mode::Agent => "agent",
            Mode::Review => "review",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = PipeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tag" => Ok(Mode::Tag),
            "agent" => Ok(Mode::Agent),
            "review" => Ok(Mode::Review),
            other => Err(invalid("MODE", other, "expected tag, agent or review")),
        }
    }
}

// ---------------------------------------------------------------------------
// CommentUpdateStrategy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentUpdateStrategy {
    /// Only partial updates while running; no final comment.
    Stream,
    /// Only the final comment.
    Final,
    /// Partial updates and the final comment.
    Both,
}

impl FromStr for CommentUpdateStrategy {
    type Err = PipeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stream" => Ok(Self::Stream),
            "final" => Ok(Self::Final),
            "both" => Ok(Self::Both),
            other => Err(invalid(
                "COMMENT_UPDATE_STRATEGY",
                other,
                "expected stream, final or both",
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// How the assistant CLI authenticates. Resolved in a fixed priority order:
/// API key, then AWS Bedrock, then Google Vertex.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    ApiKey(String),
    Bedrock {
        access_key_id: String,
        secret_access_key: String,
        region: String,
    },
    Vertex {
        project_id: String,
        region: String,
        credentials_file: String,
    },
}

impl Credentials {
    pub fn kind(&self) -> &'static str {
        match self {
            Credentials::ApiKey(_) => "anthropic-api-key",
            Credentials::Bedrock { .. } => "aws-bedrock",
            Credentials::Vertex { .. } => "google-vertex",
        }
    }

    /// Environment variables the CLI reads for this method.
    pub fn env(&self) -> Vec<(String, String)> {
        let pairs: Vec<(&str, &str)> = match self {
            Credentials::ApiKey(key) => vec![("ANTHROPIC_API_KEY", key.as_str())],
            Credentials::Bedrock {
                access_key_id,
                secret_access_key,
                region,
            } => vec![
                ("CLAUDE_CODE_USE_BEDROCK", "1"),
                ("AWS_ACCESS_KEY_ID", access_key_id.as_str()),
                ("AWS_SECRET_ACCESS_KEY", secret_access_key.as_str()),
                ("AWS_REGION", region.as_str()),
            ],
            Credentials::Vertex {
                project_id,
                region,
                credentials_file,
            } => vec![
                ("CLAUDE_CODE_USE_VERTEX", "1"),
                ("ANTHROPIC_VERTEX_PROJECT_ID", project_id.as_str()),
                ("CLOUD_ML_REGION", region.as_str()),
                ("GOOGLE_APPLICATION_CREDENTIALS", credentials_file.as_str()),
            ],
        };
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn resolve(env: &Lookup<'_>) -> Option<Self> {
        if let Some(key) = env.get("ANTHROPIC_API_KEY") {
            return Some(Credentials::ApiKey(key));
        }
        if let (Some(access_key_id), Some(secret_access_key), Some(region)) = (
            env.get("AWS_ACCESS_KEY_ID"),
            env.get("AWS_SECRET_ACCESS_KEY"),
            env.get("AWS_REGION").or_else(|| env.get("AWS_DEFAULT_REGION")),
        ) {
            return Some(Credentials::Bedrock {
                access_key_id,
                secret_access_key,
                region,
            });
        }
        if let (Some(project_id), Some(region), Some(credentials_file)) = (
            env.get("ANTHROPIC_VERTEX_PROJECT_ID"),
            env.get("CLOUD_ML_REGION"),
            env.get("GOOGLE_APPLICATION_CREDENTIALS"),
        ) {
            return Some(Credentials::Vertex {
                project_id,
                region,
                credentials_file,
            });
        }
        None
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::ApiKey(_) => f.write_str("ApiKey(<redacted>)"),
            Credentials::Bedrock { region, .. } => f
                .debug_struct("Bedrock")
                .field("region", region)
                .finish_non_exhaustive(),
            Credentials::Vertex {
                project_id, region, ..
            } => f
                .debug_struct("Vertex")
                .field("project_id", project_id)
                .field("region", region)
                .finish_non_exhaustive(),
        }
    }
}

// ---------------------------------------------------------------------------
// HostSettings
// ---------------------------------------------------------------------------

/// Write credential for the Bitbucket REST API.
#[derive(Clone, PartialEq, Eq)]
pub enum HostAuth {
    Token(String),
    AppPassword { username: String, password: String },
}

impl fmt::Debug for HostAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostAuth::Token(_) => f.write_str("Token(<redacted>)"),
            HostAuth::AppPassword { username, .. } => f
                .debug_struct("AppPassword")
                .field("username", username)
                .finish_non_exhaustive(),
        }
    }
}

/// Repository coordinates and API access. Loadable on its own so the MCP
/// server can start without assistant credentials.
#[derive(Debug, Clone)]
pub struct HostSettings {
    pub workspace: String,
    pub repo_slug: String,
    pub auth: Option<HostAuth>,
    pub api_base: String,
}

impl HostSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        Self::from_env_lookup(&Lookup(&lookup))
    }

    fn from_env_lookup(env: &Lookup<'_>) -> Self {
        let auth = if let Some(token) = env.get("BITBUCKET_ACCESS_TOKEN") {
            Some(HostAuth::Token(token))
        } else if let (Some(username), Some(password)) = (
            env.get("BITBUCKET_USERNAME"),
            env.get("BITBUCKET_APP_PASSWORD"),
        ) {
            Some(HostAuth::AppPassword { username, password })
        } else {
            None
        };

        Self {
            workspace: env.get("BITBUCKET_WORKSPACE").unwrap_or_default(),
            repo_slug: env.get("BITBUCKET_REPO_SLUG").unwrap_or_default(),
            auth,
            api_base: env
                .get("BITBUCKET_API_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.workspace, self.repo_slug)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workspace.is_empty() {
            return Err(PipeError::MissingRepository("BITBUCKET_WORKSPACE"));
        }
        if self.repo_slug.is_empty() {
            return Err(PipeError::MissingRepository("BITBUCKET_REPO_SLUG"));
        }
        Ok(())
    }

    /// The variables that recreate these settings in a child process.
    pub fn to_env(&self) -> Vec<(String, String)> {
        let mut env = vec![
            ("BITBUCKET_WORKSPACE".to_string(), self.workspace.clone()),
            ("BITBUCKET_REPO_SLUG".to_string(), self.repo_slug.clone()),
            ("BITBUCKET_API_URL".to_string(), self.api_base.clone()),
        ];
        match &self.auth {
            Some(HostAuth::Token(token)) => {
                env.push(("BITBUCKET_ACCESS_TOKEN".into(), token.clone()));
            }
            Some(HostAuth::AppPassword { username, password }) => {
                env.push(("BITBUCKET_USERNAME".into(), username.clone()));
                env.push(("BITBUCKET_APP_PASSWORD".into(), password.clone()));
            }
            None => {}
        }
        env
    }
}

// ---------------------------------------------------------------------------
// PipeConfig
// ---------------------------------------------------------------------------

/// Validated, immutable configuration for one pipe invocation.
#[derive(Debug, Clone)]
pub struct PipeConfig {
    pub mode: Mode,
    pub trigger_phrase: String,
    pub model: String,
    pub fallback_model: Option<String>,
    pub max_turns: u32,
    pub timeout_minutes: u32,
    /// Pinned tool allow-list. Empty means "let the mode decide".
    pub allowed_tools: Vec<String>,
    pub blocked_tools: Vec<String>,
    pub credentials: Option<Credentials>,
    pub host: HostSettings,
    pub pr_id: Option<u64>,
    pub commit: Option<String>,
    pub branch: Option<String>,
    pub destination_branch: Option<String>,
    pub actor: Option<String>,
    pub event_type: Option<EventType>,
    pub enable_streaming_comments: bool,
    pub comment_update_strategy: CommentUpdateStrategy,
    pub auto_detect_actionable: bool,
    /// Externally supplied task for agent mode.
    pub task_prompt: Option<String>,
    /// Repository checkout; the assistant's working directory.
    pub repo_path: PathBuf,
    pub claude_cli: PathBuf,
    pub enable_mcp_tools: bool,
    pub debug: bool,
}

impl PipeConfig {
    /// Read the process environment. Call [`PipeConfig::validate`] before use.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from any key lookup. Parse errors surface here; cross-field
    /// requirements are checked by [`PipeConfig::validate`].
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self> {
        let env = Lookup(&lookup);

        let mode = match env.get("MODE") {
            Some(m) => m.parse()?,
            None => Mode::Tag,
        };
        let comment_update_strategy = match env.get("COMMENT_UPDATE_STRATEGY") {
            Some(s) => s.parse()?,
            None => CommentUpdateStrategy::Both,
        };
        let event_type = env.get("EVENT_TYPE").map(|e| e.parse()).transpose()?;
        let pr_id = env
            .get("BITBUCKET_PR_ID")
            .map(|v| {
                v.parse::<u64>()
                    .map_err(|_| invalid("BITBUCKET_PR_ID", &v, "expected a pull request number"))
            })
            .transpose()?;

        Ok(Self {
            mode,
            trigger_phrase: env
                .get("TRIGGER_PHRASE")
                .unwrap_or_else(|| DEFAULT_TRIGGER_PHRASE.to_string()),
            model: env.get("MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            fallback_model: env.get("FALLBACK_MODEL"),
            max_turns: env.positive("MAX_TURNS", DEFAULT_MAX_TURNS)?,
            timeout_minutes: env.positive("TIMEOUT_MINUTES", DEFAULT_TIMEOUT_MINUTES)?,
            allowed_tools: env.list("ALLOWED_TOOLS"),
            blocked_tools: env.list("BLOCKED_TOOLS"),
            credentials: Credentials::resolve(&env),
            host: HostSettings::from_env_lookup(&env),
            pr_id,
            commit: env.get("BITBUCKET_COMMIT"),
            branch: env.get("BITBUCKET_BRANCH"),
            destination_branch: env.get("BITBUCKET_PR_DESTINATION_BRANCH"),
            actor: env.get("BITBUCKET_STEP_TRIGGERER_UUID"),
            event_type,
            enable_streaming_comments: env.flag("ENABLE_STREAMING_COMMENTS", true)?,
            comment_update_strategy,
            auto_detect_actionable: env.flag("AUTO_DETECT_ACTIONABLE", true)?,
            task_prompt: env.get("TASK_PROMPT"),
            repo_path: env
                .get("BITBUCKET_CLONE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            claude_cli: env
                .get("CLAUDE_CLI_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("claude")),
            enable_mcp_tools: env.flag("ENABLE_MCP_TOOLS", true)?,
            debug: env.flag("DEBUG", false)?,
        })
    }

    /// Fail fast on anything that would make spawning the assistant pointless.
    pub fn validate(&self) -> Result<()> {
        self.host.validate()?;
        if self.credentials.is_none() {
            return Err(PipeError::MissingAuthentication);
        }
        if self.trigger_phrase.is_empty() {
            return Err(invalid("TRIGGER_PHRASE", "", "must not be empty"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(u64::from(self.timeout_minutes) * 60)
    }

    /// Partial comment updates are pushed while the assistant runs.
    pub fn streams_partial_updates(&self) -> bool {
        self.enable_streaming_comments
            && self.comment_update_strategy != CommentUpdateStrategy::Final
    }

    /// A final comment is posted when the assistant exits.
    pub fn posts_final_update(&self) -> bool {
        self.comment_update_strategy != CommentUpdateStrategy::Stream
    }
}

// ---------------------------------------------------------------------------
// Lookup helpers
// ---------------------------------------------------------------------------

struct Lookup<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Lookup<'_> {
    /// Trimmed value; empty strings count as unset.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => match v.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                _ => Err(invalid(key, &v, "expected true or false")),
            },
        }
    }

    fn positive(&self, key: &str, default: u32) -> Result<u32> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => match v.parse::<u32>() {
                Ok(n) if n > 0 => Ok(n),
                _ => Err(invalid(key, &v, "expected a positive integer")),
            },
        }
    }

    fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

pub(crate) fn invalid(key: &str, value: &str, reason: &str) -> PipeError {
    PipeError::InvalidSetting {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
