use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipeError {
    #[error(
        "no authentication configured: set ANTHROPIC_API_KEY, the AWS Bedrock credentials \
         (AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY, AWS_REGION) or the Vertex credentials \
         (ANTHROPIC_VERTEX_PROJECT_ID, CLOUD_ML_REGION, GOOGLE_APPLICATION_CREDENTIALS)"
    )]
    MissingAuthentication,

    #[error("repository coordinates missing: {0} must be set")]
    MissingRepository(&'static str),

    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidSetting {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Bitbucket API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Agent(#[from] claude_agent::ClaudeAgentError),
}

pub type Result<T> = std::result::Result<T, PipeError>;
