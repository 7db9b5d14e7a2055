//! `claude-agent`: native Rust driver for the Claude CLI subprocess.
//!
//! Implements the `--print --output-format stream-json` protocol: the prompt
//! is passed as a positional argument, and the CLI answers with one JSON
//! event per stdout line.
//!
//! # Architecture
//!
//! ```text
//! QueryOptions
//!     │
//!     ▼
//! ClaudeProcess   ← spawns `claude --print --output-format stream-json … <prompt>`
//!     │              stdin closed, stderr drained in the background
//!     ▼
//! EventReader     ← chunked stdout → LineDecoder → complete lines
//!     │
//!     ▼
//! StreamItem      ← Event(Message) or Noise(line); parsing never fails
//! ```
//!
//! Callers own the event loop, which lets them race it against a timeout and
//! terminate the process themselves.

pub mod error;
pub mod process;
pub mod stream;
pub mod types;

pub use error::ClaudeAgentError;
pub use process::{build_args, build_mcp_config_json, ClaudeProcess};
pub use stream::{parse_line, EventReader, LineDecoder, StreamItem};
pub use types::{
    AssistantContent, AssistantMessage, ContentBlock, McpServerConfig, Message, QueryOptions,
    ResultMessage, SystemMessage, UserMessage,
};

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, ClaudeAgentError>;
