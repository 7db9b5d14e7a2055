//! Core of the Claude pipe for Bitbucket Pipelines.
//!
//! ```text
//! PipeConfig ──► ModeStrategy (tag | agent | review)
//!                     │ should_trigger / prepare_context
//!                     ▼
//!              PreparedExecution ──► Runner ──► claude CLI (stream-json)
//!                                      │
//!                                      ▼
//!                               CommentUpdater ──► HostApi (Bitbucket)
//! ```

pub mod classifier;
pub mod comment;
pub mod config;
pub mod context;
pub mod error;
pub mod host;
pub mod modes;
pub mod prepare;
pub mod runner;
pub mod tools;

pub use error::{PipeError, Result};
