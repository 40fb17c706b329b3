//! Error taxonomy for the kernel.
//!
//! Every layer returns a typed error; unrecoverable errors are translated
//! exactly once at the CLI boundary into an exit code and a single
//! human-readable message.

use thiserror::Error;

use crate::policy::model::Verdict;

/// Typed errors produced by the kernel.
#[derive(Debug, Error)]
pub enum VetoError {
    /// Configuration could not be parsed or validated.
    #[error("config error: {0}")]
    Config(String),

    /// A referenced resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Schema or argument validation failed.
    #[error("validation error: {0}")]
    Validation(String),

    /// Agent hook or integration failure.
    #[error("agent error: {0}")]
    Agent(String),

    /// Remote API failure (timeout, connection, non-2xx).
    #[error("network error: {0}")]
    Network(String),

    /// Local adjudicator failure.
    #[error("kernel error: {0}")]
    Kernel(String),

    /// AST or grammar parse failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// Filesystem or socket failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl VetoError {
    /// Exit code for the CLI boundary. Every variant maps to 1.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

/// Raised by the validation pipeline when a wrapped tool call is denied.
///
/// Carries the full verdict so SDK callers can inspect the reason and any
/// suggested substitute. The original tool handler never runs.
#[derive(Debug, Error)]
#[error("tool call '{tool_name}' denied: {reason}")]
pub struct ToolCallDeniedError {
    pub tool_name: String,
    pub reason: String,
    pub verdict: Verdict,
}

impl ToolCallDeniedError {
    pub fn new(tool_name: impl Into<String>, verdict: Verdict) -> Self {
        let reason = verdict
            .reason
            .clone()
            .unwrap_or_else(|| "blocked by policy".to_string());
        Self {
            tool_name: tool_name.into(),
            reason,
            verdict,
        }
    }
}

pub type VetoResult<T> = std::result::Result<T, VetoError>;
