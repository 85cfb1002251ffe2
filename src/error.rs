//! Error types for Reading Assist.

use std::time::Duration;

/// Top-level error type for the assistant core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Skill error: {0}")]
    Skill(#[from] SkillError),

    #[error("Message bus error: {0}")]
    Bus(#[from] BusError),
}

/// Configuration-related errors. These are raised before any network call.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Key-value storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error for key {key}: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),
}

/// Upstream provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("HTTP {status}: {status_text}")]
    HttpStatus { status: u16, status_text: String },

    #[error("Provider {provider} did not respond within {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Stream read failed: {0}")]
    Stream(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Tool-call limit of {max} iterations exceeded")]
    ToolLoopExceeded { max: usize },
}

/// Skill invocation errors.
#[derive(Debug, thiserror::Error)]
pub enum SkillError {
    #[error("Skill {name} not found")]
    NotFound { name: String },

    #[error("Skill {name} is disabled")]
    Disabled { name: String },

    #[error("Skill {name} execution failed: {reason}")]
    ExecutionFailed { name: String, reason: String },

    #[error("Invalid parameters for skill {name}: {reason}")]
    InvalidParameters { name: String, reason: String },

    #[error("Remote tool source {url} unavailable: {reason}")]
    RemoteUnavailable { url: String, reason: String },
}

/// Message bus errors.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Unexpected response to {message_type}: {reason}")]
    InvalidResponse { message_type: String, reason: String },
}

/// Result type alias for the assistant core.
pub type Result<T> = std::result::Result<T, Error>;
