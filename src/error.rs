//! Error types for flowforge operations.
//!
//! Defines error types for each subsystem:
//! - LLM backend interactions
//! - Static Python source checks
//! - Cron schedules
//! - Prefect registration and triggering
//! - Git notification
//! - The deploy pipeline itself

use thiserror::Error;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

/// Errors raised while statically checking Python source.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("line {line}: unterminated string literal")]
    UnterminatedString { line: usize },

    #[error("line {line}: '{open}' was never closed")]
    UnclosedBracket { line: usize, open: char },

    #[error("line {line}: unmatched '{close}'")]
    UnmatchedBracket { line: usize, close: char },

    #[error("line {line}: unexpected character after line continuation")]
    BadContinuation { line: usize },

    #[error("line {line}: unexpected indent")]
    UnexpectedIndent { line: usize },

    #[error("line {line}: expected an indented block")]
    ExpectedIndent { line: usize },

    #[error("line {line}: unindent does not match any outer indentation level")]
    UnindentMismatch { line: usize },

    #[error("line {line}: invalid function definition: {reason}")]
    InvalidDefinition { line: usize, reason: String },

    #[error("line {line}: unexpected top-level statement '{statement}'")]
    UnexpectedStatement { line: usize, statement: String },

    #[error("line {line}: invalid syntax: {message}")]
    Syntax { line: usize, message: String },

    #[error("line {line}: decorator is not followed by a function definition")]
    DanglingDecorator { line: usize },

    #[error("no function definition found")]
    NoDefinition,

    #[error("expected exactly one top-level function, found {count} ({names})")]
    MultipleDefinitions { count: usize, names: String },
}

/// Errors raised while validating a cron schedule.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("cron expression must have 5 fields, got {0}")]
    FieldCount(usize),

    #[error("invalid {field} field '{value}': {reason}")]
    InvalidField {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("unknown cron macro '{0}'")]
    UnknownMacro(String),

    #[error("invalid timezone '{0}'")]
    InvalidTimezone(String),
}

/// Errors from the orchestration platform (Prefect CLI or API).
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("failed to spawn '{command}': {reason}")]
    Spawn { command: String, reason: String },

    #[error("'{command}' exited with code {code}: {stderr}")]
    NonZeroExit {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("platform unreachable: {0}")]
    Unreachable(String),

    #[error("platform API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("unexpected platform response: {0}")]
    UnexpectedResponse(String),
}

/// Errors from the version-control collaborator.
#[derive(Debug, Error)]
pub enum VcsError {
    #[error("failed to spawn git: {0}")]
    Spawn(String),

    #[error("git {step} failed: {stderr}")]
    StepFailed { step: String, stderr: String },
}

/// Errors that end a deploy pipeline run.
///
/// Kinds raised before `Writing` leave nothing on disk. `Registration` and
/// later kinds leave the written flow file in place.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("generation backend failed: {0}")]
    GenerationBackend(#[from] LlmError),

    #[error("generated artifact violates the schema: {0}")]
    InvalidGeneration(String),

    #[error("naming mismatch: expected function '{expected}', source declares '{found}'")]
    NamingMismatch { expected: String, found: String },

    #[error("malformed source: {0}")]
    MalformedSource(#[from] SourceError),

    #[error("failed to persist '{path}': {reason}")]
    Persistence { path: String, reason: String },

    #[error("registration failed: {0}")]
    Registration(PlatformError),

    #[error("trigger failed: {0}")]
    Trigger(PlatformError),
}

impl DeployError {
    /// Short machine-friendly name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            DeployError::GenerationBackend(_) => "GenerationBackendError",
            DeployError::InvalidGeneration(_) => "InvalidGenerationError",
            DeployError::NamingMismatch { .. } => "NamingMismatchError",
            DeployError::MalformedSource(_) => "MalformedSourceError",
            DeployError::Persistence { .. } => "PersistenceError",
            DeployError::Registration(_) => "RegistrationError",
            DeployError::Trigger(_) => "TriggerError",
        }
    }
}

/// Result alias for deploy operations.
pub type DeployResult<T> = Result<T, DeployError>;
