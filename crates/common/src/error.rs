//! Error types for Stepdeck

use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};
use thiserror::Error;

/// Result type alias using the Stepdeck runner error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading features, compiling patterns or building
/// the step registry. These abort a run before any scenario executes.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("Parse error at {file}:{line}: {message}")]
    Parse {
        file: String,
        line: usize,
        message: String,
    },

    #[error("Invalid step pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Unknown parameter type {{{0}}}")]
    UnknownParameterType(String),

    #[error("Parameter type {{{0}}} is already defined")]
    DuplicateParameterType(String),

    #[error("Step pattern '{pattern}' is equivalent to already registered '{existing}'")]
    DuplicatePattern { pattern: String, existing: String },

    #[error("Invalid tag expression '{expression}': {reason}")]
    TagExpression { expression: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure raised by a single scenario line.
///
/// Every variant maps onto an [`ErrorKind`] used in reports. None of them
/// is retried by the dispatcher.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StepError {
    #[error("No step definition matches '{line}'")]
    NoMatch { line: String },

    #[error("Ambiguous step '{line}' matches: {}", .candidates.join(", "))]
    Ambiguous {
        line: String,
        candidates: Vec<String>,
    },

    #[error("Cannot convert '{input}' to {{{type_name}}}: {reason}")]
    Conversion {
        type_name: String,
        input: String,
        reason: String,
    },

    #[error("Resource error: {0}")]
    Resource(String),

    #[error("Timed out after {after_ms} ms waiting for {what}")]
    Timeout { what: String, after_ms: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{message} (expected: {expected}, actual: {actual})")]
    Assertion {
        message: String,
        expected: String,
        actual: String,
    },

    #[error("Bad step argument: {0}")]
    Argument(String),

    #[error("{0}")]
    Other(String),
}

/// Report-facing classification of a [`StepError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NoMatch,
    Ambiguous,
    Conversion,
    Resource,
    Timeout,
    NotFound,
    Assertion,
    Argument,
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::NoMatch => write!(f, "no_match"),
            ErrorKind::Ambiguous => write!(f, "ambiguous"),
            ErrorKind::Conversion => write!(f, "conversion"),
            ErrorKind::Resource => write!(f, "resource"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::Assertion => write!(f, "assertion"),
            ErrorKind::Argument => write!(f, "argument"),
            ErrorKind::Other => write!(f, "other"),
        }
    }
}

impl StepError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StepError::NoMatch { .. } => ErrorKind::NoMatch,
            StepError::Ambiguous { .. } => ErrorKind::Ambiguous,
            StepError::Conversion { .. } => ErrorKind::Conversion,
            StepError::Resource(_) => ErrorKind::Resource,
            StepError::Timeout { .. } => ErrorKind::Timeout,
            StepError::NotFound(_) => ErrorKind::NotFound,
            StepError::Assertion { .. } => ErrorKind::Assertion,
            StepError::Argument(_) => ErrorKind::Argument,
            StepError::Other(_) => ErrorKind::Other,
        }
    }

    /// Matching failures end the scenario without touching the world.
    pub fn is_match_error(&self) -> bool {
        matches!(self, StepError::NoMatch { .. } | StepError::Ambiguous { .. })
    }

    pub fn assertion(
        message: impl Into<String>,
        expected: impl fmt::Display,
        actual: impl fmt::Display,
    ) -> Self {
        StepError::Assertion {
            message: message.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub fn other(message: impl fmt::Display) -> Self {
        StepError::Other(message.to_string())
    }

    /// Expected and actual values, for assertion failures only
    pub fn expectation(&self) -> Option<(&str, &str)> {
        match self {
            StepError::Assertion {
                expected, actual, ..
            } => Some((expected.as_str(), actual.as_str())),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StepError {
    fn from(e: std::io::Error) -> Self {
        StepError::Resource(e.to_string())
    }
}

impl From<serde_json::Error> for StepError {
    fn from(e: serde_json::Error) -> Self {
        StepError::Other(format!("JSON error: {}", e))
    }
}

/// Fail the step with an assertion error unless `condition` holds.
pub fn ensure(condition: bool, message: impl Into<String>) -> std::result::Result<(), StepError> {
    if condition {
        Ok(())
    } else {
        Err(StepError::assertion(message, true, false))
    }
}

/// Fail the step unless `expected == actual`, reporting both values.
pub fn ensure_eq<T>(expected: T, actual: T, message: impl Into<String>) -> std::result::Result<(), StepError>
where
    T: PartialEq + Debug,
{
    if expected == actual {
        Ok(())
    } else {
        Err(StepError::assertion(
            message,
            format!("{:?}", expected),
            format!("{:?}", actual),
        ))
    }
}
