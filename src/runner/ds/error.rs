use std::sync::Arc;

use thiserror::Error;

use crate::runner::ds::value::JsValue;

/// Errors raised while executing bytecode. All variants except `Interrupted`
/// are catchable by script `try/catch`; the named kinds are materialized as
/// error objects of the matching constructor when caught.
#[derive(Debug, Clone, Error)]
pub enum JErrorType {
    #[error("ReferenceError: {0}")]
    ReferenceError(String),
    #[error("TypeError: {0}")]
    TypeError(String),
    #[error("RangeError: {0}")]
    RangeError(String),
    #[error("SyntaxError: {0}")]
    SyntaxError(String),
    #[error("Error: {0}")]
    Error(String),
    #[error("uncaught exception: {0}")]
    Thrown(JsValue),
    #[error("script terminated")]
    Interrupted,
}

impl JErrorType {
    pub fn is_catchable(&self) -> bool {
        !matches!(self, JErrorType::Interrupted)
    }

    /// Name of the builtin constructor used to materialize this error.
    pub fn constructor_name(&self) -> Option<&'static str> {
        match self {
            JErrorType::ReferenceError(_) => Some("ReferenceError"),
            JErrorType::TypeError(_) => Some("TypeError"),
            JErrorType::RangeError(_) => Some("RangeError"),
            JErrorType::SyntaxError(_) => Some("SyntaxError"),
            JErrorType::Error(_) => Some("Error"),
            JErrorType::Thrown(_) | JErrorType::Interrupted => None,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            JErrorType::ReferenceError(m)
            | JErrorType::TypeError(m)
            | JErrorType::RangeError(m)
            | JErrorType::SyntaxError(m)
            | JErrorType::Error(m) => Some(m),
            JErrorType::Thrown(_) | JErrorType::Interrupted => None,
        }
    }
}

/// Failure to turn source text into a script.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{filename}:{line}:{column}: SyntaxError: {message}")]
pub struct CompileError {
    pub message: String,
    pub filename: Arc<str>,
    pub line: u32,
    pub column: u32,
}

impl CompileError {
    pub fn new(message: impl Into<String>, filename: &Arc<str>, line: u32, column: u32) -> Self {
        CompileError {
            message: message.into(),
            filename: filename.clone(),
            line,
            column,
        }
    }
}

/// An exception that escaped to the embedder.
#[derive(Debug, Clone)]
pub struct Exception {
    pub value: JsValue,
    /// `ToString` of the thrown value, e.g. `TypeError: x is not a function`.
    pub message: String,
    pub filename: Option<Arc<str>>,
    pub line: Option<u32>,
}

impl std::fmt::Display for Exception {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.filename, self.line) {
            (Some(file), Some(line)) => write!(f, "{}:{}: Uncaught {}", file, line, self.message),
            _ => write!(f, "Uncaught {}", self.message),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error("{0}")]
    Uncaught(Exception),
    #[error("script terminated by interrupt")]
    Interrupted,
}

impl EngineError {
    pub fn exception(&self) -> Option<&Exception> {
        match self {
            EngineError::Uncaught(e) => Some(e),
            _ => None,
        }
    }
}
