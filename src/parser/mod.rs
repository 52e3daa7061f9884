mod api;
pub mod ast;
#[cfg(test)]
mod unit_tests;
mod util;

pub use api::JsParser;
pub use api::Rule;

use thiserror::Error;

/// Syntax error produced by the parser, positioned at a 1-based line and column.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("SyntaxError: {message} at {line}:{column}")]
pub struct JsError {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

impl JsError {
    pub fn new(message: &str, line: u32, column: u32) -> Self {
        JsError {
            message: message.to_string(),
            line,
            column,
        }
    }
}
