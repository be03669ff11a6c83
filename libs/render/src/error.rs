//! Render errors.

use thiserror::Error;

/// Errors from parsing or evaluating a template.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RenderError {
    /// The template could not be parsed.
    #[error("syntax error at byte {offset}: {message}")]
    Syntax { offset: usize, message: String },

    /// An action referenced a function that does not exist.
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    /// A function was called with the wrong number of arguments.
    #[error("{function} expects {expected} argument(s), got {got}")]
    Arity {
        function: String,
        expected: &'static str,
        got: usize,
    },

    /// Evaluation failed.
    #[error("evaluation error: {0}")]
    Eval(String),
}

impl RenderError {
    pub(crate) fn syntax(offset: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            offset,
            message: message.into(),
        }
    }

    pub(crate) fn eval(message: impl Into<String>) -> Self {
        Self::Eval(message.into())
    }
}
