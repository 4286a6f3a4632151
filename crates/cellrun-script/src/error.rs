//! Errors raised by cell code.

use thiserror::Error;

/// An error raised by cell code, rendered as `Kind: message`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ScriptError {
    pub kind: String,
    pub message: String,
}

impl ScriptError {
    #[must_use]
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn syntax(message: impl AsRef<str>, line: usize) -> Self {
        Self::new("SyntaxError", format!("{} (line {line})", message.as_ref()))
    }

    #[must_use]
    pub fn indentation(message: impl AsRef<str>, line: usize) -> Self {
        Self::new(
            "IndentationError",
            format!("{} (line {line})", message.as_ref()),
        )
    }

    #[must_use]
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    #[must_use]
    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new("ValueError", message)
    }

    #[must_use]
    pub fn name_error(name: &str) -> Self {
        Self::new("NameError", format!("name '{name}' is not defined"))
    }

    #[must_use]
    pub fn attribute_error(type_name: &str, attr: &str) -> Self {
        Self::new(
            "AttributeError",
            format!("'{type_name}' object has no attribute '{attr}'"),
        )
    }

    #[must_use]
    pub fn runtime_error(message: impl Into<String>) -> Self {
        Self::new("RuntimeError", message)
    }

    #[must_use]
    pub fn zero_division() -> Self {
        Self::new("ZeroDivisionError", "division by zero")
    }

    #[must_use]
    pub fn overflow() -> Self {
        Self::new("OverflowError", "integer overflow")
    }
}

/// Cancellation observed at a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("execution cancelled")]
pub struct Cancelled;

/// Anything that unwinds an execution.
///
/// Cancellation is kept apart from script errors so cell code can never
/// swallow it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error("execution cancelled")]
    Cancelled,
}

impl From<Cancelled> for ExecError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

impl ExecError {
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Shorthand used across the interpreter.
pub type ExecResult<T> = Result<T, ExecError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_kind_colon_message() {
        let err = ScriptError::value_error("x");
        assert_eq!(err.to_string(), "ValueError: x");
        assert_eq!(ExecError::from(err).to_string(), "ValueError: x");
    }

    #[test]
    fn test_cancelled_converts() {
        assert!(ExecError::from(Cancelled).is_cancelled());
    }
}
