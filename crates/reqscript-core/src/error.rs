//! Error taxonomy for script execution.
//!
//! Lexical, syntactic, and structural errors abort the current script.
//! Semantic errors from expression evaluation do the same. Network
//! failures are deliberately NOT represented here as statement errors:
//! the HTTP engine captures them into a zero-status response snapshot so
//! scripts can inspect the outcome and react (see [`crate::engine`]).

use thiserror::Error;

/// Errors surfaced by the interpreter and runner.
#[derive(Error, Debug)]
pub enum ScriptError {
    /// Unrecognized input at a source position.
    #[error("line {line}, column {column}: unrecognized input near '{near}'")]
    Lexical {
        line: usize,
        column: usize,
        near: String,
    },

    /// No grammar rule matched the token sequence.
    #[error("syntax error: {message}")]
    Syntax { message: String },

    /// Unbalanced `if`/`endif` or loop/`endloop` structure.
    #[error("structural error: {message}")]
    Structural { message: String },

    /// A value was misused: non-numeric arithmetic operand, array index out
    /// of bounds, division by zero, or an unknown variable where a value is
    /// required.
    #[error("{message}")]
    Semantic { message: String },

    /// An `assert`/`expect` statement evaluated to false.
    #[error("assertion failed: expected {expected}, got {actual}")]
    Assertion { expected: String, actual: String },

    /// `break` or `continue` reached a place no loop can catch it.
    #[error("'{signal}' outside of a loop")]
    ControlFlow { signal: &'static str },

    /// Failure reading the script source itself.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScriptError {
    pub fn semantic(message: impl Into<String>) -> Self {
        ScriptError::Semantic {
            message: message.into(),
        }
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        ScriptError::Syntax {
            message: message.into(),
        }
    }

    pub fn structural(message: impl Into<String>) -> Self {
        ScriptError::Structural {
            message: message.into(),
        }
    }

    /// Prefixes the message with source line context, the way errors are
    /// reported to script authors. For lexical errors, which carry a line
    /// relative to the statement being tokenized, the line is rewritten to
    /// the script-level number.
    pub fn at_line(self, line: usize) -> Self {
        match self {
            ScriptError::Lexical { column, near, .. } => ScriptError::Lexical {
                line,
                column,
                near,
            },
            ScriptError::Syntax { message } => ScriptError::Syntax {
                message: format!("line {}: {}", line, message),
            },
            ScriptError::Semantic { message } => ScriptError::Semantic {
                message: format!("line {}: {}", line, message),
            },
            ScriptError::Structural { message } => ScriptError::Structural {
                message: format!("line {}: {}", line, message),
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexical_error_reports_position() {
        let err = ScriptError::Lexical {
            line: 3,
            column: 7,
            near: "~".into(),
        };
        assert_eq!(err.to_string(), "line 3, column 7: unrecognized input near '~'");
    }

    #[test]
    fn at_line_prefixes_message() {
        let err = ScriptError::semantic("division by zero").at_line(12);
        assert_eq!(err.to_string(), "line 12: division by zero");
    }

    #[test]
    fn assertion_carries_expected_and_actual() {
        let err = ScriptError::Assertion {
            expected: "status 200".into(),
            actual: "status 404".into(),
        };
        assert!(err.to_string().contains("status 200"));
        assert!(err.to_string().contains("status 404"));
    }
}
