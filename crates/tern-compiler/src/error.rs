//! Compilation errors
//!
//! Every failure the core can report. Situations a pass can safely skip
//! never surface here; they just leave the IR untouched.

use tern_ast::Span;
use thiserror::Error;

/// Errors that can occur while compiling a module
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompileError {
    /// A construct the declaration table marks as statically invalid
    #[error("{message} at {span}")]
    StaticError {
        /// Human-readable description
        message: String,
        /// Location of the offending construct
        span: Span,
    },

    /// The AST or declaration table broke the input contract
    #[error("Contract violation in function '{function}': {message}")]
    ContractViolation {
        /// Function being built
        function: String,
        /// What was wrong
        message: String,
    },

    /// A language feature outside the supported subset
    #[error("Unsupported: {feature}")]
    Unsupported {
        /// Description of the feature
        feature: String,
    },

    /// An internal invariant failed; fatal for the whole module
    #[error("Internal error in function '{function}' after pass '{pass}': {message}")]
    Internal {
        /// Function whose IR is malformed
        function: String,
        /// Pass (or stage) that produced it
        pass: String,
        /// Verifier message
        message: String,
    },

    /// Compiler options could not be parsed
    #[error("Invalid compiler configuration: {0}")]
    Config(String),
}

impl CompileError {
    pub fn internal(function: impl Into<String>, pass: impl Into<String>, message: impl Into<String>) -> Self {
        CompileError::Internal {
            function: function.into(),
            pass: pass.into(),
            message: message.into(),
        }
    }

    /// True for errors that indicate a compiler bug rather than bad input
    pub fn is_internal(&self) -> bool {
        matches!(self, CompileError::Internal { .. })
    }
}

impl From<toml::de::Error> for CompileError {
    fn from(err: toml::de::Error) -> Self {
        CompileError::Config(err.to_string())
    }
}

/// Result type for compilation
pub type CompileResult<T> = Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_names_function_and_pass() {
        let err = CompileError::internal("outer", "cse", "operand %3 does not dominate %5");
        let text = err.to_string();
        assert!(text.contains("'outer'"));
        assert!(text.contains("'cse'"));
        assert!(err.is_internal());
    }

    #[test]
    fn test_static_error_display() {
        let err = CompileError::StaticError {
            message: "Assignment to constant variable 'x'".to_string(),
            span: Span::new(0, 1, 3, 7),
        };
        assert_eq!(err.to_string(), "Assignment to constant variable 'x' at 3:7");
        assert!(!err.is_internal());
    }
}
