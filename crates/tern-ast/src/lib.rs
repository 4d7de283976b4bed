//! Tern input contract
//!
//! The analyzed AST handed to the compiler core, together with the
//! declaration table produced by static semantic analysis. Both are plain
//! data and serde-serializable, so a front end written elsewhere can hand
//! them over as JSON.

pub mod ast;
pub mod decl;

pub use ast::*;
pub use decl::{Binding, BindingId, DeclKind, DeclTable, Storage};

/// Source location of a node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Span {
    /// Byte offset of the first character
    pub start: u32,
    /// Byte offset one past the last character
    pub end: u32,
    /// 1-based line of `start`
    pub line: u32,
    /// 1-based column of `start`
    pub column: u32,
}

impl Span {
    pub fn new(start: u32, end: u32, line: u32, column: u32) -> Self {
        Self {
            start,
            end,
            line,
            column,
        }
    }

    /// Smallest span covering both `self` and `other`
    pub fn to(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
            line: self.line,
            column: self.column,
        }
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}
