//! Error types for kwatch-renderer.

use thiserror::Error;

/// What went wrong while compiling a path expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileErrorKind {
    #[error("unbalanced `{0}`")]
    Unbalanced(char),

    #[error("unexpected character `{0}`")]
    UnexpectedChar(char),

    #[error("unterminated string literal")]
    UnterminatedString,

    #[error("unknown operator `{0}`; expected one of ==, !=, <, <=, >, >=")]
    UnknownOperator(String),

    #[error("invalid integer `{0}`")]
    BadInteger(String),

    #[error("invalid slice: {0}")]
    BadSlice(&'static str),

    #[error("empty action `{{}}`")]
    EmptyAction,

    #[error("expected a field name")]
    ExpectedField,

    #[error("expected a literal (string, number, true, false or null)")]
    ExpectedLiteral,

    #[error("`range` without matching `end`")]
    RangeWithoutEnd,

    #[error("`end` without matching `range`")]
    StrayEnd,
}

/// A path expression the grammar does not recognise.
///
/// `offset` is a byte offset into the expression source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid path expression at offset {offset}: {kind}")]
pub struct CompileError {
    pub offset: usize,
    pub kind: CompileErrorKind,
}

impl CompileError {
    pub(crate) fn new(offset: usize, kind: CompileErrorKind) -> Self {
        Self { offset, kind }
    }

    /// Turn a character position in `source` into a byte offset.
    pub(crate) fn in_bytes(mut self, source: &str) -> Self {
        self.offset = source
            .char_indices()
            .nth(self.offset)
            .map_or(source.len(), |(byte, _)| byte);
        self
    }
}
