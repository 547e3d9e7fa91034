//! # kwatch-renderer
//!
//! Path formatter: compiles JSONPath templates (the Kubernetes dialect) once
//! and renders them against any number of objects.
//!
//! ## Usage
//!
//! ```rust
//! use kwatch_renderer::PathExpression;
//! use serde_json::json;
//!
//! let expr = PathExpression::compile("{.metadata.name}: {.spec.ports[*].port}").unwrap();
//! let svc = json!({"metadata": {"name": "web"}, "spec": {"ports": [{"port": 80}, {"port": 443}]}});
//! assert_eq!(expr.render(&svc), "web: 80 443");
//! ```

mod error;
mod eval;
mod parser;

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use kwatch_core::ObjectRecord;

pub use error::{CompileError, CompileErrorKind};

use crate::parser::Node;

/// Template that renders the whole object.
pub const WHOLE_OBJECT: &str = "{@}";

/// A compiled, immutable path expression.
///
/// Compile once at startup; evaluation never fails. Missing fields,
/// out-of-range indices and type mismatches simply produce no output for
/// that branch.
#[derive(Debug, Clone, PartialEq)]
pub struct PathExpression {
    source: String,
    nodes: Vec<Node>,
}

impl PathExpression {
    pub fn compile(source: &str) -> Result<Self, CompileError> {
        Ok(Self {
            source: source.to_owned(),
            nodes: parser::parse_template(source)?,
        })
    }

    /// The template text this expression was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Every value produced by the template's selections, in order.
    ///
    /// Literal text is not included; see [`PathExpression::render`].
    pub fn evaluate(&self, value: &Value) -> Vec<String> {
        eval::render(&self.nodes, value).values
    }

    /// Full template output: literal text verbatim, each selection's values
    /// joined by a single space.
    pub fn render(&self, value: &Value) -> String {
        eval::render(&self.nodes, value).text
    }

    pub fn render_record(&self, record: &ObjectRecord) -> String {
        self.render(record.value())
    }
}

impl Default for PathExpression {
    fn default() -> Self {
        Self {
            source: WHOLE_OBJECT.to_owned(),
            nodes: vec![Node::Select(parser::Path {
                origin: parser::Origin::Current,
                steps: Vec::new(),
            })],
        }
    }
}

impl FromStr for PathExpression {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::compile(s)
    }
}

impl fmt::Display for PathExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.source.fmt(f)
    }
}

/// Compile `source` into a [`PathExpression`].
pub fn compile(source: &str) -> Result<PathExpression, CompileError> {
    PathExpression::compile(source)
}

/// Evaluate a compiled expression against an object.
pub fn evaluate(expr: &PathExpression, value: &Value) -> Vec<String> {
    expr.evaluate(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_compiled_whole_object() {
        assert_eq!(PathExpression::default(), compile(WHOLE_OBJECT).expect("compile"));
    }

    #[test]
    fn display_is_source() {
        let expr: PathExpression = "{.a}-{.b}".parse().expect("parse");
        assert_eq!(expr.to_string(), "{.a}-{.b}");
    }
}
