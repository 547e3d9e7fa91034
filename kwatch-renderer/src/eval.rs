//! Evaluation of a parsed template against a JSON value.
//!
//! Maps are always visited in lexicographic key order and rendered with
//! sorted keys, independent of how `serde_json` stores them, so structurally
//! equal inputs render byte-identically.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use crate::parser::{CmpOp, Filter, Node, Origin, Path, Step};

/// Output of one template evaluation.
#[derive(Debug, Default)]
pub(crate) struct Rendered {
    /// The full template output.
    pub text: String,
    /// Every value produced by a selection, in order.
    pub values: Vec<String>,
}

pub(crate) fn render(nodes: &[Node], root: &Value) -> Rendered {
    let mut out = Rendered::default();
    render_into(nodes, root, root, &mut out);
    out
}

fn render_into(nodes: &[Node], root: &Value, current: &Value, out: &mut Rendered) {
    for node in nodes {
        match node {
            Node::Text(text) | Node::Literal(text) => out.text.push_str(text),
            Node::Select(path) => {
                let rendered: Vec<String> = select(path, root, current)
                    .into_iter()
                    .map(render_value)
                    .collect();
                out.text.push_str(&rendered.join(" "));
                out.values.extend(rendered);
            }
            Node::Range { path, body } => {
                for item in select(path, root, current) {
                    render_into(body, root, item, out);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

pub(crate) fn select<'v>(path: &Path, root: &'v Value, current: &'v Value) -> Vec<&'v Value> {
    let start = match path.origin {
        Origin::Root => root,
        Origin::Current => current,
    };
    let mut values = vec![start];
    for step in &path.steps {
        let mut next = Vec::new();
        for value in values {
            apply(step, value, root, &mut next);
        }
        values = next;
    }
    values
}

fn apply<'v>(step: &Step, value: &'v Value, root: &'v Value, out: &mut Vec<&'v Value>) {
    match step {
        Step::Child(name) => out.extend(child(value, name)),
        Step::FieldUnion(names) => out.extend(names.iter().filter_map(|name| child(value, name))),
        Step::Descend(name) => descend(value, Some(name), out),
        Step::DescendAll => descend(value, None, out),
        Step::Wildcard => children(value, out),
        Step::Index(index) => out.extend(element(value, *index)),
        Step::IndexUnion(indices) => {
            out.extend(indices.iter().filter_map(|index| element(value, *index)))
        }
        Step::Slice { start, end, step } => {
            let Some(items) = value.as_array() else { return };
            let len = items.len() as i64;
            let clamp = |bound: i64| {
                if bound < 0 {
                    (len + bound).max(0)
                } else {
                    bound.min(len)
                }
            };
            let from = start.map(clamp).unwrap_or(0);
            let to = end.map(clamp).unwrap_or(len);
            if from < to {
                let stride = step.unwrap_or(1) as usize;
                out.extend(items[from as usize..to as usize].iter().step_by(stride));
            }
        }
        Step::Filter(filter) => {
            let mut candidates = Vec::new();
            children(value, &mut candidates);
            out.extend(
                candidates
                    .into_iter()
                    .filter(|candidate| filter_matches(filter, root, candidate)),
            );
        }
    }
}

fn child<'v>(value: &'v Value, name: &str) -> Option<&'v Value> {
    value.as_object().and_then(|map| map.get(name))
}

fn element(value: &Value, index: i64) -> Option<&Value> {
    let items = value.as_array()?;
    let resolved = if index < 0 {
        items.len() as i64 + index
    } else {
        index
    };
    usize::try_from(resolved).ok().and_then(|i| items.get(i))
}

fn children<'v>(value: &'v Value, out: &mut Vec<&'v Value>) {
    match value {
        Value::Object(map) => out.extend(sorted(map).into_iter().map(|(_, v)| v)),
        Value::Array(items) => out.extend(items.iter()),
        _ => {}
    }
}

/// Pre-order walk; `name = None` collects every descendant.
fn descend<'v>(value: &'v Value, name: Option<&str>, out: &mut Vec<&'v Value>) {
    match value {
        Value::Object(map) => {
            for (key, child) in sorted(map) {
                if name.map_or(true, |wanted| wanted == key) {
                    out.push(child);
                }
                descend(child, name, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                if name.is_none() {
                    out.push(item);
                }
                descend(item, name, out);
            }
        }
        _ => {}
    }
}

fn sorted(map: &Map<String, Value>) -> Vec<(&String, &Value)> {
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

fn filter_matches(filter: &Filter, root: &Value, candidate: &Value) -> bool {
    let found = select(&filter.path, root, candidate);
    match &filter.test {
        None => found
            .iter()
            .any(|value| !matches!(value, Value::Null | Value::Bool(false))),
        Some((op, literal)) => found.iter().any(|value| compare(value, *op, literal)),
    }
}

fn compare(left: &Value, op: CmpOp, right: &Value) -> bool {
    let ordering = match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (a, b) if a == b => Some(Ordering::Equal),
        _ => None,
    };
    match op {
        CmpOp::Eq => ordering == Some(Ordering::Equal),
        CmpOp::Ne => ordering != Some(Ordering::Equal),
        CmpOp::Lt => ordering == Some(Ordering::Less),
        CmpOp::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        CmpOp::Gt => ordering == Some(Ordering::Greater),
        CmpOp::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Strings render raw, everything else as canonical compact JSON.
pub(crate) fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => {
            let mut out = String::new();
            write_canonical(other, &mut out);
            out
        }
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            out.push('{');
            for (i, (key, child)) in sorted(map).into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(child, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
