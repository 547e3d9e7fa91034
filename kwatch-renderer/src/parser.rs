//! Template parser: turns JSONPath template source into a node tree.
//!
//! # Grammar
//!
//! ```text
//! template := (text | "{" action "}")*
//! action   := "range" path | "end" | string | path
//! path     := ("@" | "$")? step*
//! step     := "." name | ".*" | ".." name | "..*" | "[" bracket "]"
//! bracket  := "*" | int | int ("," int)+ | slice | quoted ("," quoted)*
//!           | "?(" path (op literal)? ")"
//! slice    := int? ":" int? (":" int?)?
//! op       := "==" | "!=" | "<" | "<=" | ">" | ">="
//! ```
//!
//! A leading field name without a dot is accepted (`{metadata.name}`).

use serde_json::Value;

use crate::error::{CompileError, CompileErrorKind};

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    /// Literal template text outside any action.
    Text(String),
    /// `{"..."}` quoted literal.
    Literal(String),
    /// A field selection; its values are rendered space-separated.
    Select(Path),
    /// `{range path}body{end}`
    Range { path: Path, body: Vec<Node> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    /// `$`: the document root.
    Root,
    /// `@`: the current element (the root outside `range`).
    Current,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Path {
    pub origin: Origin,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Step {
    Child(String),
    Descend(String),
    DescendAll,
    Wildcard,
    Index(i64),
    Slice {
        start: Option<i64>,
        end: Option<i64>,
        step: Option<i64>,
    },
    IndexUnion(Vec<i64>),
    FieldUnion(Vec<String>),
    Filter(Box<Filter>),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Filter {
    pub path: Path,
    pub test: Option<(CmpOp, Value)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

// ---------------------------------------------------------------------------
// Template scanning
// ---------------------------------------------------------------------------

enum Token {
    Text(String),
    Action { offset: usize, body: String },
}

/// Parse a whole template. Positions are tracked in characters while
/// scanning and reported as byte offsets.
pub(crate) fn parse_template(source: &str) -> Result<Vec<Node>, CompileError> {
    tokenize(source)
        .and_then(build_tree)
        .map_err(|err| err.in_bytes(source))
}

fn tokenize(source: &str) -> Result<Vec<Token>, CompileError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut text = String::new();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '{' => {
                if !text.is_empty() {
                    tokens.push(Token::Text(std::mem::take(&mut text)));
                }
                let open = i;
                i += 1;
                let mut body = String::new();
                let mut quote: Option<char> = None;
                let mut closed = false;
                while i < chars.len() {
                    let c = chars[i];
                    if let Some(q) = quote {
                        body.push(c);
                        if c == '\\' && i + 1 < chars.len() {
                            body.push(chars[i + 1]);
                            i += 2;
                            continue;
                        }
                        if c == q {
                            quote = None;
                        }
                        i += 1;
                        continue;
                    }
                    match c {
                        '"' | '\'' => {
                            quote = Some(c);
                            body.push(c);
                        }
                        '}' => {
                            closed = true;
                            i += 1;
                            break;
                        }
                        '{' => {
                            return Err(CompileError::new(i, CompileErrorKind::UnexpectedChar('{')))
                        }
                        _ => body.push(c),
                    }
                    i += 1;
                }
                if quote.is_some() {
                    return Err(CompileError::new(open, CompileErrorKind::UnterminatedString));
                }
                if !closed {
                    return Err(CompileError::new(open, CompileErrorKind::Unbalanced('{')));
                }
                tokens.push(Token::Action {
                    offset: open + 1,
                    body,
                });
            }
            '}' => return Err(CompileError::new(i, CompileErrorKind::Unbalanced('}'))),
            c => {
                text.push(c);
                i += 1;
            }
        }
    }
    if !text.is_empty() {
        tokens.push(Token::Text(text));
    }
    Ok(tokens)
}

fn build_tree(tokens: Vec<Token>) -> Result<Vec<Node>, CompileError> {
    // Open `range` blocks: (offset, path, body so far).
    let mut open: Vec<(usize, Path, Vec<Node>)> = Vec::new();
    let mut out = Vec::new();

    for token in tokens {
        let node = match token {
            Token::Text(text) => Node::Text(text),
            Token::Action { offset, body } => {
                let leading_ws = body.chars().take_while(|c| c.is_whitespace()).count();
                let start = offset + leading_ws;
                let action = body.trim();
                if action.is_empty() {
                    return Err(CompileError::new(offset, CompileErrorKind::EmptyAction));
                }
                if action == "end" {
                    let Some((_, path, body)) = open.pop() else {
                        return Err(CompileError::new(start, CompileErrorKind::StrayEnd));
                    };
                    Node::Range { path, body }
                } else if let Some(rest) = range_operand(action) {
                    let path = parse_path(rest, start + (action.chars().count() - rest.chars().count()))?;
                    open.push((start, path, Vec::new()));
                    continue;
                } else if action.starts_with('"') || action.starts_with('\'') {
                    let mut cursor = Cursor::new(action, start);
                    let text = cursor.quoted()?;
                    cursor.expect_end()?;
                    Node::Literal(text)
                } else {
                    Node::Select(parse_path(action, start)?)
                }
            }
        };
        match open.last_mut() {
            Some((_, _, body)) => body.push(node),
            None => out.push(node),
        }
    }

    if let Some((offset, ..)) = open.pop() {
        return Err(CompileError::new(offset, CompileErrorKind::RangeWithoutEnd));
    }
    Ok(out)
}

fn range_operand(action: &str) -> Option<&str> {
    let rest = action.strip_prefix("range")?;
    if rest.starts_with(char::is_whitespace) {
        Some(rest.trim_start())
    } else {
        None
    }
}

fn parse_path(source: &str, base: usize) -> Result<Path, CompileError> {
    let mut cursor = Cursor::new(source, base);
    let path = cursor.path()?;
    cursor.expect_end()?;
    Ok(path)
}

// ---------------------------------------------------------------------------
// Path cursor
// ---------------------------------------------------------------------------

struct Cursor {
    chars: Vec<char>,
    pos: usize,
    base: usize,
}

impl Cursor {
    fn new(source: &str, base: usize) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            base,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) {
        self.pos += 1;
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn err(&self, kind: CompileErrorKind) -> CompileError {
        CompileError::new(self.base + self.pos, kind)
    }

    fn err_at(&self, pos: usize, kind: CompileErrorKind) -> CompileError {
        CompileError::new(self.base + pos, kind)
    }

    fn expect_end(&mut self) -> Result<(), CompileError> {
        self.skip_ws();
        match self.peek() {
            None => Ok(()),
            Some(c) => Err(self.err(CompileErrorKind::UnexpectedChar(c))),
        }
    }

    fn path(&mut self) -> Result<Path, CompileError> {
        self.skip_ws();
        let origin = match self.peek() {
            Some('$') => {
                self.bump();
                Origin::Root
            }
            Some('@') => {
                self.bump();
                Origin::Current
            }
            _ => Origin::Current,
        };
        let mut bare_name_allowed = self.pos == 0 || self.chars[..self.pos].iter().all(|c| c.is_whitespace());
        let mut steps = Vec::new();

        loop {
            match self.peek() {
                Some('.') => {
                    self.bump();
                    if self.eat('.') {
                        if self.eat('*') {
                            steps.push(Step::DescendAll);
                        } else {
                            let name = self.name();
                            if name.is_empty() {
                                return Err(self.err(CompileErrorKind::ExpectedField));
                            }
                            steps.push(Step::Descend(name));
                        }
                    } else if self.eat('*') {
                        steps.push(Step::Wildcard);
                    } else {
                        // `{.}` selects the current element.
                        let name = self.name();
                        if !name.is_empty() {
                            steps.push(Step::Child(name));
                        }
                    }
                }
                Some('[') => {
                    let open = self.pos;
                    self.bump();
                    steps.push(self.bracket(open)?);
                }
                Some(c) if bare_name_allowed && is_name_char(c) => {
                    steps.push(Step::Child(self.name()));
                }
                _ => break,
            }
            bare_name_allowed = false;
        }
        Ok(Path { origin, steps })
    }

    fn name(&mut self) -> String {
        let mut name = String::new();
        while let Some(c) = self.peek().filter(|c| is_name_char(*c)) {
            name.push(c);
            self.bump();
        }
        name
    }

    fn bracket(&mut self, open: usize) -> Result<Step, CompileError> {
        self.skip_ws();
        let step = match self.peek() {
            None => return Err(self.err_at(open, CompileErrorKind::Unbalanced('['))),
            Some('*') => {
                self.bump();
                Step::Wildcard
            }
            Some('?') => {
                self.bump();
                self.filter()?
            }
            Some('\'') | Some('"') => {
                let mut names = vec![self.quoted()?];
                loop {
                    self.skip_ws();
                    if !self.eat(',') {
                        break;
                    }
                    self.skip_ws();
                    names.push(self.quoted()?);
                }
                if names.len() == 1 {
                    Step::Child(names.remove(0))
                } else {
                    Step::FieldUnion(names)
                }
            }
            Some(_) => self.index_or_slice(open)?,
        };
        self.skip_ws();
        if self.eat(']') {
            return Ok(step);
        }
        Err(match self.peek() {
            None => self.err_at(open, CompileErrorKind::Unbalanced('[')),
            Some(c) => self.err(CompileErrorKind::UnexpectedChar(c)),
        })
    }

    fn index_or_slice(&mut self, open: usize) -> Result<Step, CompileError> {
        let start = self.pos;
        let mut raw = String::new();
        while let Some(c) = self.peek() {
            match c {
                ']' => break,
                '[' | '{' | '}' | '(' | ')' => {
                    return Err(self.err(CompileErrorKind::UnexpectedChar(c)))
                }
                _ => raw.push(c),
            }
            self.bump();
        }
        if self.at_end() {
            return Err(self.err_at(open, CompileErrorKind::Unbalanced('[')));
        }

        let int = |text: &str| -> Result<i64, CompileError> {
            let text = text.trim();
            text.parse::<i64>()
                .map_err(|_| self.err_at(start, CompileErrorKind::BadInteger(text.to_owned())))
        };
        let bound = |text: &str| -> Result<Option<i64>, CompileError> {
            if text.trim().is_empty() {
                Ok(None)
            } else {
                int(text).map(Some)
            }
        };

        if raw.contains(':') {
            let parts: Vec<&str> = raw.split(':').collect();
            if parts.len() > 3 {
                return Err(self.err_at(start, CompileErrorKind::BadSlice("at most two `:`")));
            }
            let step = match parts.get(2) {
                Some(text) => bound(text)?,
                None => None,
            };
            if step.is_some_and(|s| s <= 0) {
                return Err(self.err_at(start, CompileErrorKind::BadSlice("step must be positive")));
            }
            Ok(Step::Slice {
                start: bound(parts[0])?,
                end: bound(parts[1])?,
                step,
            })
        } else if raw.contains(',') {
            let indices = raw.split(',').map(int).collect::<Result<Vec<_>, _>>()?;
            Ok(Step::IndexUnion(indices))
        } else {
            Ok(Step::Index(int(&raw)?))
        }
    }

    fn filter(&mut self) -> Result<Step, CompileError> {
        let open = self.pos;
        if !self.eat('(') {
            return Err(match self.peek() {
                None => self.err(CompileErrorKind::Unbalanced('[')),
                Some(c) => self.err(CompileErrorKind::UnexpectedChar(c)),
            });
        }
        self.skip_ws();
        if !matches!(self.peek(), Some('@') | Some('$')) {
            return Err(match self.peek() {
                None => self.err_at(open, CompileErrorKind::Unbalanced('(')),
                Some(c) => self.err(CompileErrorKind::UnexpectedChar(c)),
            });
        }
        let path = self.path()?;
        self.skip_ws();

        let test = if self.peek() == Some(')') {
            None
        } else {
            let op_start = self.pos;
            let mut op = String::new();
            while let Some(c) = self.peek().filter(|c| "=!<>~".contains(*c)) {
                op.push(c);
                self.bump();
            }
            let op = match op.as_str() {
                "==" => CmpOp::Eq,
                "!=" => CmpOp::Ne,
                "<" => CmpOp::Lt,
                "<=" => CmpOp::Le,
                ">" => CmpOp::Gt,
                ">=" => CmpOp::Ge,
                "" => {
                    return Err(match self.peek() {
                        None => self.err_at(open, CompileErrorKind::Unbalanced('(')),
                        Some(c) => self.err(CompileErrorKind::UnexpectedChar(c)),
                    })
                }
                other => {
                    return Err(
                        self.err_at(op_start, CompileErrorKind::UnknownOperator(other.to_owned()))
                    )
                }
            };
            self.skip_ws();
            Some((op, self.literal()?))
        };

        self.skip_ws();
        if !self.eat(')') {
            return Err(match self.peek() {
                None => self.err_at(open, CompileErrorKind::Unbalanced('(')),
                Some(c) => self.err(CompileErrorKind::UnexpectedChar(c)),
            });
        }
        Ok(Step::Filter(Box::new(Filter { path, test })))
    }

    fn literal(&mut self) -> Result<Value, CompileError> {
        match self.peek() {
            Some('\'') | Some('"') => Ok(Value::String(self.quoted()?)),
            Some(_) => {
                let start = self.pos;
                let mut raw = String::new();
                while let Some(c) = self
                    .peek()
                    .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '+' | '.'))
                {
                    raw.push(c);
                    self.bump();
                }
                match serde_json::from_str::<Value>(&raw) {
                    Ok(value @ (Value::Number(_) | Value::Bool(_) | Value::Null)) => Ok(value),
                    _ => Err(self.err_at(start, CompileErrorKind::ExpectedLiteral)),
                }
            }
            None => Err(self.err(CompileErrorKind::ExpectedLiteral)),
        }
    }

    fn quoted(&mut self) -> Result<String, CompileError> {
        let open = self.pos;
        let Some(quote) = self.peek().filter(|c| *c == '\'' || *c == '"') else {
            return Err(self.err(CompileErrorKind::ExpectedLiteral));
        };
        self.bump();
        let mut text = String::new();
        loop {
            match self.peek() {
                None => return Err(self.err_at(open, CompileErrorKind::UnterminatedString)),
                Some(c) if c == quote => {
                    self.bump();
                    return Ok(text);
                }
                Some('\\') => {
                    self.bump();
                    let escaped = match self.peek() {
                        None => return Err(self.err_at(open, CompileErrorKind::UnterminatedString)),
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('r') => '\r',
                        Some(other) => other,
                    };
                    text.push(escaped);
                    self.bump();
                }
                Some(c) => {
                    text.push(c);
                    self.bump();
                }
            }
        }
    }
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '/' | '~' | '+')
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
