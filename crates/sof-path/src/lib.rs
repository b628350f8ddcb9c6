#![forbid(unsafe_code)]

use std::fmt;

use serde_json::Value;
use sof_types::{IdValue, TypedValue};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("syntax error in {path:?}: {message}")]
    Syntax { path: String, message: String },
    #[error("unsupported function {name}() in {path:?}")]
    UnsupportedFunction { path: String, name: String },
    #[error("cannot evaluate {path:?}: {message}")]
    Evaluation { path: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Function {
    First,
    Last,
    Exists,
    Empty,
    Count,
    GetResourceKey,
    GetReferenceKey(Option<String>),
    Join(Option<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    Member(String),
    This,
    Call(Function),
}

/// A parsed path such as `name.family`, `getResourceKey()` or
/// `subject.getReferenceKey(Patient)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    source: String,
    terms: Vec<Term>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Resource,
    ResourceId,
    Element,
}

/// One item of a path collection: either a location inside the resource JSON
/// or a value computed by a function.
#[derive(Debug, Clone, PartialEq)]
pub enum Item<'a> {
    Node { value: &'a Value, kind: NodeKind },
    Computed(TypedValue),
}

impl<'a> Item<'a> {
    #[must_use]
    pub fn resource(value: &'a Value) -> Self {
        Self::Node {
            value,
            kind: NodeKind::Resource,
        }
    }

    fn element(value: &'a Value, parent: NodeKind, name: &str) -> Self {
        let kind = if parent == NodeKind::Resource && name == "id" {
            NodeKind::ResourceId
        } else {
            NodeKind::Element
        };
        Self::Node { value, kind }
    }

    fn is_resource_of_type(&self, type_name: &str) -> bool {
        matches!(
            self,
            Self::Node { value, kind: NodeKind::Resource }
                if value.get("resourceType").and_then(Value::as_str) == Some(type_name)
        )
    }

    /// Typed view of the item as a row value.
    pub fn to_typed(&self) -> Result<TypedValue, String> {
        let (value, kind) = match self {
            Self::Computed(value) => return Ok(value.clone()),
            Self::Node { value, kind } => (*value, *kind),
        };
        Ok(match value {
            Value::String(text) if kind == NodeKind::ResourceId => TypedValue::identifier(text),
            Value::String(text) => TypedValue::string(text),
            Value::Bool(flag) => TypedValue::primitive("boolean", flag.to_string()),
            Value::Number(number) => {
                let text = number.to_string();
                if text.contains(['.', 'e', 'E']) {
                    TypedValue::decimal(text).map_err(|err| err.to_string())?
                } else {
                    TypedValue::primitive("integer", text)
                }
            }
            Value::Object(map) => TypedValue::Complex {
                type_name: map
                    .get("resourceType")
                    .and_then(Value::as_str)
                    .unwrap_or("Element")
                    .to_owned(),
            },
            Value::Array(_) | Value::Null => TypedValue::Complex {
                type_name: "Element".to_owned(),
            },
        })
    }
}

impl Path {
    pub fn parse(source: &str) -> Result<Self, PathError> {
        let tokens = tokenize(source)?;
        let mut pos = 0;
        let mut terms = vec![parse_term(source, &tokens, &mut pos)?];
        while pos < tokens.len() {
            if tokens[pos] != Token::Dot {
                return Err(syntax(
                    source,
                    format!("unexpected token at position {pos}: {:?}", tokens[pos]),
                ));
            }
            pos += 1;
            terms.push(parse_term(source, &tokens, &mut pos)?);
        }
        Ok(Self {
            source: source.to_owned(),
            terms,
        })
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn evaluate<'a>(&self, context: &Item<'a>) -> Result<Vec<Item<'a>>, PathError> {
        let mut current = vec![context.clone()];
        for (idx, term) in self.terms.iter().enumerate() {
            if idx == 0
                && let Term::Member(name) = term
                && current.iter().all(|item| item.is_resource_of_type(name))
            {
                continue;
            }
            current = self.apply_term(term, current)?;
        }
        Ok(current)
    }

    fn apply_term<'a>(&self, term: &Term, input: Vec<Item<'a>>) -> Result<Vec<Item<'a>>, PathError> {
        match term {
            Term::This => Ok(input),
            Term::Member(name) => Ok(navigate(&input, name)),
            Term::Call(function) => self.call(function, input),
        }
    }

    fn call<'a>(&self, function: &Function, input: Vec<Item<'a>>) -> Result<Vec<Item<'a>>, PathError> {
        let out = match function {
            Function::First => input.into_iter().take(1).collect(),
            Function::Last => input.into_iter().last().into_iter().collect(),
            Function::Exists => vec![boolean(!input.is_empty())],
            Function::Empty => vec![boolean(input.is_empty())],
            Function::Count => vec![Item::Computed(TypedValue::primitive(
                "integer",
                input.len().to_string(),
            ))],
            Function::GetResourceKey => input
                .iter()
                .filter_map(|item| match item {
                    Item::Node {
                        value,
                        kind: NodeKind::Resource,
                    } => value.get("id").and_then(Value::as_str),
                    _ => None,
                })
                .map(|id| Item::Computed(TypedValue::identifier(id)))
                .collect(),
            Function::GetReferenceKey(type_filter) => input
                .iter()
                .filter_map(|item| match item {
                    Item::Node { value, .. } => value.get("reference").and_then(Value::as_str),
                    Item::Computed(_) => None,
                })
                .map(IdValue::new)
                .filter(|id| {
                    type_filter
                        .as_deref()
                        .is_none_or(|wanted| id.resource_type() == Some(wanted))
                })
                .map(|id| Item::Computed(TypedValue::Identifier(id)))
                .collect(),
            Function::Join(separator) => {
                if input.is_empty() {
                    return Ok(Vec::new());
                }
                let mut parts = Vec::with_capacity(input.len());
                for item in &input {
                    let typed = item.to_typed().map_err(|message| self.evaluation(message))?;
                    let text = typed.canonical_string().ok_or_else(|| {
                        self.evaluation(format!("join() needs primitive values, found {typed}"))
                    })?;
                    parts.push(text.to_owned());
                }
                vec![Item::Computed(TypedValue::string(
                    parts.join(separator.as_deref().unwrap_or("")),
                ))]
            }
        };
        Ok(out)
    }

    fn evaluation(&self, message: String) -> PathError {
        PathError::Evaluation {
            path: self.source.clone(),
            message,
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn boolean<'a>(value: bool) -> Item<'a> {
    Item::Computed(TypedValue::primitive("boolean", value.to_string()))
}

fn navigate<'a>(input: &[Item<'a>], name: &str) -> Vec<Item<'a>> {
    let mut out = Vec::new();
    for item in input {
        let Item::Node { value, kind } = item else {
            continue;
        };
        match value.get(name) {
            Some(Value::Array(elements)) => out.extend(
                elements
                    .iter()
                    .filter(|element| !element.is_null())
                    .map(|element| Item::element(element, *kind, name)),
            ),
            Some(Value::Null) | None => {}
            Some(child) => out.push(Item::element(child, *kind, name)),
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    This,
    Dot,
    Comma,
    LParen,
    RParen,
}

fn syntax(path: &str, message: impl Into<String>) -> PathError {
    PathError::Syntax {
        path: path.to_owned(),
        message: message.into(),
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, PathError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '\'' | '`' => {
                let quote = c;
                i += 1;
                let start = i;
                while i < chars.len() && chars[i] != quote {
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(syntax(input, "unterminated quoted token"));
                }
                let text: String = chars[start..i].iter().collect();
                i += 1;
                tokens.push(if quote == '`' {
                    Token::Ident(text)
                } else {
                    Token::Str(text)
                });
            }
            '$' => {
                let start = i;
                i += 1;
                while i < chars.len() && chars[i].is_ascii_alphanumeric() {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                if word != "$this" {
                    return Err(syntax(input, format!("unsupported variable {word}")));
                }
                tokens.push(Token::This);
            }
            _ if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            _ => {
                return Err(syntax(input, format!("unexpected character: '{c}'")));
            }
        }
    }
    if tokens.is_empty() {
        return Err(syntax(input, "empty path"));
    }
    Ok(tokens)
}

fn parse_term(source: &str, tokens: &[Token], pos: &mut usize) -> Result<Term, PathError> {
    let Some(token) = tokens.get(*pos) else {
        return Err(syntax(source, "path ends after '.'"));
    };
    *pos += 1;
    let name = match token {
        Token::This => return Ok(Term::This),
        Token::Ident(name) => name.clone(),
        other => {
            return Err(syntax(
                source,
                format!("expected a name at position {}, found {other:?}", *pos - 1),
            ));
        }
    };
    if tokens.get(*pos) != Some(&Token::LParen) {
        return Ok(Term::Member(name));
    }
    *pos += 1;
    let args = parse_args(source, tokens, pos)?;
    parse_function(source, &name, args).map(Term::Call)
}

fn parse_args(source: &str, tokens: &[Token], pos: &mut usize) -> Result<Vec<Token>, PathError> {
    let mut args = Vec::new();
    loop {
        match tokens.get(*pos) {
            Some(Token::RParen) => {
                *pos += 1;
                return Ok(args);
            }
            Some(Token::Comma) if !args.is_empty() => *pos += 1,
            Some(arg @ (Token::Ident(_) | Token::Str(_))) => {
                args.push(arg.clone());
                *pos += 1;
                if !matches!(tokens.get(*pos), Some(Token::Comma | Token::RParen)) {
                    return Err(syntax(source, "function arguments must be literals or type names"));
                }
            }
            Some(other) => {
                return Err(syntax(source, format!("unexpected token in arguments: {other:?}")));
            }
            None => return Err(syntax(source, "unclosed '('")),
        }
    }
}

fn parse_function(source: &str, name: &str, args: Vec<Token>) -> Result<Function, PathError> {
    let no_args = |function: Function| {
        if args.is_empty() {
            Ok(function)
        } else {
            Err(syntax(source, format!("{name}() takes no arguments")))
        }
    };
    match name {
        "first" => no_args(Function::First),
        "last" => no_args(Function::Last),
        "exists" => no_args(Function::Exists),
        "empty" => no_args(Function::Empty),
        "count" => no_args(Function::Count),
        "getResourceKey" => no_args(Function::GetResourceKey),
        "getReferenceKey" => match args.as_slice() {
            [] => Ok(Function::GetReferenceKey(None)),
            [Token::Ident(type_name)] => Ok(Function::GetReferenceKey(Some(type_name.clone()))),
            _ => Err(syntax(source, "getReferenceKey() takes at most one type name")),
        },
        "join" => match args.as_slice() {
            [] => Ok(Function::Join(None)),
            [Token::Str(separator)] => Ok(Function::Join(Some(separator.clone()))),
            _ => Err(syntax(source, "join() takes at most one string separator")),
        },
        _ => Err(PathError::UnsupportedFunction {
            path: source.to_owned(),
            name: name.to_owned(),
        }),
    }
}
