//! Matcher expressions (§4.2): compiled once at startup, evaluated against
//! any message in constant-per-node time.

mod lexer;
mod parser;

use std::sync::atomic::{AtomicU64, Ordering};

use regex::Regex;
use thiserror::Error;

use crate::message::Message;

pub use parser::{Cmp, HeaderRef, Lhs, Node, Op, Rhs};

/// Raised when a matcher expression fails to parse (§4.2 "Compile fails on
/// syntax errors").
#[derive(Debug, Error)]
pub enum MatcherError {
    #[error("unexpected character '{0}' at position {1}")]
    UnexpectedChar(char, usize),
    #[error("unexpected end of expression")]
    UnexpectedEof,
    #[error("unexpected token '{0}' at position {1}")]
    UnexpectedToken(String, usize),
    #[error("invalid regular expression: {0}")]
    InvalidRegex(#[from] regex::Error),
    #[error("expected a field access like Fields[name] but got '{0}'")]
    BadFieldAccess(String),
}

/// Opaque identity for a compiled matcher, used by the router's self-match
/// safeguard (§4.2 "the matcher exposes its identity for this check").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatcherId(u64);

static NEXT_MATCHER_ID: AtomicU64 = AtomicU64::new(1);

/// A compiled, pre-regex boolean expression over a message's headers and
/// fields (§4.2).
#[derive(Debug)]
pub struct Matcher {
    id: MatcherId,
    root: Node,
    source: String,
}

impl Matcher {
    /// Parse and compile `expr`, pre-compiling any `=~`/`!~` regex literals.
    pub fn compile(expr: &str) -> Result<Self, MatcherError> {
        let tokens = lexer::lex(expr)?;
        let root = parser::parse(&tokens)?;
        Ok(Matcher {
            id: MatcherId(NEXT_MATCHER_ID.fetch_add(1, Ordering::Relaxed)),
            root,
            source: expr.to_owned(),
        })
    }

    /// A matcher that accepts every message (the `TRUE` literal).
    pub fn always() -> Self {
        Matcher::compile("TRUE").expect("TRUE is always a valid matcher expression")
    }

    pub fn id(&self) -> MatcherId {
        self.id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Post-order traversal with short-circuit (§4.2).
    pub fn evaluate(&self, message: &Message) -> bool {
        eval_node(&self.root, message)
    }
}

fn eval_node(node: &Node, message: &Message) -> bool {
    match node {
        Node::True => true,
        Node::False => false,
        Node::And(lhs, rhs) => eval_node(lhs, message) && eval_node(rhs, message),
        Node::Or(lhs, rhs) => eval_node(lhs, message) || eval_node(rhs, message),
        Node::Cmp(cmp) => eval_cmp(cmp, message),
    }
}

fn eval_cmp(cmp: &Cmp, message: &Message) -> bool {
    let lhs = resolve_lhs(&cmp.lhs, message);
    match lhs {
        None => false,
        Some(value) => compare(&value, &cmp.op, &cmp.rhs),
    }
}

/// Resolved left-hand-side value, coerced per §3.2's "type coercions follow
/// the field's declared kind."
#[derive(Debug, Clone)]
enum Resolved {
    Str(String),
    Num(f64),
    Bool(bool),
    Bytes(Vec<u8>),
}

fn resolve_lhs(lhs: &Lhs, message: &Message) -> Option<Resolved> {
    match lhs {
        Lhs::Header(h) => Some(resolve_header(*h, message)),
        Lhs::Field {
            name,
            field_index,
            array_index,
        } => {
            let value = message.field_value(name, *field_index, *array_index)?;
            Some(match value {
                crate::message::FieldValue::String(s) => Resolved::Str(s.clone()),
                crate::message::FieldValue::Bytes(b) => Resolved::Bytes(b.clone()),
                crate::message::FieldValue::Int64(i) => Resolved::Num(*i as f64),
                crate::message::FieldValue::Float64(f) => Resolved::Num(*f),
                crate::message::FieldValue::Bool(b) => Resolved::Bool(*b),
            })
        }
    }
}

fn resolve_header(header: HeaderRef, message: &Message) -> Resolved {
    match header {
        HeaderRef::Uuid => Resolved::Str(message.uuid.to_string()),
        HeaderRef::Timestamp => Resolved::Num(message.timestamp as f64),
        HeaderRef::Type => Resolved::Str(message.r#type.clone()),
        HeaderRef::Logger => Resolved::Str(message.logger.clone()),
        HeaderRef::Severity => Resolved::Num(message.severity as f64),
        HeaderRef::Payload => Resolved::Str(message.payload.clone()),
        HeaderRef::EnvVersion => Resolved::Str(message.env_version.clone()),
        HeaderRef::Pid => Resolved::Num(message.pid as f64),
        HeaderRef::Hostname => Resolved::Str(message.hostname.clone()),
    }
}

fn compare(lhs: &Resolved, op: &Op, rhs: &Rhs) -> bool {
    match op {
        Op::RegexMatch | Op::RegexNotMatch => {
            let text = match lhs {
                Resolved::Str(s) => s.clone(),
                Resolved::Num(n) => n.to_string(),
                Resolved::Bool(b) => b.to_string(),
                Resolved::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            };
            let re: &Regex = match rhs {
                Rhs::Regex(re) => re,
                _ => return false,
            };
            let matched = re.is_match(&text);
            if matches!(op, Op::RegexMatch) {
                matched
            } else {
                !matched
            }
        }
        _ => compare_ordered(lhs, op, rhs),
    }
}

fn compare_ordered(lhs: &Resolved, op: &Op, rhs: &Rhs) -> bool {
    use std::cmp::Ordering;

    let ordering: Option<Ordering> = match (lhs, rhs) {
        (Resolved::Num(a), Rhs::Num(b)) => a.partial_cmp(b),
        (Resolved::Str(a), Rhs::Str(b)) => Some(a.as_str().cmp(b.as_str())),
        (Resolved::Bool(a), Rhs::Bool(b)) => Some(a.cmp(b)),
        // Mixed string/number comparisons coerce the literal into the
        // field's declared kind where unambiguous; otherwise no ordering.
        (Resolved::Str(a), Rhs::Num(b)) => a.parse::<f64>().ok().and_then(|a| a.partial_cmp(b)),
        (Resolved::Num(a), Rhs::Str(b)) => b.parse::<f64>().ok().and_then(|b| a.partial_cmp(&b)),
        _ => None,
    };

    match (ordering, op) {
        (Some(o), Op::Eq) => o == Ordering::Equal,
        (Some(o), Op::Ne) => o != Ordering::Equal,
        (Some(o), Op::Lt) => o == Ordering::Less,
        (Some(o), Op::Le) => o != Ordering::Greater,
        (Some(o), Op::Gt) => o == Ordering::Greater,
        (Some(o), Op::Ge) => o != Ordering::Less,
        (None, Op::Eq) => false,
        (None, Op::Ne) => true,
        (None, _) => false,
    }
}
