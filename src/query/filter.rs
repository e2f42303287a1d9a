//! `$filter` expressions: tokenizer, precedence-climbing parser, AST and evaluation.
//!
//! Grammar (keywords lowercase, whitespace-insensitive between tokens):
//!
//! ```text
//! filter     := or
//! or         := and ("or" and)*
//! and        := unary ("and" unary)*
//! unary      := "not" unary | primary
//! primary    := "(" or ")" | comparison
//! comparison := property ("eq" | "ne" | "gt" | "ge" | "lt" | "le") literal
//! literal    := 'quoted text' | number | "true" | "false"
//! ```
//!
//! Literals are coerced to the compared attribute's kind while parsing, so a
//! malformed query fails before any store access.

use crate::config::{RecordTypeDescriptor, ValueKind};
use crate::error::AppError;
use crate::query::{AttributePath, AttributePathResolver};
use crate::record::Record;
use crate::value::{coerce, Value};
use std::cmp::Ordering;
use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl ComparisonOp {
    pub fn from_keyword(s: &str) -> Option<Self> {
        Some(match s {
            "eq" => ComparisonOp::Eq,
            "ne" => ComparisonOp::Ne,
            "gt" => ComparisonOp::Gt,
            "ge" => ComparisonOp::Ge,
            "lt" => ComparisonOp::Lt,
            "le" => ComparisonOp::Le,
            _ => return None,
        })
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            ComparisonOp::Eq => "eq",
            ComparisonOp::Ne => "ne",
            ComparisonOp::Gt => "gt",
            ComparisonOp::Ge => "ge",
            ComparisonOp::Lt => "lt",
            ComparisonOp::Le => "le",
        }
    }

    pub fn sql_operator(&self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::Ne => "<>",
            ComparisonOp::Gt => ">",
            ComparisonOp::Ge => ">=",
            ComparisonOp::Lt => "<",
            ComparisonOp::Le => "<=",
        }
    }

    pub fn test(&self, ord: Ordering) -> bool {
        match self {
            ComparisonOp::Eq => ord == Ordering::Equal,
            ComparisonOp::Ne => ord != Ordering::Equal,
            ComparisonOp::Gt => ord == Ordering::Greater,
            ComparisonOp::Ge => ord != Ordering::Less,
            ComparisonOp::Lt => ord == Ordering::Less,
            ComparisonOp::Le => ord != Ordering::Greater,
        }
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Parsed predicate tree. Immutable once built.
#[derive(Clone, Debug, PartialEq)]
pub enum FilterExpression {
    Comparison {
        path: AttributePath,
        op: ComparisonOp,
        literal: Value,
    },
    And(Box<FilterExpression>, Box<FilterExpression>),
    Or(Box<FilterExpression>, Box<FilterExpression>),
    Not(Box<FilterExpression>),
}

impl FilterExpression {
    /// Three-valued evaluation over values in descriptor order: `None` is SQL's unknown.
    pub fn evaluate(&self, values: &[Value]) -> Option<bool> {
        match self {
            FilterExpression::Comparison { path, op, literal } => {
                let value = values.get(path.index())?;
                value.compare(literal).map(|ord| op.test(ord))
            }
            FilterExpression::And(l, r) => match (l.evaluate(values), r.evaluate(values)) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            },
            FilterExpression::Or(l, r) => match (l.evaluate(values), r.evaluate(values)) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            },
            FilterExpression::Not(inner) => inner.evaluate(values).map(|b| !b),
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.belongs_to(record.entity()) && self.evaluate(record.values()) == Some(true)
    }

    /// True when every comparison was resolved against `entity`.
    pub fn belongs_to(&self, entity: &str) -> bool {
        match self {
            FilterExpression::Comparison { path, .. } => path.entity() == entity,
            FilterExpression::And(l, r) | FilterExpression::Or(l, r) => {
                l.belongs_to(entity) && r.belongs_to(entity)
            }
            FilterExpression::Not(inner) => inner.belongs_to(entity),
        }
    }
}

/// Canonical form: binary nodes fully parenthesized; parses back to an equal tree.
impl fmt::Display for FilterExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterExpression::Comparison { path, op, literal } => {
                write!(f, "{} {} ", path, op)?;
                match literal {
                    Value::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
                    Value::DateTime(_) => write!(f, "'{}'", literal),
                    other => write!(f, "{}", other),
                }
            }
            FilterExpression::And(l, r) => write!(f, "({} and {})", l, r),
            FilterExpression::Or(l, r) => write!(f, "({} or {})", l, r),
            FilterExpression::Not(inner) => write!(f, "not {}", inner),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Token<'a> {
    Ident(&'a str),
    Number(&'a str),
    Str(String),
    LParen,
    RParen,
}

#[derive(Clone, Debug)]
struct Spanned<'a> {
    token: Token<'a>,
    start: usize,
    end: usize,
}

fn take_while(chars: &mut Peekable<CharIndices<'_>>, len: usize, pred: impl Fn(char) -> bool) -> usize {
    while let Some(&(i, c)) = chars.peek() {
        if !pred(c) {
            return i;
        }
        chars.next();
    }
    len
}

fn is_number(text: &str) -> bool {
    let digits = text.strip_prefix('-').unwrap_or(text);
    let mut parts = digits.splitn(2, '.');
    let whole = parts.next().unwrap_or("");
    let fraction_ok = parts
        .next()
        .map(|f| !f.is_empty() && f.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(true);
    !whole.is_empty() && whole.bytes().all(|b| b.is_ascii_digit()) && fraction_ok
}

fn tokenize(raw: &str) -> Result<Vec<Spanned<'_>>, AppError> {
    let mut tokens = Vec::new();
    let mut chars = raw.char_indices().peekable();
    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        let token = match c {
            '(' => {
                chars.next();
                Token::LParen
            }
            ')' => {
                chars.next();
                Token::RParen
            }
            '\'' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        None => {
                            return Err(AppError::malformed_filter(
                                "unterminated string literal",
                                &raw[start..],
                            ))
                        }
                        Some((_, '\'')) => {
                            if matches!(chars.peek(), Some((_, '\''))) {
                                chars.next();
                                text.push('\'');
                            } else {
                                break;
                            }
                        }
                        Some((_, ch)) => text.push(ch),
                    }
                }
                Token::Str(text)
            }
            '-' | '0'..='9' => {
                chars.next();
                let end = take_while(&mut chars, raw.len(), |ch| ch.is_ascii_digit() || ch == '.');
                let text = &raw[start..end];
                if !is_number(text) {
                    return Err(AppError::malformed_filter("invalid number", text));
                }
                Token::Number(text)
            }
            c if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
                let end = take_while(&mut chars, raw.len(), |ch| {
                    ch.is_ascii_alphanumeric() || matches!(ch, '_' | '$' | '.' | '/')
                });
                Token::Ident(&raw[start..end])
            }
            _ => return Err(AppError::malformed_filter("unexpected character", &raw[start..])),
        };
        let end = chars.peek().map(|&(i, _)| i).unwrap_or(raw.len());
        tokens.push(Spanned { token, start, end });
    }
    Ok(tokens)
}

/// Deepest `(` / `not` nesting accepted. Parsing recurses once per level.
const MAX_NESTING: usize = 64;

struct Parser<'a> {
    desc: &'a RecordTypeDescriptor,
    raw: &'a str,
    tokens: Vec<Spanned<'a>>,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Spanned<'a>> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Spanned<'a>> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        let hit = matches!(self.peek(), Some(Spanned { token: Token::Ident(w), .. }) if *w == keyword);
        if hit {
            self.pos += 1;
        }
        hit
    }

    fn fragment(&self, tok: &Spanned<'a>) -> &'a str {
        &self.raw[tok.start..tok.end]
    }

    fn unexpected_end(&self) -> AppError {
        AppError::malformed_filter("unexpected end of filter", self.raw.trim())
    }

    fn parse_or(&mut self) -> Result<FilterExpression, AppError> {
        let mut left = self.parse_and()?;
        while self.eat_keyword("or") {
            let right = self.parse_and()?;
            left = FilterExpression::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<FilterExpression, AppError> {
        let mut left = self.parse_unary()?;
        while self.eat_keyword("and") {
            let right = self.parse_unary()?;
            left = FilterExpression::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn descend(&mut self, at: usize) -> Result<(), AppError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(AppError::malformed_filter("filter nested too deeply", &self.raw[at..]));
        }
        Ok(())
    }

    fn parse_unary(&mut self) -> Result<FilterExpression, AppError> {
        let at = self.peek().map(|t| t.start);
        if self.eat_keyword("not") {
            self.descend(at.unwrap_or(0))?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(FilterExpression::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<FilterExpression, AppError> {
        let tok = self.advance().ok_or_else(|| self.unexpected_end())?;
        match tok.token {
            Token::LParen => {
                self.descend(tok.start)?;
                let inner = self.parse_or()?;
                self.depth -= 1;
                match self.advance() {
                    Some(Spanned { token: Token::RParen, .. }) => Ok(inner),
                    Some(other) => Err(AppError::malformed_filter(
                        "expected ')'",
                        self.fragment(&other),
                    )),
                    None => Err(AppError::malformed_filter(
                        "unbalanced parentheses",
                        &self.raw[tok.start..],
                    )),
                }
            }
            Token::Ident(name) if !matches!(name, "and" | "or" | "not") => self.parse_comparison(name),
            _ => Err(AppError::malformed_filter(
                "expected property or '('",
                self.fragment(&tok),
            )),
        }
    }

    fn parse_comparison(&mut self, name: &str) -> Result<FilterExpression, AppError> {
        let path = AttributePathResolver::resolve(self.desc, name)?;
        let op_tok = self.advance().ok_or_else(|| self.unexpected_end())?;
        let op = match &op_tok.token {
            Token::Ident(w) => ComparisonOp::from_keyword(w),
            _ => None,
        }
        .ok_or_else(|| AppError::malformed_filter("unknown operator", self.fragment(&op_tok)))?;
        let lit_tok = self.advance().ok_or_else(|| self.unexpected_end())?;
        let literal = self.literal(&path, &lit_tok)?;
        Ok(FilterExpression::Comparison { path, op, literal })
    }

    fn literal(&self, path: &AttributePath, tok: &Spanned<'a>) -> Result<Value, AppError> {
        let text = self.fragment(tok);
        let kind = path.kind();
        let mismatch = || AppError::type_mismatch(path.name(), kind, text);
        match (&tok.token, kind) {
            (Token::Str(s), ValueKind::Text | ValueKind::DateTime) => {
                coerce(kind, s).map_err(|_| mismatch())
            }
            (Token::Number(n), ValueKind::Integer | ValueKind::Decimal | ValueKind::Reference) => {
                coerce(kind, n).map_err(|_| mismatch())
            }
            (Token::Ident("true"), ValueKind::Boolean) => Ok(Value::Boolean(true)),
            (Token::Ident("false"), ValueKind::Boolean) => Ok(Value::Boolean(false)),
            (Token::Str(_) | Token::Number(_) | Token::Ident("true" | "false"), _) => Err(mismatch()),
            _ => Err(AppError::malformed_filter("expected literal", text)),
        }
    }
}

pub struct FilterExpressionParser;

impl FilterExpressionParser {
    /// Absent or blank input means no filtering.
    pub fn parse(desc: &RecordTypeDescriptor, raw: Option<&str>) -> Result<Option<FilterExpression>, AppError> {
        let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
            return Ok(None);
        };
        let tokens = tokenize(raw)?;
        let mut parser = Parser {
            desc,
            raw,
            tokens,
            pos: 0,
            depth: 0,
        };
        let expr = parser.parse_or()?;
        if let Some(extra) = parser.peek() {
            let message = if extra.token == Token::RParen {
                "unbalanced parentheses"
            } else {
                "unexpected trailing input"
            };
            return Err(AppError::malformed_filter(message, &raw[extra.start..]));
        }
        tracing::debug!(entity = desc.name(), filter = %expr, "parsed filter");
        Ok(Some(expr))
    }
}
