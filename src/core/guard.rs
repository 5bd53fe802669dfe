//! Authorization guards
//!
//! A guard is a small boolean expression evaluated against the request's
//! claims and the field's arguments, for example
//!
//! ```text
//! jwt.role == "admin" || args.where.owner.eq == jwt.sub
//! ```
//!
//! Expressions are parsed once when the server host is built; evaluating a
//! parsed guard never fails; anything that cannot be compared is simply not
//! truthy.

use crate::core::claims::Claims;
use crate::core::error::ConfigError;
use crate::core::filter::{compare_values, values_equal};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;
use thiserror::Error;

/// A permission rule as written in the configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthGuard {
    pub expression: String,
}

impl AuthGuard {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },

    #[error("unterminated string starting at offset {offset}")]
    UnterminatedString { offset: usize },

    #[error("invalid number '{text}'")]
    InvalidNumber { text: String },

    #[error("unexpected {found} at offset {offset}")]
    UnexpectedToken { found: String, offset: usize },

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unknown reference '{name}', expected jwt, claims or args")]
    UnknownReference { name: String },

    #[error("empty expression")]
    Empty,
}

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(Number),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Comma,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Bang,
    AndAnd,
    OrOr,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Ident(name) => format!("'{}'", name),
            Token::Str(s) => format!("string \"{}\"", s),
            Token::Num(n) => format!("number {}", n),
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
            Token::LBracket => "'['".to_string(),
            Token::RBracket => "']'".to_string(),
            Token::Dot => "'.'".to_string(),
            Token::Comma => "','".to_string(),
            Token::EqEq => "'=='".to_string(),
            Token::NotEq => "'!='".to_string(),
            Token::Lt => "'<'".to_string(),
            Token::Le => "'<='".to_string(),
            Token::Gt => "'>'".to_string(),
            Token::Ge => "'>='".to_string(),
            Token::Bang => "'!'".to_string(),
            Token::AndAnd => "'&&'".to_string(),
            Token::OrOr => "'||'".to_string(),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, ExpressionError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, ch) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);

        if ch.is_whitespace() {
            i += 1;
            continue;
        }

        let two = |token| (token, 2);
        let (token, width) = match (ch, next) {
            ('=', Some('=')) => two(Token::EqEq),
            ('!', Some('=')) => two(Token::NotEq),
            ('<', Some('=')) => two(Token::Le),
            ('>', Some('=')) => two(Token::Ge),
            ('&', Some('&')) => two(Token::AndAnd),
            ('|', Some('|')) => two(Token::OrOr),
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            ('!', _) => (Token::Bang, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('[', _) => (Token::LBracket, 1),
            (']', _) => (Token::RBracket, 1),
            ('.', _) => (Token::Dot, 1),
            (',', _) => (Token::Comma, 1),
            ('"' | '\'', _) => {
                let mut value = String::new();
                let mut j = i + 1;
                loop {
                    let Some(&(_, c)) = chars.get(j) else {
                        return Err(ExpressionError::UnterminatedString { offset });
                    };
                    match c {
                        '\\' => {
                            if let Some(&(_, escaped)) = chars.get(j + 1) {
                                value.push(escaped);
                            }
                            j += 2;
                        }
                        c if c == ch => break,
                        c => {
                            value.push(c);
                            j += 1;
                        }
                    }
                }
                (Token::Str(value), j + 1 - i)
            }
            (c, _) if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let mut j = i + 1;
                while chars
                    .get(j)
                    .is_some_and(|(_, c)| c.is_ascii_digit() || *c == '.' || *c == 'e' || *c == 'E')
                {
                    j += 1;
                }
                let end = chars.get(j).map_or(source.len(), |(o, _)| *o);
                let text = &source[offset..end];
                (parse_number(text)?, j - i)
            }
            (c, _) if c.is_alphabetic() || c == '_' => {
                let mut j = i + 1;
                while chars
                    .get(j)
                    .is_some_and(|(_, c)| c.is_alphanumeric() || *c == '_')
                {
                    j += 1;
                }
                let end = chars.get(j).map_or(source.len(), |(o, _)| *o);
                (Token::Ident(source[offset..end].to_string()), j - i)
            }
            (c, _) => return Err(ExpressionError::UnexpectedChar { ch: c, offset }),
        };

        tokens.push((token, offset));
        i += width;
    }

    Ok(tokens)
}

fn parse_number(text: &str) -> Result<Token, ExpressionError> {
    let invalid = || ExpressionError::InvalidNumber {
        text: text.to_string(),
    };
    if let Ok(n) = text.parse::<i64>() {
        return Ok(Token::Num(n.into()));
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Token::Num)
        .ok_or_else(invalid)
}

// ============================================================================
// Syntax tree
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Root {
    Claims,
    Args,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    List(Vec<Expr>),
    Path(Root, Vec<Segment>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        self.pos += 1;
        token
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(name)) if name == keyword)
    }

    fn unexpected(&self) -> ExpressionError {
        match self.tokens.get(self.pos) {
            Some((token, offset)) => ExpressionError::UnexpectedToken {
                found: token.describe(),
                offset: *offset,
            },
            None => ExpressionError::UnexpectedEnd,
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ExpressionError> {
        if self.peek() == Some(expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn parse(mut self) -> Result<Expr, ExpressionError> {
        if self.tokens.is_empty() {
            return Err(ExpressionError::Empty);
        }
        let expr = self.or()?;
        if self.pos < self.tokens.len() {
            return Err(self.unexpected());
        }
        Ok(expr)
    }

    fn or(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.and()?;
        while self.peek() == Some(&Token::OrOr) || self.is_keyword("or") {
            self.pos += 1;
            let right = self.and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.unary()?;
        while self.peek() == Some(&Token::AndAnd) || self.is_keyword("and") {
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.peek() == Some(&Token::Bang) || self.is_keyword("not") {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ExpressionError> {
        let left = self.primary()?;
        let op = match self.peek() {
            Some(Token::EqEq) => CompareOp::Eq,
            Some(Token::NotEq) => CompareOp::Ne,
            Some(Token::Lt) => CompareOp::Lt,
            Some(Token::Le) => CompareOp::Le,
            Some(Token::Gt) => CompareOp::Gt,
            Some(Token::Ge) => CompareOp::Ge,
            Some(Token::Ident(name)) if name == "in" => CompareOp::In,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.primary()?;
        Ok(Expr::Compare(op, Box::new(left), Box::new(right)))
    }

    fn primary(&mut self) -> Result<Expr, ExpressionError> {
        let Some(token) = self.peek().cloned() else {
            return Err(ExpressionError::UnexpectedEnd);
        };
        match token {
            Token::LParen => {
                self.pos += 1;
                let inner = self.or()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => {
                self.pos += 1;
                let mut items = Vec::new();
                if self.peek() != Some(&Token::RBracket) {
                    loop {
                        items.push(self.or()?);
                        if self.peek() == Some(&Token::Comma) {
                            self.pos += 1;
                        } else {
                            break;
                        }
                    }
                }
                self.expect(&Token::RBracket)?;
                Ok(Expr::List(items))
            }
            Token::Str(s) => {
                self.pos += 1;
                Ok(Expr::Literal(Value::String(s)))
            }
            Token::Num(n) => {
                self.pos += 1;
                Ok(Expr::Literal(Value::Number(n)))
            }
            Token::Ident(name) => match name.as_str() {
                "true" => {
                    self.pos += 1;
                    Ok(Expr::Literal(Value::Bool(true)))
                }
                "false" => {
                    self.pos += 1;
                    Ok(Expr::Literal(Value::Bool(false)))
                }
                "null" => {
                    self.pos += 1;
                    Ok(Expr::Literal(Value::Null))
                }
                "jwt" | "claims" => {
                    self.pos += 1;
                    Ok(Expr::Path(Root::Claims, self.segments()?))
                }
                "args" => {
                    self.pos += 1;
                    Ok(Expr::Path(Root::Args, self.segments()?))
                }
                "and" | "or" | "not" | "in" => Err(self.unexpected()),
                _ => Err(ExpressionError::UnknownReference { name }),
            },
            _ => Err(self.unexpected()),
        }
    }

    fn segments(&mut self) -> Result<Vec<Segment>, ExpressionError> {
        let mut segments = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    match self.advance() {
                        Some(Token::Ident(key)) => segments.push(Segment::Key(key)),
                        _ => {
                            self.pos -= 1;
                            return Err(self.unexpected());
                        }
                    }
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    match self.advance() {
                        Some(Token::Str(key)) => segments.push(Segment::Key(key)),
                        Some(Token::Num(n)) if n.as_u64().is_some() => {
                            segments.push(Segment::Index(n.as_u64().unwrap_or_default() as usize))
                        }
                        _ => {
                            self.pos -= 1;
                            return Err(self.unexpected());
                        }
                    }
                    self.expect(&Token::RBracket)?;
                }
                _ => return Ok(segments),
            }
        }
    }
}

// ============================================================================
// Evaluation
// ============================================================================

/// JSON truthiness: null, false, 0, "", [] and {} are false
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

struct Scope<'a> {
    claims: &'a Map<String, Value>,
    args: &'a Map<String, Value>,
}

fn lookup(root: &Map<String, Value>, segments: &[Segment]) -> Value {
    let Some((first, rest)) = segments.split_first() else {
        return Value::Object(root.clone());
    };
    let mut current = match first {
        Segment::Key(key) => root.get(key),
        Segment::Index(_) => None,
    };
    for segment in rest {
        current = match (segment, current) {
            (Segment::Key(key), Some(Value::Object(map))) => map.get(key),
            (Segment::Index(i), Some(Value::Array(items))) => items.get(*i),
            _ => None,
        };
    }
    current.cloned().unwrap_or(Value::Null)
}

impl Expr {
    fn eval(&self, scope: &Scope<'_>) -> Value {
        match self {
            Expr::Literal(value) => value.clone(),
            Expr::List(items) => Value::Array(items.iter().map(|e| e.eval(scope)).collect()),
            Expr::Path(Root::Claims, segments) => lookup(scope.claims, segments),
            Expr::Path(Root::Args, segments) => lookup(scope.args, segments),
            Expr::Not(inner) => Value::Bool(!truthy(&inner.eval(scope))),
            Expr::And(left, right) => {
                Value::Bool(truthy(&left.eval(scope)) && truthy(&right.eval(scope)))
            }
            Expr::Or(left, right) => {
                Value::Bool(truthy(&left.eval(scope)) || truthy(&right.eval(scope)))
            }
            Expr::Compare(op, left, right) => {
                let (left, right) = (left.eval(scope), right.eval(scope));
                Value::Bool(compare(*op, &left, &right))
            }
        }
    }
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> bool {
    match op {
        CompareOp::Eq => values_equal(left, right),
        CompareOp::Ne => !values_equal(left, right),
        CompareOp::Lt => compare_values(left, right) == Some(Ordering::Less),
        CompareOp::Le => matches!(
            compare_values(left, right),
            Some(Ordering::Less | Ordering::Equal)
        ),
        CompareOp::Gt => compare_values(left, right) == Some(Ordering::Greater),
        CompareOp::Ge => matches!(
            compare_values(left, right),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        CompareOp::In => match (left, right) {
            (_, Value::Array(items)) => items.iter().any(|item| values_equal(left, item)),
            (Value::String(needle), Value::String(haystack)) => haystack.contains(needle.as_str()),
            (Value::String(key), Value::Object(map)) => map.contains_key(key),
            _ => false,
        },
    }
}

/// A parsed guard expression
#[derive(Debug, Clone, PartialEq)]
pub struct Guard {
    source: String,
    expr: Expr,
}

impl Guard {
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let expr = Parser {
            tokens: tokenize(source)?,
            pos: 0,
        }
        .parse()?;
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn allows(&self, claims: &Claims, args: &Map<String, Value>) -> bool {
        let scope = Scope {
            claims: claims.as_map(),
            args,
        };
        truthy(&self.expr.eval(&scope))
    }
}

/// The guards of one type, all of which must allow
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuardSet {
    guards: Vec<Guard>,
}

impl GuardSet {
    /// Parse the configured guards of `type_name`
    pub fn compile(type_name: &str, rules: &[AuthGuard]) -> Result<Self, ConfigError> {
        let guards = rules
            .iter()
            .map(|rule| {
                Guard::parse(&rule.expression).map_err(|e| ConfigError::InvalidGuard {
                    type_name: type_name.to_string(),
                    expression: rule.expression.clone(),
                    message: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { guards })
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    pub fn len(&self) -> usize {
        self.guards.len()
    }

    /// First guard that denies the request, if any
    pub fn denying(&self, claims: &Claims, args: &Map<String, Value>) -> Option<&Guard> {
        self.guards.iter().find(|guard| !guard.allows(claims, args))
    }

    pub fn evaluate(&self, claims: &Claims, args: &Map<String, Value>) -> bool {
        self.denying(claims, args).is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims(value: Value) -> Claims {
        Claims::from(value)
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn eval(source: &str, c: Value, a: Value) -> bool {
        Guard::parse(source)
            .expect("expression should parse")
            .allows(&claims(c), &args(a))
    }

    #[test]
    fn test_literals() {
        assert!(eval("true", json!({}), json!({})));
        assert!(!eval("false", json!({}), json!({})));
        assert!(!eval("null", json!({}), json!({})));
        assert!(!eval("0", json!({}), json!({})));
        assert!(eval("'x'", json!({}), json!({})));
        assert!(!eval("\"\"", json!({}), json!({})));
        assert!(!eval("[]", json!({}), json!({})));
    }

    #[test]
    fn test_claim_equality() {
        let source = "jwt.role == 'admin'";
        assert!(eval(source, json!({"role": "admin"}), json!({})));
        assert!(!eval(source, json!({"role": "user"}), json!({})));
        assert!(!eval(source, json!({}), json!({})));
    }

    #[test]
    fn test_claims_alias_and_nested_paths() {
        let c = json!({"org": {"ids": ["a", "b"]}});
        assert!(eval("claims.org.ids[1] == \"b\"", c.clone(), json!({})));
        assert!(eval("jwt[\"org\"][\"ids\"][0] == 'a'", c, json!({})));
    }

    #[test]
    fn test_args_reference() {
        let a = json!({"where": {"owner": {"eq": "u1"}}});
        assert!(eval("args.where.owner.eq == jwt.sub", json!({"sub": "u1"}), a.clone()));
        assert!(!eval("args.where.owner.eq == jwt.sub", json!({"sub": "u2"}), a));
    }

    #[test]
    fn test_missing_path_is_null() {
        assert!(eval("jwt.missing.deep == null", json!({}), json!({})));
        assert!(eval("!jwt.missing", json!({}), json!({})));
    }

    #[test]
    fn test_ordering_and_membership() {
        let c = json!({"level": 3, "role": "editor"});
        assert!(eval("jwt.level >= 3", c.clone(), json!({})));
        assert!(!eval("jwt.level > 3", c.clone(), json!({})));
        assert!(eval("jwt.level < 3.5", c.clone(), json!({})));
        assert!(eval("jwt.role in ['admin', 'editor']", c.clone(), json!({})));
        assert!(!eval("jwt.role in ['admin']", c, json!({})));
    }

    #[test]
    fn test_combinators_and_precedence() {
        let c = json!({"a": true, "b": false});
        assert!(eval("jwt.a || jwt.b && false", c.clone(), json!({})));
        assert!(!eval("(jwt.a || jwt.b) && false", c.clone(), json!({})));
        assert!(eval("not jwt.b and jwt.a", c.clone(), json!({})));
        assert!(eval("jwt.b or !jwt.b", c, json!({})));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Guard::parse("  "), Err(ExpressionError::Empty));
        assert!(matches!(
            Guard::parse("jwt.role =="),
            Err(ExpressionError::UnexpectedEnd)
        ));
        assert!(matches!(
            Guard::parse("user.role"),
            Err(ExpressionError::UnknownReference { .. })
        ));
        assert!(matches!(
            Guard::parse("'open"),
            Err(ExpressionError::UnterminatedString { .. })
        ));
        assert!(matches!(
            Guard::parse("jwt.role = 'x'"),
            Err(ExpressionError::UnexpectedChar { ch: '=', .. })
        ));
        assert!(matches!(
            Guard::parse("true true"),
            Err(ExpressionError::UnexpectedToken { .. })
        ));
    }

    #[test]
    fn test_guard_set_requires_all() {
        let set = GuardSet::compile(
            "User",
            &[AuthGuard::new("jwt.role == 'admin'"), AuthGuard::new("jwt.active")],
        )
        .expect("guards should compile");

        assert_eq!(set.len(), 2);
        assert!(set.evaluate(&claims(json!({"role": "admin", "active": true})), &Map::new()));
        let denied = claims(json!({"role": "admin", "active": false}));
        assert_eq!(
            set.denying(&denied, &Map::new()).map(Guard::source),
            Some("jwt.active")
        );
    }

    #[test]
    fn test_empty_guard_set_allows() {
        let set = GuardSet::compile("User", &[]).expect("compile");
        assert!(set.is_empty());
        assert!(set.evaluate(&Claims::default(), &Map::new()));
    }

    #[test]
    fn test_guard_set_reports_config_error() {
        let err = GuardSet::compile("User", &[AuthGuard::new("jwt.role ==")]).expect_err("bad");
        match err {
            ConfigError::InvalidGuard {
                type_name,
                expression,
                ..
            } => {
                assert_eq!(type_name, "User");
                assert_eq!(expression, "jwt.role ==");
            }
            other => panic!("Expected InvalidGuard, got {:?}", other),
        }
    }
}
