// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 NoETL Contributors

//! A small recursive-descent expression language for policy conditions and
//! `set_iter`/`set_ctx` values (§4.4 `eval_bool`, `eval_value`).
//!
//! Grammar (lowest to highest precedence):
//! ```text
//! expr    := or
//! or      := and ( "||" and )*
//! and     := not ( "&&" not )*
//! not     := "!" not | cmp
//! cmp     := member ( ("==" | "!=" | "<" | "<=" | ">" | ">=" | "in") member )?
//! member  := atom
//! atom    := NUMBER | STRING | "true" | "false" | "null"
//!          | "[" (expr ("," expr)*)? "]"
//!          | "(" expr ")"
//!          | PATH
//! PATH    := IDENT ( "." IDENT | "[" NUMBER "]" )*
//! ```
//!
//! A bare PATH (`workload.name`) resolves against the scope object passed to
//! [`eval`]; anything else is a literal.

use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Lit(Value),
    Path(Vec<PathSegment>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Cmp(Box<Expr>, CmpOp, Box<Expr>),
    Array(Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExprError {
    #[error("unexpected character {0:?} at position {1}")]
    UnexpectedChar(char, usize),
    #[error("unexpected end of expression")]
    UnexpectedEof,
    #[error("unexpected token {0:?}")]
    UnexpectedToken(String),
    #[error("unresolved variable path {0:?}")]
    UnresolvedPath(String),
    #[error("unsupported comparison between {0} and {1}")]
    IncomparableTypes(String, String),
    #[error("`in` right-hand side must be an array, got {0}")]
    InRhsNotArray(String),
}

pub fn parse(src: &str) -> Result<Expr, ExprError> {
    let tokens = lex(src)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(ExprError::UnexpectedToken(format!("{:?}", parser.tokens[parser.pos])));
    }
    Ok(expr)
}

/// Evaluate a parsed expression against a JSON scope object. Unresolved
/// paths are a hard error (§9 design note): they never silently
/// stringify to an empty/null value.
pub fn eval(expr: &Expr, scope: &Value) -> Result<Value, ExprError> {
    match expr {
        Expr::Lit(v) => Ok(v.clone()),
        Expr::Path(segments) => resolve_path(scope, segments),
        Expr::Not(inner) => Ok(Value::Bool(!truthy(&eval(inner, scope)?))),
        Expr::And(a, b) => {
            let lhs = truthy(&eval(a, scope)?);
            if !lhs {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(truthy(&eval(b, scope)?)))
        }
        Expr::Or(a, b) => {
            let lhs = truthy(&eval(a, scope)?);
            if lhs {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(truthy(&eval(b, scope)?)))
        }
        Expr::Cmp(a, op, b) => {
            let lhs = eval(a, scope)?;
            let rhs = eval(b, scope)?;
            eval_cmp(&lhs, *op, &rhs)
        }
        Expr::Array(items) => {
            let values = items.iter().map(|e| eval(e, scope)).collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Array(values))
        }
    }
}

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn resolve_path(scope: &Value, segments: &[PathSegment]) -> Result<Value, ExprError> {
    let mut current = scope;
    for segment in segments {
        current = match (segment, current) {
            (PathSegment::Field(name), Value::Object(map)) => {
                map.get(name).ok_or_else(|| ExprError::UnresolvedPath(render_path(segments)))?
            }
            (PathSegment::Index(idx), Value::Array(items)) => {
                items.get(*idx).ok_or_else(|| ExprError::UnresolvedPath(render_path(segments)))?
            }
            _ => return Err(ExprError::UnresolvedPath(render_path(segments))),
        };
    }
    Ok(current.clone())
}

fn render_path(segments: &[PathSegment]) -> String {
    let mut out = String::new();
    for (i, seg) in segments.iter().enumerate() {
        match seg {
            PathSegment::Field(name) => {
                if i > 0 {
                    out.push('.');
                }
                out.push_str(name);
            }
            PathSegment::Index(idx) => out.push_str(&format!("[{idx}]")),
        }
    }
    out
}

fn eval_cmp(lhs: &Value, op: CmpOp, rhs: &Value) -> Result<Value, ExprError> {
    if op == CmpOp::In {
        let Value::Array(items) = rhs else {
            return Err(ExprError::InRhsNotArray(type_name(rhs)));
        };
        return Ok(Value::Bool(items.iter().any(|item| values_eq(item, lhs))));
    }
    if op == CmpOp::Eq {
        return Ok(Value::Bool(values_eq(lhs, rhs)));
    }
    if op == CmpOp::Ne {
        return Ok(Value::Bool(!values_eq(lhs, rhs)));
    }
    let ordering = match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a.as_f64().unwrap_or(f64::NAN).partial_cmp(&b.as_f64().unwrap_or(f64::NAN)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => return Err(ExprError::IncomparableTypes(type_name(lhs), type_name(rhs))),
    };
    let Some(ordering) = ordering else {
        return Err(ExprError::IncomparableTypes(type_name(lhs), type_name(rhs)));
    };
    use std::cmp::Ordering::*;
    let result = match op {
        CmpOp::Lt => ordering == Less,
        CmpOp::Le => ordering != Greater,
        CmpOp::Gt => ordering == Greater,
        CmpOp::Ge => ordering != Less,
        CmpOp::Eq | CmpOp::Ne | CmpOp::In => unreachable!("handled above"),
    };
    Ok(Value::Bool(result))
}

fn values_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => a == b,
    }
}

fn type_name(value: &Value) -> String {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
    .to_string()
}

// --- Lexer ---

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    Dot,
    Comma,
    LBracket,
    RBracket,
    LParen,
    RParen,
    AndAnd,
    OrOr,
    Bang,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    In,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

fn lex(src: &str) -> Result<Vec<Token>, ExprError> {
    let chars: Vec<char> = src.chars().collect();
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
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
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
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::NotEq);
                    i += 2;
                } else {
                    tokens.push(Token::Bang);
                    i += 1;
                }
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::EqEq);
                    i += 2;
                } else {
                    return Err(ExprError::UnexpectedChar(c, i));
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Token::AndAnd);
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token::OrOr);
                i += 2;
            }
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(ExprError::UnexpectedEof),
                        Some(ch) if *ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            s.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while chars.get(i).is_some_and(|c| c.is_ascii_digit() || *c == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n: f64 = text.parse().map_err(|_| ExprError::UnexpectedChar(c, start))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                i += 1;
                while chars.get(i).is_some_and(|c| c.is_alphanumeric() || *c == '_' || *c == '-') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(match text.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    "in" => Token::In,
                    _ => Token::Ident(text),
                });
            }
            other => return Err(ExprError::UnexpectedChar(other, i)),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expect(&mut self, want: &Token) -> Result<(), ExprError> {
        match self.bump() {
            Some(t) if &t == want => Ok(()),
            Some(t) => Err(ExprError::UnexpectedToken(format!("{:?}", t))),
            None => Err(ExprError::UnexpectedEof),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Some(Token::OrOr)) {
            self.bump();
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_not()?;
        while matches!(self.peek(), Some(Token::AndAnd)) {
            self.bump();
            let rhs = self.parse_not()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, ExprError> {
        if matches!(self.peek(), Some(Token::Bang)) {
            self.bump();
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_cmp()
    }

    fn parse_cmp(&mut self) -> Result<Expr, ExprError> {
        let lhs = self.parse_atom()?;
        let op = match self.peek() {
            Some(Token::EqEq) => CmpOp::Eq,
            Some(Token::NotEq) => CmpOp::Ne,
            Some(Token::Lt) => CmpOp::Lt,
            Some(Token::Le) => CmpOp::Le,
            Some(Token::Gt) => CmpOp::Gt,
            Some(Token::Ge) => CmpOp::Ge,
            Some(Token::In) => CmpOp::In,
            _ => return Ok(lhs),
        };
        self.bump();
        let rhs = self.parse_atom()?;
        Ok(Expr::Cmp(Box::new(lhs), op, Box::new(rhs)))
    }

    fn parse_atom(&mut self) -> Result<Expr, ExprError> {
        match self.bump().ok_or(ExprError::UnexpectedEof)? {
            Token::Number(n) => Ok(Expr::Lit(serde_json::json!(n))),
            Token::Str(s) => Ok(Expr::Lit(Value::String(s))),
            Token::True => Ok(Expr::Lit(Value::Bool(true))),
            Token::False => Ok(Expr::Lit(Value::Bool(false))),
            Token::Null => Ok(Expr::Lit(Value::Null)),
            Token::LParen => {
                let inner = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => {
                let mut items = Vec::new();
                if !matches!(self.peek(), Some(Token::RBracket)) {
                    items.push(self.parse_or()?);
                    while matches!(self.peek(), Some(Token::Comma)) {
                        self.bump();
                        items.push(self.parse_or()?);
                    }
                }
                self.expect(&Token::RBracket)?;
                Ok(Expr::Array(items))
            }
            Token::Ident(name) => {
                let mut segments = vec![PathSegment::Field(name)];
                loop {
                    match self.peek() {
                        Some(Token::Dot) => {
                            self.bump();
                            match self.bump() {
                                Some(Token::Ident(name)) => segments.push(PathSegment::Field(name)),
                                Some(t) => return Err(ExprError::UnexpectedToken(format!("{:?}", t))),
                                None => return Err(ExprError::UnexpectedEof),
                            }
                        }
                        Some(Token::LBracket) => {
                            self.bump();
                            match self.bump() {
                                Some(Token::Number(n)) => segments.push(PathSegment::Index(n as usize)),
                                Some(t) => return Err(ExprError::UnexpectedToken(format!("{:?}", t))),
                                None => return Err(ExprError::UnexpectedEof),
                            }
                            self.expect(&Token::RBracket)?;
                        }
                        _ => break,
                    }
                }
                Ok(Expr::Path(segments))
            }
            t => Err(ExprError::UnexpectedToken(format!("{:?}", t))),
        }
    }
}
