//! # Inline Expressions
//!
//! Groovy-style `${...}` templates (also written `$->{...}`) used in two places:
//!
//! - sharding algorithms: `ds${user_id % 2}` evaluated with the column bound
//! - data node declarations: `ds${0..1}.t_order${0..1}` expanded into the
//!   cartesian product of every segment
//!
//! Supported expression syntax: integer/float/string literals, identifiers,
//! `+ - * / %`, unary minus, parentheses, ranges `a..b` and lists `[a, b]`.
//! Integer division truncates; `+` concatenates when either side is text.

use std::collections::BTreeSet;

use crate::domain::{DataNode, PhysicalTarget, ShardingError, SqlValue};

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Range,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Clone, Debug, PartialEq)]
enum Expr {
    Literal(SqlValue),
    Variable(String),
    Range(Box<Expr>, Box<Expr>),
    List(Vec<Expr>),
    Negate(Box<Expr>),
    Binary(Box<Expr>, BinaryOp, Box<Expr>),
}

#[derive(Clone, Debug, PartialEq)]
enum Segment {
    Text(String),
    Expr(Expr),
}

/// A parsed inline template.
#[derive(Clone, Debug, PartialEq)]
pub struct InlineExpression {
    source: String,
    segments: Vec<Segment>,
}

fn error(message: String) -> ShardingError {
    ShardingError::Expression(message)
}

impl InlineExpression {
    /// Parse a template.
    pub fn parse(source: &str) -> Result<Self, ShardingError> {
        let mut segments = Vec::new();
        let mut text = String::new();
        let mut rest = source;
        while !rest.is_empty() {
            let open = [rest.find("${").map(|i| (i, 2)), rest.find("$->{").map(|i| (i, 4))]
                .into_iter()
                .flatten()
                .min_by_key(|(i, _)| *i);
            let Some((start, marker_len)) = open else {
                text.push_str(rest);
                break;
            };
            text.push_str(&rest[..start]);
            let body_start = start + marker_len;
            let end = find_closing(&rest[body_start..])
                .ok_or_else(|| error(format!("unterminated `${{` in `{source}`")))?;
            if !text.is_empty() {
                segments.push(Segment::Text(std::mem::take(&mut text)));
            }
            let body = &rest[body_start..body_start + end];
            segments.push(Segment::Expr(ExprParser::new(tokenize(body)?).parse_all(body)?));
            rest = &rest[body_start + end + 1..];
        }
        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }
        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// Original template text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Identifiers referenced by the template (lowercase).
    pub fn variables(&self) -> BTreeSet<String> {
        fn walk(expr: &Expr, out: &mut BTreeSet<String>) {
            match expr {
                Expr::Literal(_) => {}
                Expr::Variable(name) => {
                    out.insert(name.to_ascii_lowercase());
                }
                Expr::Range(a, b) | Expr::Binary(a, _, b) => {
                    walk(a, out);
                    walk(b, out);
                }
                Expr::List(items) => items.iter().for_each(|item| walk(item, out)),
                Expr::Negate(inner) => walk(inner, out),
            }
        }
        let mut out = BTreeSet::new();
        for segment in &self.segments {
            if let Segment::Expr(expr) = segment {
                walk(expr, &mut out);
            }
        }
        out
    }

    /// Expand the template into every name it denotes.
    pub fn expand(&self) -> Result<Vec<String>, ShardingError> {
        self.render(&[])
    }

    /// Evaluate with bound variables; the template must denote exactly one name.
    pub fn evaluate(&self, bindings: &[(&str, &SqlValue)]) -> Result<String, ShardingError> {
        let mut names = self.render(bindings)?;
        match names.len() {
            1 => Ok(names.remove(0)),
            n => Err(error(format!(
                "`{}` produced {n} results where one was expected",
                self.source
            ))),
        }
    }

    fn render(&self, bindings: &[(&str, &SqlValue)]) -> Result<Vec<String>, ShardingError> {
        let mut results = vec![String::new()];
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => results.iter_mut().for_each(|r| r.push_str(text)),
                Segment::Expr(expr) => {
                    let values = eval(expr, bindings)?;
                    results = results
                        .iter()
                        .flat_map(|prefix| values.iter().map(move |v| format!("{prefix}{v}")))
                        .collect();
                }
            }
        }
        Ok(results)
    }
}

/// Expand a comma separated list of templates (`t_order${0..1}, t_order_item`).
pub fn expand_names(text: &str) -> Result<Vec<String>, ShardingError> {
    let mut names = Vec::new();
    for part in split_top_level(text) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        names.extend(InlineExpression::parse(part)?.expand()?);
    }
    Ok(names)
}

/// Expand `ds${0..1}.t_order${0..1}` style declarations into data nodes.
pub fn expand_data_nodes(text: &str) -> Result<Vec<DataNode>, ShardingError> {
    let mut nodes: Vec<DataNode> = Vec::new();
    for name in expand_names(text)? {
        let node = PhysicalTarget::parse(&name)?;
        if !nodes.contains(&node) {
            nodes.push(node);
        }
    }
    Ok(nodes)
}

fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

fn find_closing(body: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in body.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                '}' => return Some(i),
                _ => {}
            },
        }
    }
    None
}

fn tokenize(input: &str) -> Result<Vec<Token>, ShardingError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '0'..='9' => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let fractional =
                    i + 1 < chars.len() && chars[i] == '.' && chars[i + 1].is_ascii_digit();
                if fractional {
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                    let literal: String = chars[start..i].iter().collect();
                    let value = literal
                        .parse()
                        .map_err(|_| error(format!("bad number `{literal}`")))?;
                    tokens.push(Token::Float(value));
                } else {
                    let literal: String = chars[start..i].iter().collect();
                    let value = literal
                        .parse()
                        .map_err(|_| error(format!("number `{literal}` out of range")))?;
                    tokens.push(Token::Int(value));
                }
            }
            '\'' | '"' => {
                let start = i + 1;
                let end = chars[start..]
                    .iter()
                    .position(|ch| *ch == c)
                    .ok_or_else(|| error(format!("unterminated string in `{input}`")))?;
                tokens.push(Token::Str(chars[start..start + end].iter().collect()));
                i = start + end + 1;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            '.' if chars.get(i + 1) == Some(&'.') => {
                tokens.push(Token::Range);
                i += 2;
            }
            _ => {
                let token = match c {
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '/' => Token::Slash,
                    '%' => Token::Percent,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '[' => Token::LBracket,
                    ']' => Token::RBracket,
                    ',' => Token::Comma,
                    other => {
                        return Err(error(format!("unexpected `{other}` in `{input}`")));
                    }
                };
                tokens.push(token);
                i += 1;
            }
        }
    }
    Ok(tokens)
}

struct ExprParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl ExprParser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token, body: &str) -> Result<(), ShardingError> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            other => Err(error(format!(
                "expected {expected:?}, found {other:?} in `{body}`"
            ))),
        }
    }

    fn parse_all(mut self, body: &str) -> Result<Expr, ShardingError> {
        if self.tokens.is_empty() {
            return Err(error("empty `${}` expression".to_string()));
        }
        let expr = self.parse_range(body)?;
        match self.peek() {
            None => Ok(expr),
            Some(token) => Err(error(format!("unexpected {token:?} in `{body}`"))),
        }
    }

    fn parse_range(&mut self, body: &str) -> Result<Expr, ShardingError> {
        let start = self.parse_additive(body)?;
        if self.peek() == Some(&Token::Range) {
            self.pos += 1;
            let end = self.parse_additive(body)?;
            return Ok(Expr::Range(Box::new(start), Box::new(end)));
        }
        Ok(start)
    }

    fn parse_additive(&mut self, body: &str) -> Result<Expr, ShardingError> {
        let mut left = self.parse_multiplicative(body)?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_multiplicative(body)?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
    }

    fn parse_multiplicative(&mut self, body: &str) -> Result<Expr, ShardingError> {
        let mut left = self.parse_unary(body)?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_unary(body)?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
    }

    fn parse_unary(&mut self, body: &str) -> Result<Expr, ShardingError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(Expr::Negate(Box::new(self.parse_unary(body)?)))
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.parse_unary(body)
            }
            _ => self.parse_primary(body),
        }
    }

    fn parse_primary(&mut self, body: &str) -> Result<Expr, ShardingError> {
        match self.next() {
            Some(Token::Int(i)) => Ok(Expr::Literal(SqlValue::Int(i))),
            Some(Token::Float(f)) => Ok(Expr::Literal(SqlValue::Float(f))),
            Some(Token::Str(s)) => Ok(Expr::Literal(SqlValue::Text(s))),
            Some(Token::Ident(name)) => Ok(Expr::Variable(name)),
            Some(Token::LParen) => {
                let inner = self.parse_range(body)?;
                self.expect(Token::RParen, body)?;
                Ok(inner)
            }
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if self.peek() == Some(&Token::RBracket) {
                    self.pos += 1;
                    return Ok(Expr::List(items));
                }
                loop {
                    items.push(self.parse_range(body)?);
                    match self.next() {
                        Some(Token::Comma) => continue,
                        Some(Token::RBracket) => return Ok(Expr::List(items)),
                        other => {
                            return Err(error(format!(
                                "expected `,` or `]`, found {other:?} in `{body}`"
                            )))
                        }
                    }
                }
            }
            other => Err(error(format!("unexpected {other:?} in `{body}`"))),
        }
    }
}

fn eval(expr: &Expr, bindings: &[(&str, &SqlValue)]) -> Result<Vec<SqlValue>, ShardingError> {
    match expr {
        Expr::Literal(value) => Ok(vec![value.clone()]),
        Expr::Variable(name) => bindings
            .iter()
            .find(|(bound, _)| bound.eq_ignore_ascii_case(name))
            .map(|(_, value)| vec![(*value).clone()])
            .ok_or_else(|| error(format!("unbound variable `{name}`"))),
        Expr::Range(start, end) => {
            let (start, end) = (scalar_int(start, bindings)?, scalar_int(end, bindings)?);
            let values: Vec<SqlValue> = if start <= end {
                (start..=end).map(SqlValue::Int).collect()
            } else {
                (end..=start).rev().map(SqlValue::Int).collect()
            };
            Ok(values)
        }
        Expr::List(items) => {
            let mut values = Vec::new();
            for item in items {
                values.extend(eval(item, bindings)?);
            }
            Ok(values)
        }
        Expr::Negate(inner) => match scalar(inner, bindings)? {
            SqlValue::Int(i) => i
                .checked_neg()
                .map(|v| vec![SqlValue::Int(v)])
                .ok_or_else(|| error("integer overflow".to_string())),
            SqlValue::Float(f) => Ok(vec![SqlValue::Float(-f)]),
            other => Err(error(format!("cannot negate `{other}`"))),
        },
        Expr::Binary(left, op, right) => {
            let (left, right) = (scalar(left, bindings)?, scalar(right, bindings)?);
            apply(*op, &left, &right).map(|v| vec![v])
        }
    }
}

fn scalar(expr: &Expr, bindings: &[(&str, &SqlValue)]) -> Result<SqlValue, ShardingError> {
    let mut values = eval(expr, bindings)?;
    if values.len() != 1 {
        return Err(error(format!(
            "expected a single value, got {}",
            values.len()
        )));
    }
    Ok(values.remove(0))
}

fn scalar_int(expr: &Expr, bindings: &[(&str, &SqlValue)]) -> Result<i64, ShardingError> {
    let value = scalar(expr, bindings)?;
    value
        .as_i64()
        .ok_or_else(|| error(format!("range bound `{value}` is not an integer")))
}

fn apply(op: BinaryOp, left: &SqlValue, right: &SqlValue) -> Result<SqlValue, ShardingError> {
    if left.is_null() || right.is_null() {
        return Err(error("NULL cannot be used in an inline expression".to_string()));
    }
    if op == BinaryOp::Add
        && (matches!(left, SqlValue::Text(_)) || matches!(right, SqlValue::Text(_)))
    {
        return Ok(SqlValue::Text(format!("{left}{right}")));
    }
    match (left, right) {
        (SqlValue::Int(a), SqlValue::Int(b)) => {
            let (a, b) = (*a, *b);
            if matches!(op, BinaryOp::Div | BinaryOp::Rem) && b == 0 {
                return Err(error("division by zero".to_string()));
            }
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div => a.checked_div(b),
                BinaryOp::Rem => a.checked_rem(b),
            };
            result
                .map(SqlValue::Int)
                .ok_or_else(|| error("integer overflow".to_string()))
        }
        _ => {
            let (a, b) = match (left.as_f64(), right.as_f64()) {
                (Some(a), Some(b)) => (a, b),
                _ => {
                    return Err(error(format!(
                        "cannot apply {op:?} to `{left}` and `{right}`"
                    )))
                }
            };
            let result = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                BinaryOp::Rem => a % b,
            };
            Ok(SqlValue::Float(result))
        }
    }
}
