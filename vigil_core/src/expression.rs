//! Small expression language used by `AuditContext::evaluate` and policies
//! that carry boolean conditions.
//!
//! Supported syntax:
//! - literals: `12`, `1.5`, `'text'`, `"text"`, `true`, `false`, `null`, `[1, 'a']`
//! - paths: `parameters.module`, `target.drupal.version`, `modules.0`
//! - unary: `not x`, `!x`, `-x`
//! - arithmetic: `* / %`, then `+ -` and `~` (string concatenation)
//! - comparison: `== != < <= > >=`, `in`, `not in`, `matches` (regex)
//! - logic: `and` / `&&`, `or` / `||`, short-circuiting
//!
//! Unknown paths evaluate to `null`.

use regex::Regex;
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("unexpected character `{found}` at offset {offset}")]
    UnexpectedChar { found: char, offset: usize },

    #[error("unterminated string starting at offset {0}")]
    UnterminatedString(usize),

    #[error("unexpected {found}, expected {expected}")]
    UnexpectedToken {
        found: String,
        expected: &'static str,
    },

    #[error("cannot apply `{op}` to {left} and {right}")]
    TypeMismatch {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("invalid regular expression `{pattern}`: {message}")]
    InvalidRegex { pattern: String, message: String },
}

type Result<T> = std::result::Result<T, ExpressionError>;

/// Parses and evaluates `expression` against `context`.
pub fn evaluate(expression: &str, context: &Map<String, Value>) -> Result<Value> {
    let tokens = tokenize(expression)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expr(0)?;
    parser.expect_end()?;
    eval(&expr, context)
}

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

// ========== LEXER ==========

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Number(n) => format!("number {}", n),
            Token::Str(s) => format!("string '{}'", s),
            Token::Ident(name) => format!("`{}`", name),
            Token::Op(op) => format!("`{}`", op),
            Token::LParen => "`(`".to_string(),
            Token::RParen => "`)`".to_string(),
            Token::LBracket => "`[`".to_string(),
            Token::RBracket => "`]`".to_string(),
            Token::Comma => "`,`".to_string(),
            Token::Dot => "`.`".to_string(),
        }
    }
}

const OPERATORS: [&str; 15] = [
    "==", "!=", "<=", ">=", "&&", "||", "<", ">", "!", "+", "-", "*", "/", "%", "~",
];

fn tokenize(input: &str) -> Result<Vec<Token>> {
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
            '(' => tokens.push(Token::LParen),
            ')' => tokens.push(Token::RParen),
            '[' => tokens.push(Token::LBracket),
            ']' => tokens.push(Token::RBracket),
            ',' => tokens.push(Token::Comma),
            '.' => tokens.push(Token::Dot),
            '\'' | '"' => {
                let start = i;
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(ExpressionError::UnterminatedString(start)),
                        Some('\\') if i + 1 < chars.len() => {
                            text.push(chars[i + 1]);
                            i += 2;
                        }
                        Some(&ch) if ch == c => break,
                        Some(&ch) => {
                            text.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(text));
            }
            d if d.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                if i + 1 < chars.len() && chars[i] == '.' && chars[i + 1].is_ascii_digit() {
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let number = text.parse::<f64>().map_err(|_| ExpressionError::UnexpectedChar {
                    found: d,
                    offset: start,
                })?;
                tokens.push(Token::Number(number));
                continue;
            }
            a if a.is_alphabetic() || a == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
                continue;
            }
            _ => {
                let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
                let op = OPERATORS
                    .iter()
                    .find(|op| rest.starts_with(*op))
                    .ok_or(ExpressionError::UnexpectedChar {
                        found: c,
                        offset: i,
                    })?;
                tokens.push(Token::Op(*op));
                i += op.len();
                continue;
            }
        }
        i += 1;
    }

    Ok(tokens)
}

// ========== PARSER ==========

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Matches,
    Add,
    Sub,
    Concat,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Or => "or",
            BinaryOp::And => "and",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::In => "in",
            BinaryOp::NotIn => "not in",
            BinaryOp::Matches => "matches",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Concat => "~",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge
            | BinaryOp::In
            | BinaryOp::NotIn
            | BinaryOp::Matches => 3,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Concat => 4,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Path(Vec<String>),
    Array(Vec<Expr>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, wanted: Token, expected: &'static str) -> Result<()> {
        match self.next() {
            Some(token) if token == wanted => Ok(()),
            Some(token) => Err(ExpressionError::UnexpectedToken {
                found: token.describe(),
                expected,
            }),
            None => Err(ExpressionError::UnexpectedToken {
                found: "end of expression".to_string(),
                expected,
            }),
        }
    }

    fn expect_end(&self) -> Result<()> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(ExpressionError::UnexpectedToken {
                found: token.describe(),
                expected: "end of expression",
            }),
        }
    }

    /// Binary operator at the cursor and how many tokens it spans.
    fn peek_binary(&self) -> Option<(BinaryOp, usize)> {
        let op = match self.peek()? {
            Token::Op("||") => BinaryOp::Or,
            Token::Op("&&") => BinaryOp::And,
            Token::Op("==") => BinaryOp::Eq,
            Token::Op("!=") => BinaryOp::Ne,
            Token::Op("<") => BinaryOp::Lt,
            Token::Op("<=") => BinaryOp::Le,
            Token::Op(">") => BinaryOp::Gt,
            Token::Op(">=") => BinaryOp::Ge,
            Token::Op("+") => BinaryOp::Add,
            Token::Op("-") => BinaryOp::Sub,
            Token::Op("~") => BinaryOp::Concat,
            Token::Op("*") => BinaryOp::Mul,
            Token::Op("/") => BinaryOp::Div,
            Token::Op("%") => BinaryOp::Rem,
            Token::Ident(word) => match word.as_str() {
                "or" => BinaryOp::Or,
                "and" => BinaryOp::And,
                "in" => BinaryOp::In,
                "matches" => BinaryOp::Matches,
                "not" => match self.tokens.get(self.pos + 1) {
                    Some(Token::Ident(next)) if next == "in" => return Some((BinaryOp::NotIn, 2)),
                    _ => return None,
                },
                _ => return None,
            },
            _ => return None,
        };
        Some((op, 1))
    }

    fn parse_expr(&mut self, min_precedence: u8) -> Result<Expr> {
        let mut left = self.parse_unary()?;

        while let Some((op, width)) = self.peek_binary() {
            if op.precedence() < min_precedence {
                break;
            }
            self.pos += width;
            let right = self.parse_expr(op.precedence() + 1)?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::Op("!")) => {
                self.pos += 1;
                Ok(Expr::Not(Box::new(self.parse_unary()?)))
            }
            Some(Token::Ident(word)) if word == "not" => {
                self.pos += 1;
                Ok(Expr::Not(Box::new(self.parse_unary()?)))
            }
            Some(Token::Op("-")) => {
                self.pos += 1;
                Ok(Expr::Neg(Box::new(self.parse_unary()?)))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Literal(number(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Ident(word)) => match word.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                _ => self.parse_path(word),
            },
            Some(Token::LParen) => {
                let inner = self.parse_expr(0)?;
                self.expect(Token::RParen, "`)`")?;
                Ok(inner)
            }
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if self.peek() == Some(&Token::RBracket) {
                    self.pos += 1;
                    return Ok(Expr::Array(items));
                }
                loop {
                    items.push(self.parse_expr(0)?);
                    match self.next() {
                        Some(Token::Comma) => continue,
                        Some(Token::RBracket) => break,
                        Some(token) => {
                            return Err(ExpressionError::UnexpectedToken {
                                found: token.describe(),
                                expected: "`,` or `]`",
                            })
                        }
                        None => {
                            return Err(ExpressionError::UnexpectedToken {
                                found: "end of expression".to_string(),
                                expected: "`]`",
                            })
                        }
                    }
                }
                Ok(Expr::Array(items))
            }
            Some(token) => Err(ExpressionError::UnexpectedToken {
                found: token.describe(),
                expected: "a value",
            }),
            None => Err(ExpressionError::UnexpectedToken {
                found: "end of expression".to_string(),
                expected: "a value",
            }),
        }
    }

    fn parse_path(&mut self, first: String) -> Result<Expr> {
        let mut segments = vec![first];
        while self.peek() == Some(&Token::Dot) {
            self.pos += 1;
            match self.next() {
                Some(Token::Ident(name)) => segments.push(name),
                Some(Token::Number(n)) if n.fract() == 0.0 && n >= 0.0 => {
                    segments.push(format!("{}", n as u64))
                }
                Some(token) => {
                    return Err(ExpressionError::UnexpectedToken {
                        found: token.describe(),
                        expected: "a path segment",
                    })
                }
                None => {
                    return Err(ExpressionError::UnexpectedToken {
                        found: "end of expression".to_string(),
                        expected: "a path segment",
                    })
                }
            }
        }
        Ok(Expr::Path(segments))
    }
}

// ========== EVALUATION ==========

fn eval(expr: &Expr, context: &Map<String, Value>) -> Result<Value> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Path(segments) => Ok(resolve(segments, context)),
        Expr::Array(items) => items
            .iter()
            .map(|item| eval(item, context))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Expr::Not(inner) => Ok(Value::Bool(!is_truthy(&eval(inner, context)?))),
        Expr::Neg(inner) => {
            let value = eval(inner, context)?;
            match value.as_f64() {
                Some(n) => Ok(number(-n)),
                None => Err(ExpressionError::TypeMismatch {
                    op: "-",
                    left: "nothing",
                    right: type_name(&value),
                }),
            }
        }
        Expr::Binary(BinaryOp::And, left, right) => {
            if !is_truthy(&eval(left, context)?) {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(is_truthy(&eval(right, context)?)))
        }
        Expr::Binary(BinaryOp::Or, left, right) => {
            if is_truthy(&eval(left, context)?) {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(is_truthy(&eval(right, context)?)))
        }
        Expr::Binary(op, left, right) => {
            let left = eval(left, context)?;
            let right = eval(right, context)?;
            apply(*op, &left, &right)
        }
    }
}

fn resolve(segments: &[String], context: &Map<String, Value>) -> Value {
    let Some((first, rest)) = segments.split_first() else {
        return Value::Null;
    };
    let mut node = match context.get(first) {
        Some(value) => value,
        None => return Value::Null,
    };
    for segment in rest {
        let child = match node {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match child {
            Some(value) => node = value,
            None => return Value::Null,
        }
    }
    node.clone()
}

fn apply(op: BinaryOp, left: &Value, right: &Value) -> Result<Value> {
    let mismatch = || ExpressionError::TypeMismatch {
        op: op.symbol(),
        left: type_name(left),
        right: type_name(right),
    };

    match op {
        BinaryOp::Eq => Ok(Value::Bool(loosely_equal(left, right))),
        BinaryOp::Ne => Ok(Value::Bool(!loosely_equal(left, right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(left, right).ok_or_else(mismatch)?;
            let result = match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            };
            Ok(Value::Bool(result))
        }
        BinaryOp::In | BinaryOp::NotIn => {
            let found = match right {
                Value::Array(items) => items.iter().any(|item| loosely_equal(left, item)),
                Value::Object(map) => left.as_str().map(|key| map.contains_key(key)).unwrap_or(false),
                Value::String(haystack) => match left {
                    Value::String(needle) => haystack.contains(needle.as_str()),
                    _ => return Err(mismatch()),
                },
                Value::Null => false,
                _ => return Err(mismatch()),
            };
            Ok(Value::Bool(if op == BinaryOp::In { found } else { !found }))
        }
        BinaryOp::Matches => {
            let (Value::String(subject), Value::String(pattern)) = (left, right) else {
                return Err(mismatch());
            };
            let regex = Regex::new(pattern).map_err(|e| ExpressionError::InvalidRegex {
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;
            Ok(Value::Bool(regex.is_match(subject)))
        }
        BinaryOp::Concat => Ok(Value::String(format!(
            "{}{}",
            crate::tokens::stringify(left),
            crate::tokens::stringify(right)
        ))),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
                return Err(mismatch());
            };
            let result = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div if b == 0.0 => return Err(ExpressionError::DivisionByZero),
                BinaryOp::Div => a / b,
                BinaryOp::Rem if b == 0.0 => return Err(ExpressionError::DivisionByZero),
                _ => a % b,
            };
            Ok(number(result))
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("logical operators short-circuit in eval"),
    }
}

fn loosely_equal(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => left.as_f64()?.partial_cmp(&right.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Integral results stay integers so they compare and print like their inputs.
fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::from(n as i64)
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
