//! Environment markers (PEP 508).
//!
//! Markers gate a dependency on properties of the target interpreter such as
//! `python_version` or `sys_platform`. They are kept symbolic in the lock file
//! and only evaluated when planning an installation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use pyx_semver::{Version, VersionConstraint};

use crate::util::canonicalize_name;
use crate::{PyxError, Result};

/// Values describing the interpreter markers are evaluated against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerEnvironment {
    pub implementation_name: String,
    pub implementation_version: String,
    pub os_name: String,
    pub platform_machine: String,
    pub platform_python_implementation: String,
    pub platform_release: String,
    pub platform_system: String,
    pub platform_version: String,
    pub python_full_version: String,
    pub python_version: String,
    pub sys_platform: String,
}

impl MarkerEnvironment {
    /// A CPython environment on the given platform, e.g. `("3.11.4", "linux")`
    pub fn cpython(full_version: &str, sys_platform: &str) -> Self {
        let python_version = full_version.split('.').take(2).collect::<Vec<_>>().join(".");
        let (os_name, platform_system) = match sys_platform {
            "win32" => ("nt", "Windows"),
            "darwin" => ("posix", "Darwin"),
            _ => ("posix", "Linux"),
        };

        MarkerEnvironment {
            implementation_name: "cpython".to_string(),
            implementation_version: full_version.to_string(),
            os_name: os_name.to_string(),
            platform_machine: "x86_64".to_string(),
            platform_python_implementation: "CPython".to_string(),
            platform_release: String::new(),
            platform_system: platform_system.to_string(),
            platform_version: String::new(),
            python_full_version: full_version.to_string(),
            python_version,
            sys_platform: sys_platform.to_string(),
        }
    }

    pub fn get(&self, variable: &str) -> Option<&str> {
        let value = match variable {
            "implementation_name" => &self.implementation_name,
            "implementation_version" => &self.implementation_version,
            "os_name" | "os.name" => &self.os_name,
            "platform_machine" | "platform.machine" => &self.platform_machine,
            "platform_python_implementation" | "platform.python_implementation" => {
                &self.platform_python_implementation
            }
            "platform_release" => &self.platform_release,
            "platform_system" => &self.platform_system,
            "platform_version" | "platform.version" => &self.platform_version,
            "python_full_version" => &self.python_full_version,
            "python_version" => &self.python_version,
            "sys_platform" | "sys.platform" => &self.sys_platform,
            _ => return None,
        };
        Some(value)
    }
}

const VERSION_VARIABLES: &[&str] = &[
    "python_version",
    "python_full_version",
    "implementation_version",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerOp {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Compatible,
    ArbitraryEqual,
    In,
    NotIn,
}

impl MarkerOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkerOp::Equal => "==",
            MarkerOp::NotEqual => "!=",
            MarkerOp::Less => "<",
            MarkerOp::LessEqual => "<=",
            MarkerOp::Greater => ">",
            MarkerOp::GreaterEqual => ">=",
            MarkerOp::Compatible => "~=",
            MarkerOp::ArbitraryEqual => "===",
            MarkerOp::In => "in",
            MarkerOp::NotIn => "not in",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MarkerValue {
    Variable(String),
    Literal(String),
}

impl fmt::Display for MarkerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerValue::Variable(name) => write!(f, "{}", name),
            MarkerValue::Literal(value) if value.contains('"') => write!(f, "'{}'", value),
            MarkerValue::Literal(value) => write!(f, "\"{}\"", value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MarkerExpression {
    pub left: MarkerValue,
    pub op: MarkerOp,
    pub right: MarkerValue,
}

/// A parsed marker expression
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Marker {
    /// Matches every environment
    #[default]
    Any,
    /// Matches no environment
    Empty,
    Expression(MarkerExpression),
    And(Vec<Marker>),
    Or(Vec<Marker>),
}

impl Marker {
    pub fn any() -> Self {
        Marker::Any
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Marker::Any)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Marker::Empty)
    }

    pub fn parse(input: &str) -> Result<Self> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Ok(Marker::Any);
        }

        let mut parser = Parser { tokens, pos: 0, input };
        let marker = parser.parse_or()?;
        if parser.pos != parser.tokens.len() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(marker)
    }

    pub fn expression(variable: &str, op: MarkerOp, value: &str) -> Self {
        Marker::Expression(MarkerExpression {
            left: MarkerValue::Variable(variable.to_string()),
            op,
            right: MarkerValue::Literal(value.to_string()),
        })
    }

    pub fn and(self, other: Marker) -> Marker {
        match (self, other) {
            (Marker::Empty, _) | (_, Marker::Empty) => Marker::Empty,
            (Marker::Any, m) | (m, Marker::Any) => m,
            (a, b) if a == b => a,
            (Marker::And(mut left), Marker::And(right)) => {
                for m in right {
                    if !left.contains(&m) {
                        left.push(m);
                    }
                }
                Marker::And(left)
            }
            (Marker::And(mut left), m) => {
                if !left.contains(&m) {
                    left.push(m);
                }
                Marker::And(left)
            }
            (m, Marker::And(mut right)) => {
                if !right.contains(&m) {
                    right.insert(0, m);
                }
                Marker::And(right)
            }
            (a, b) => Marker::And(vec![a, b]),
        }
    }

    pub fn or(self, other: Marker) -> Marker {
        match (self, other) {
            (Marker::Any, _) | (_, Marker::Any) => Marker::Any,
            (Marker::Empty, m) | (m, Marker::Empty) => m,
            (a, b) if a == b => a,
            (Marker::Or(mut left), Marker::Or(right)) => {
                for m in right {
                    if !left.contains(&m) {
                        left.push(m);
                    }
                }
                Marker::Or(left)
            }
            (Marker::Or(mut left), m) => {
                if !left.contains(&m) {
                    left.push(m);
                }
                Marker::Or(left)
            }
            (m, Marker::Or(mut right)) => {
                if !right.contains(&m) {
                    right.insert(0, m);
                }
                Marker::Or(right)
            }
            (a, b) => Marker::Or(vec![a, b]),
        }
    }

    /// Evaluate against an interpreter, with `extras` naming the active extras
    pub fn evaluate(&self, env: &MarkerEnvironment, extras: &BTreeSet<String>) -> bool {
        match self {
            Marker::Any => true,
            Marker::Empty => false,
            Marker::Expression(expr) => evaluate_expression(expr, env, extras),
            Marker::And(markers) => markers.iter().all(|m| m.evaluate(env, extras)),
            Marker::Or(markers) => markers.iter().any(|m| m.evaluate(env, extras)),
        }
    }

    /// Translate a legacy `python-versions` constraint into a marker
    pub fn from_python_constraint(constraint: &VersionConstraint) -> Marker {
        if constraint.is_any() {
            return Marker::Any;
        }

        let mut result = Marker::Empty;
        for range in constraint.ranges() {
            let mut clause = Marker::Any;
            if let Some(version) = range.as_exact() {
                clause = Marker::expression("python_version", MarkerOp::Equal, &version.to_string());
            } else {
                if let Some(min) = range.min() {
                    let op = if min.is_inclusive() { MarkerOp::GreaterEqual } else { MarkerOp::Greater };
                    clause = clause.and(Marker::expression("python_version", op, &min.version().to_string()));
                }
                if let Some(max) = range.max() {
                    let op = if max.is_inclusive() { MarkerOp::LessEqual } else { MarkerOp::Less };
                    clause = clause.and(Marker::expression("python_version", op, &max.version().to_string()));
                }
            }
            result = result.or(clause);
        }
        result
    }

    /// Translate a legacy `platform` field such as `linux || darwin`
    pub fn from_platform(platform: &str) -> Marker {
        let mut result = Marker::Empty;
        for name in platform.split("||").map(str::trim).filter(|s| !s.is_empty() && *s != "*") {
            result = result.or(Marker::expression("sys_platform", MarkerOp::Equal, name));
        }
        if platform.trim().is_empty() || platform.trim() == "*" {
            return Marker::Any;
        }
        result
    }

    /// Extras named by `extra == "..."` clauses
    pub fn extras(&self) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        self.collect_extras(&mut found);
        found
    }

    fn collect_extras(&self, found: &mut BTreeSet<String>) {
        match self {
            Marker::Expression(expr) if is_extra_expression(expr) => {
                if let (MarkerValue::Literal(value), _) | (_, MarkerValue::Literal(value)) = (&expr.left, &expr.right) {
                    if matches!(expr.op, MarkerOp::Equal | MarkerOp::ArbitraryEqual) {
                        found.insert(canonicalize_name(value));
                    }
                }
            }
            Marker::And(markers) | Marker::Or(markers) => {
                for marker in markers {
                    marker.collect_extras(found);
                }
            }
            _ => {}
        }
    }

    /// The same marker with every `extra` clause removed
    pub fn without_extras(&self) -> Marker {
        match self {
            Marker::Expression(expr) if is_extra_expression(expr) => Marker::Any,
            Marker::And(markers) => markers
                .iter()
                .map(Marker::without_extras)
                .fold(Marker::Any, Marker::and),
            Marker::Or(markers) => {
                let stripped: Vec<Marker> = markers.iter().map(Marker::without_extras).collect();
                if stripped.iter().any(Marker::is_any) {
                    Marker::Any
                } else {
                    stripped.into_iter().fold(Marker::Empty, Marker::or)
                }
            }
            other => other.clone(),
        }
    }
}

fn is_extra_expression(expr: &MarkerExpression) -> bool {
    let is_extra = |value: &MarkerValue| matches!(value, MarkerValue::Variable(name) if name == "extra");
    is_extra(&expr.left) || is_extra(&expr.right)
}

fn evaluate_expression(expr: &MarkerExpression, env: &MarkerEnvironment, extras: &BTreeSet<String>) -> bool {
    if is_extra_expression(expr) {
        let literal = match (&expr.left, &expr.right) {
            (MarkerValue::Literal(value), _) | (_, MarkerValue::Literal(value)) => canonicalize_name(value),
            _ => return false,
        };
        return match expr.op {
            MarkerOp::Equal | MarkerOp::ArbitraryEqual | MarkerOp::In => extras.contains(&literal),
            MarkerOp::NotEqual | MarkerOp::NotIn => !extras.contains(&literal),
            _ => false,
        };
    }

    let resolve = |value: &MarkerValue| -> String {
        match value {
            MarkerValue::Variable(name) => env.get(name).unwrap_or_default().to_string(),
            MarkerValue::Literal(value) => value.clone(),
        }
    };
    let is_version_variable = |value: &MarkerValue| {
        matches!(value, MarkerValue::Variable(name) if VERSION_VARIABLES.contains(&name.as_str()))
    };

    let left = resolve(&expr.left);
    let right = resolve(&expr.right);

    match expr.op {
        MarkerOp::In => return right.contains(left.as_str()),
        MarkerOp::NotIn => return !right.contains(left.as_str()),
        MarkerOp::ArbitraryEqual => return left == right,
        _ => {}
    }

    if is_version_variable(&expr.left) || is_version_variable(&expr.right) {
        if let (Ok(l), Ok(r)) = (Version::parse(&left), Version::parse(&right)) {
            return match expr.op {
                MarkerOp::Equal => l == r,
                MarkerOp::NotEqual => l != r,
                MarkerOp::Less => l < r,
                MarkerOp::LessEqual => l <= r,
                MarkerOp::Greater => l > r,
                MarkerOp::GreaterEqual => l >= r,
                MarkerOp::Compatible => VersionConstraint::parse(&format!("~={}", right))
                    .map(|c| c.allows(&l))
                    .unwrap_or(false),
                MarkerOp::ArbitraryEqual | MarkerOp::In | MarkerOp::NotIn => false,
            };
        }
    }

    match expr.op {
        MarkerOp::Equal => left == right,
        MarkerOp::NotEqual => left != right,
        MarkerOp::Less => left < right,
        MarkerOp::LessEqual => left <= right,
        MarkerOp::Greater => left > right,
        MarkerOp::GreaterEqual => left >= right,
        _ => false,
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Marker::Any => Ok(()),
            Marker::Empty => write!(f, "<empty>"),
            Marker::Expression(expr) => write!(f, "{} {} {}", expr.left, expr.op.as_str(), expr.right),
            Marker::And(markers) => {
                let parts: Vec<String> = markers
                    .iter()
                    .map(|m| match m {
                        Marker::Or(_) => format!("({})", m),
                        _ => m.to_string(),
                    })
                    .collect();
                write!(f, "{}", parts.join(" and "))
            }
            Marker::Or(markers) => {
                let parts: Vec<String> = markers.iter().map(|m| m.to_string()).collect();
                write!(f, "{}", parts.join(" or "))
            }
        }
    }
}

impl FromStr for Marker {
    type Err = PyxError;

    fn from_str(s: &str) -> Result<Self> {
        Marker::parse(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    And,
    Or,
    Op(MarkerOp),
    Identifier(String),
    Literal(String),
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '"' | '\'' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == c)
                    .ok_or_else(|| PyxError::InvalidMarker(format!("unterminated string in {}", input)))?;
                tokens.push(Token::Literal(chars[i + 1..i + 1 + end].iter().collect()));
                i += end + 2;
            }
            '=' | '!' | '<' | '>' | '~' => {
                let mut end = i;
                while end < chars.len() && matches!(chars[end], '=' | '!' | '<' | '>' | '~') {
                    end += 1;
                }
                let op: String = chars[i..end].iter().collect();
                let op = match op.as_str() {
                    "==" => MarkerOp::Equal,
                    "!=" => MarkerOp::NotEqual,
                    "<" => MarkerOp::Less,
                    "<=" => MarkerOp::LessEqual,
                    ">" => MarkerOp::Greater,
                    ">=" => MarkerOp::GreaterEqual,
                    "~=" => MarkerOp::Compatible,
                    "===" => MarkerOp::ArbitraryEqual,
                    other => {
                        return Err(PyxError::InvalidMarker(format!("unknown operator \"{}\" in {}", other, input)))
                    }
                };
                tokens.push(Token::Op(op));
                i = end;
            }
            c if c.is_ascii_alphanumeric() || c == '_' || c == '.' => {
                let mut end = i;
                while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_' || chars[end] == '.') {
                    end += 1;
                }
                let word: String = chars[i..end].iter().collect();
                i = end;
                match word.as_str() {
                    "and" => tokens.push(Token::And),
                    "or" => tokens.push(Token::Or),
                    "in" => tokens.push(Token::Op(MarkerOp::In)),
                    "not" => {
                        // only valid as part of `not in`
                        let mut j = i;
                        while j < chars.len() && chars[j].is_whitespace() {
                            j += 1;
                        }
                        if chars.get(j) == Some(&'i') && chars.get(j + 1) == Some(&'n') {
                            tokens.push(Token::Op(MarkerOp::NotIn));
                            i = j + 2;
                        } else {
                            return Err(PyxError::InvalidMarker(format!("expected \"in\" after \"not\" in {}", input)));
                        }
                    }
                    _ => tokens.push(Token::Identifier(word)),
                }
            }
            other => {
                return Err(PyxError::InvalidMarker(format!("unexpected character '{}' in {}", other, input)));
            }
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    input: &'a str,
}

impl Parser<'_> {
    fn error(&self, message: &str) -> PyxError {
        PyxError::InvalidMarker(format!("{} in {}", message, self.input))
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<Marker> {
        let mut marker = self.parse_and()?;
        while self.eat(&Token::Or) {
            marker = marker.or(self.parse_and()?);
        }
        Ok(marker)
    }

    fn parse_and(&mut self) -> Result<Marker> {
        let mut marker = self.parse_atom()?;
        while self.eat(&Token::And) {
            marker = marker.and(self.parse_atom()?);
        }
        Ok(marker)
    }

    fn parse_atom(&mut self) -> Result<Marker> {
        if self.eat(&Token::LParen) {
            let marker = self.parse_or()?;
            if !self.eat(&Token::RParen) {
                return Err(self.error("expected \")\""));
            }
            return Ok(marker);
        }

        let left = self.parse_value()?;
        let op = match self.peek() {
            Some(Token::Op(op)) => *op,
            _ => return Err(self.error("expected an operator")),
        };
        self.pos += 1;
        let right = self.parse_value()?;

        Ok(Marker::Expression(MarkerExpression { left, op, right }))
    }

    fn parse_value(&mut self) -> Result<MarkerValue> {
        let value = match self.peek() {
            Some(Token::Identifier(name)) => MarkerValue::Variable(name.clone()),
            Some(Token::Literal(value)) => MarkerValue::Literal(value.clone()),
            _ => return Err(self.error("expected a variable or a string")),
        };
        self.pos += 1;
        Ok(value)
    }
}
