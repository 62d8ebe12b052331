//! Source and query expressions
//!
//! Source expressions name a single value on the message:
//!
//! | Expression          | Value                                   |
//! |---------------------|-----------------------------------------|
//! | `$ctx:NAME`         | message property                        |
//! | `$header:NAME`      | transport header (`$trp:NAME` also works) |
//! | `$param:NAME`       | decoded query parameter                 |
//! | `$url`              | inbound URL                             |
//! | `$body`, `$body/a/0`| payload, optionally via a JSON pointer  |
//! | `'text'`            | literal                                 |
//!
//! Query expressions combine them into a boolean condition:
//! `$header:X-Mode = 'fast' and not exists($ctx:seen)`.

use conduit_common::MediationContext;
use serde_json::Value;
use std::fmt;
use std::iter::Peekable;
use std::vec::IntoIter;
use tracing::debug;

use crate::error::ConfigurationError;
use crate::evaluator::Evaluated;

/// A single value read from the message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueExpr {
    Property(String),
    Header(String),
    Param(String),
    Url,
    /// JSON pointer into the payload; empty for the whole payload
    Body(String),
    Literal(String),
}

/// String view of a [`ValueExpr`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Value(String),
    Absent,
    Malformed(String),
}

impl ValueExpr {
    pub fn parse(text: &str) -> Result<Self, ConfigurationError> {
        let text = text.trim();
        let invalid = |reason: &str| ConfigurationError::InvalidExpression {
            expression: text.to_string(),
            reason: reason.to_string(),
        };

        if let Some(literal) = unquote(text) {
            return Ok(Self::Literal(literal.to_string()));
        }
        if text == "$url" {
            return Ok(Self::Url);
        }
        if text == "$body" {
            return Ok(Self::Body(String::new()));
        }
        if let Some(pointer) = text.strip_prefix("$body") {
            if pointer.starts_with('/') {
                return Ok(Self::Body(pointer.to_string()));
            }
            return Err(invalid("body path must start with '/'"));
        }

        let (scope, name) = text
            .strip_prefix('$')
            .and_then(|rest| rest.split_once(':'))
            .ok_or_else(|| invalid("expected $ctx:, $header:, $param:, $url, $body or a quoted literal"))?;
        if name.is_empty() {
            return Err(invalid("missing name"));
        }

        match scope {
            "ctx" => Ok(Self::Property(name.to_string())),
            "header" | "trp" => Ok(Self::Header(name.to_string())),
            "param" => Ok(Self::Param(name.to_string())),
            other => Err(invalid(&format!("unknown scope '{}'", other))),
        }
    }

    /// The raw JSON value, `None` when absent or null
    pub fn json(&self, ctx: &MediationContext) -> Option<Value> {
        let value = match self {
            Self::Property(name) => ctx.property(name).cloned(),
            Self::Header(name) => ctx.header(name).map(|v| Value::String(v.to_string())),
            Self::Param(name) => match ctx.query_param(name) {
                Ok(value) => value.map(Value::String),
                Err(e) => {
                    debug!(param = %name, error = %e, "Query parameter could not be decoded");
                    None
                }
            },
            Self::Url => Some(Value::String(ctx.url().to_string())),
            Self::Body(pointer) if pointer.is_empty() => Some(ctx.payload().clone()),
            Self::Body(pointer) => ctx.payload().pointer(pointer).cloned(),
            Self::Literal(text) => Some(Value::String(text.clone())),
        };
        value.filter(|v| !v.is_null())
    }

    pub fn resolve(&self, ctx: &MediationContext) -> Resolved {
        match self.json(ctx) {
            None => Resolved::Absent,
            Some(Value::String(s)) => Resolved::Value(s),
            Some(Value::Number(n)) => Resolved::Value(n.to_string()),
            Some(Value::Bool(b)) => Resolved::Value(b.to_string()),
            Some(_) => Resolved::Malformed(format!("{} does not resolve to a scalar value", self)),
        }
    }
}

impl fmt::Display for ValueExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Property(name) => write!(f, "$ctx:{}", name),
            Self::Header(name) => write!(f, "$header:{}", name),
            Self::Param(name) => write!(f, "$param:{}", name),
            Self::Url => f.write_str("$url"),
            Self::Body(pointer) => write!(f, "$body{}", pointer),
            Self::Literal(text) => write!(f, "'{}'", text),
        }
    }
}

fn unquote(text: &str) -> Option<&str> {
    ['\'', '"'].into_iter().find_map(|quote| {
        text.strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
            .filter(|inner| !inner.contains(quote))
    })
}

// ============================================================================
// Query expressions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Condition {
    Truthy(ValueExpr),
    Exists(ValueExpr),
    Compare {
        left: ValueExpr,
        right: ValueExpr,
        negated: bool,
    },
    All(Vec<Condition>),
    Any(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    fn evaluate(&self, ctx: &MediationContext) -> Evaluated {
        match self {
            Self::Truthy(value) => match value.resolve(ctx) {
                Resolved::Value(s) => {
                    Evaluated::from_bool(!s.is_empty() && !s.eq_ignore_ascii_case("false"))
                }
                Resolved::Absent => Evaluated::NotApplicable,
                Resolved::Malformed(reason) => Evaluated::Malformed(reason),
            },
            Self::Exists(value) => Evaluated::from_bool(value.json(ctx).is_some()),
            Self::Compare { left, right, negated } => {
                match (left.resolve(ctx), right.resolve(ctx)) {
                    (Resolved::Malformed(reason), _) | (_, Resolved::Malformed(reason)) => {
                        Evaluated::Malformed(reason)
                    }
                    (Resolved::Value(l), Resolved::Value(r)) => Evaluated::from_bool((l == r) != *negated),
                    _ => Evaluated::NotApplicable,
                }
            }
            Self::All(children) => {
                for child in children {
                    match child.evaluate(ctx) {
                        Evaluated::Matched => {}
                        other => return other,
                    }
                }
                Evaluated::Matched
            }
            Self::Any(children) => {
                for child in children {
                    match child.evaluate(ctx) {
                        Evaluated::NotApplicable => {}
                        other => return other,
                    }
                }
                Evaluated::NotApplicable
            }
            Self::Not(child) => match child.evaluate(ctx) {
                Evaluated::Matched => Evaluated::NotApplicable,
                Evaluated::NotApplicable => Evaluated::Matched,
                malformed => malformed,
            },
        }
    }
}

/// A boolean condition over the message, parsed once at build time
#[derive(Debug, Clone)]
pub struct Query {
    text: String,
    root: Condition,
}

impl Query {
    pub fn parse(text: &str) -> Result<Self, ConfigurationError> {
        let invalid = |reason: String| ConfigurationError::InvalidExpression {
            expression: text.to_string(),
            reason,
        };

        let tokens = tokenize(text).map_err(invalid)?;
        if tokens.is_empty() {
            return Err(invalid("empty expression".to_string()));
        }

        let mut parser = Parser {
            tokens: tokens.into_iter().peekable(),
        };
        let root = parser.or_expr().map_err(invalid)?;
        if let Some(token) = parser.tokens.next() {
            return Err(invalid(format!("unexpected {}", token)));
        }

        Ok(Self {
            text: text.to_string(),
            root,
        })
    }

    pub fn evaluate(&self, ctx: &MediationContext) -> Evaluated {
        self.root.evaluate(ctx)
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Value(String),
    Literal(String),
    Word(String),
    LParen,
    RParen,
    Eq,
    NotEq,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) | Self::Word(v) => write!(f, "'{}'", v),
            Self::Literal(v) => write!(f, "literal '{}'", v),
            Self::LParen => f.write_str("'('"),
            Self::RParen => f.write_str("')'"),
            Self::Eq => f.write_str("'='"),
            Self::NotEq => f.write_str("'!='"),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '=' => {
                chars.next();
                tokens.push(Token::Eq);
            }
            '!' => {
                chars.next();
                if chars.next_if_eq(&'=').is_none() {
                    return Err("expected '=' after '!'".to_string());
                }
                tokens.push(Token::NotEq);
            }
            '\'' | '"' => {
                chars.next();
                let mut literal = String::new();
                loop {
                    match chars.next() {
                        Some(ch) if ch == c => break,
                        Some(ch) => literal.push(ch),
                        None => return Err("unterminated string literal".to_string()),
                    }
                }
                tokens.push(Token::Literal(literal));
            }
            _ => {
                let mut word = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_whitespace() || matches!(ch, '(' | ')' | '=' | '!' | '\'' | '"') {
                        break;
                    }
                    word.push(ch);
                    chars.next();
                }
                if word.starts_with('$') {
                    tokens.push(Token::Value(word));
                } else {
                    tokens.push(Token::Word(word));
                }
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Peekable<IntoIter<Token>>,
}

impl Parser {
    fn next_is_keyword(&mut self, keyword: &str) -> bool {
        matches!(self.tokens.peek(), Some(Token::Word(w)) if w.eq_ignore_ascii_case(keyword))
    }

    fn or_expr(&mut self) -> Result<Condition, String> {
        let mut terms = vec![self.and_expr()?];
        while self.next_is_keyword("or") {
            self.tokens.next();
            terms.push(self.and_expr()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Condition::Any(terms)
        })
    }

    fn and_expr(&mut self) -> Result<Condition, String> {
        let mut terms = vec![self.unary()?];
        while self.next_is_keyword("and") {
            self.tokens.next();
            terms.push(self.unary()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Condition::All(terms)
        })
    }

    fn unary(&mut self) -> Result<Condition, String> {
        if self.next_is_keyword("not") {
            self.tokens.next();
            return Ok(Condition::Not(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Condition, String> {
        if self.tokens.next_if_eq(&Token::LParen).is_some() {
            let inner = self.or_expr()?;
            self.expect(Token::RParen)?;
            return Ok(inner);
        }

        if self.next_is_keyword("exists") {
            self.tokens.next();
            self.expect(Token::LParen)?;
            let operand = self.operand()?;
            self.expect(Token::RParen)?;
            return Ok(Condition::Exists(operand));
        }

        let left = self.operand()?;
        let negated = match self.tokens.peek() {
            Some(Token::Eq) => false,
            Some(Token::NotEq) => true,
            _ => return Ok(Condition::Truthy(left)),
        };
        self.tokens.next();
        let right = self.operand()?;

        Ok(Condition::Compare { left, right, negated })
    }

    fn operand(&mut self) -> Result<ValueExpr, String> {
        match self.tokens.next() {
            Some(Token::Value(text)) => ValueExpr::parse(&text).map_err(|e| match e {
                ConfigurationError::InvalidExpression { reason, .. } => format!("{}: {}", text, reason),
                other => other.to_string(),
            }),
            Some(Token::Literal(text)) => Ok(ValueExpr::Literal(text)),
            Some(Token::Word(word)) if !is_keyword(&word) => Ok(ValueExpr::Literal(word)),
            Some(token) => Err(format!("expected a value, found {}", token)),
            None => Err("unexpected end of expression".to_string()),
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), String> {
        match self.tokens.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(format!("expected {}, found {}", expected, token)),
            None => Err(format!("expected {}, found end of expression", expected)),
        }
    }
}

fn is_keyword(word: &str) -> bool {
    ["and", "or", "not", "exists"]
        .iter()
        .any(|k| word.eq_ignore_ascii_case(k))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> MediationContext {
        let mut ctx = MediationContext::new("http://localhost/orders?id=42&flag=false");
        ctx.set_header("X-Mode", "fast");
        ctx.set_property("tier", "gold");
        ctx.set_property("count", 3);
        ctx.set_payload(json!({"order": {"id": 7, "lines": [1, 2]}, "express": true}));
        ctx
    }

    #[test]
    fn test_parse_value_expressions() {
        assert_eq!(ValueExpr::parse("$ctx:tier").unwrap(), ValueExpr::Property("tier".into()));
        assert_eq!(ValueExpr::parse("$trp:X-Mode").unwrap(), ValueExpr::Header("X-Mode".into()));
        assert_eq!(ValueExpr::parse(" $url ").unwrap(), ValueExpr::Url);
        assert_eq!(ValueExpr::parse("$body/order/id").unwrap(), ValueExpr::Body("/order/id".into()));
        assert_eq!(ValueExpr::parse("'x y'").unwrap(), ValueExpr::Literal("x y".into()));

        assert!(ValueExpr::parse("$env:HOME").is_err());
        assert!(ValueExpr::parse("$header:").is_err());
        assert!(ValueExpr::parse("//order/id").is_err());
    }

    #[test]
    fn test_resolve_string_view() {
        let ctx = ctx();
        let resolve = |text: &str| ValueExpr::parse(text).unwrap().resolve(&ctx);

        assert_eq!(resolve("$header:x-mode"), Resolved::Value("fast".into()));
        assert_eq!(resolve("$ctx:count"), Resolved::Value("3".into()));
        assert_eq!(resolve("$param:id"), Resolved::Value("42".into()));
        assert_eq!(resolve("$body/order/id"), Resolved::Value("7".into()));
        assert_eq!(resolve("$body/missing"), Resolved::Absent);
        assert_eq!(resolve("$ctx:nothing"), Resolved::Absent);
        assert!(matches!(resolve("$body/order"), Resolved::Malformed(_)));
    }

    #[test]
    fn test_query_comparisons() {
        let ctx = ctx();
        let eval = |text: &str| Query::parse(text).unwrap().evaluate(&ctx);

        assert!(eval("$header:X-Mode = 'fast'").is_match());
        assert!(eval("$header:X-Mode != 'slow'").is_match());
        assert!(eval("$param:id = 42").is_match());
        assert!(!eval("$ctx:missing = 'x'").is_match());
        assert!(!eval("$ctx:missing != 'x'").is_match());
    }

    #[test]
    fn test_query_boolean_operators() {
        let ctx = ctx();
        let eval = |text: &str| Query::parse(text).unwrap().evaluate(&ctx);

        assert!(eval("$ctx:tier = 'gold' and exists($body/order)").is_match());
        assert!(eval("$ctx:tier = 'silver' or $body/express").is_match());
        assert!(eval("not ($ctx:tier = 'silver')").is_match());
        assert!(eval("NOT exists($ctx:seen) AND $param:id = '42'").is_match());
        assert!(!eval("$param:flag").is_match());
        assert!(!eval("$ctx:missing").is_match());
    }

    #[test]
    fn test_non_scalar_comparison_is_malformed() {
        let query = Query::parse("$body/order = 'x'").unwrap();
        assert!(matches!(query.evaluate(&ctx()), Evaluated::Malformed(_)));
    }

    #[test]
    fn test_syntax_errors() {
        for text in [
            "",
            "$header:X =",
            "($ctx:a = 'b'",
            "'unterminated",
            "$ctx:a ! 'b'",
            "exists $ctx:a",
            "$ctx:a = 'b' 'c'",
            "$nope:x",
        ] {
            assert!(
                matches!(Query::parse(text), Err(ConfigurationError::InvalidExpression { .. })),
                "expected syntax error for {:?}",
                text
            );
        }
    }
}
