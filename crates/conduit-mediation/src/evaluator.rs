//! Evaluators - stateless predicates over request metadata
//!
//! An evaluator extracts text from a header, a query parameter or the inbound URL
//! and tests it. Absent input is never an error: the evaluator simply does not
//! match. Only construction can fail.

use conduit_common::MediationContext;
use regex::Regex;
use std::fmt;
use tracing::debug;

use crate::error::{ConfigurationError, MediationError};

/// Result of evaluating a predicate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluated {
    Matched,
    /// The predicate does not hold, or its input is absent
    NotApplicable,
    /// The input exists but has a shape the predicate cannot work with
    Malformed(String),
}

impl Evaluated {
    pub fn from_bool(matched: bool) -> Self {
        if matched {
            Self::Matched
        } else {
            Self::NotApplicable
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, Self::Matched)
    }

    /// Treat `Malformed` as a fatal mediation error
    pub fn into_result(self) -> Result<bool, MediationError> {
        match self {
            Self::Matched => Ok(true),
            Self::NotApplicable => Ok(false),
            Self::Malformed(reason) => Err(MediationError::Evaluation(reason)),
        }
    }
}

// ============================================================================
// Patterns
// ============================================================================

/// A regular expression that must match the whole input
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(&format!("^(?:{})$", pattern))?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    /// The pattern as configured, without anchors
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

// ============================================================================
// Source extraction
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Header,
    Param,
    Url,
}

impl SourceKind {
    pub fn parse(kind: &str) -> Option<Self> {
        match kind.trim().to_ascii_lowercase().as_str() {
            "header" => Some(Self::Header),
            "param" => Some(Self::Param),
            "url" => Some(Self::Url),
            _ => None,
        }
    }
}

/// Where an evaluator reads its input from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceText {
    Header(String),
    Param(String),
    Url,
}

impl SourceText {
    /// `name` is required for headers and params and ignored for the URL
    pub fn new(kind: SourceKind, name: Option<&str>, component: &str) -> Result<Self, ConfigurationError> {
        let named = || match name.map(str::trim) {
            Some(n) if !n.is_empty() => Ok(n.to_string()),
            _ => Err(ConfigurationError::missing(component, "name")),
        };

        match kind {
            SourceKind::Header => Ok(Self::Header(named()?)),
            SourceKind::Param => Ok(Self::Param(named()?)),
            SourceKind::Url => Ok(Self::Url),
        }
    }

    pub fn extract(&self, ctx: &MediationContext) -> Option<String> {
        match self {
            Self::Header(name) => ctx.header(name).map(str::to_string),
            Self::Param(name) => match ctx.query_param(name) {
                Ok(value) => value,
                Err(e) => {
                    debug!(param = %name, error = %e, "Query parameter could not be decoded");
                    None
                }
            },
            Self::Url => Some(ctx.url().to_string()),
        }
    }
}

impl fmt::Display for SourceText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Header(name) => write!(f, "header '{}'", name),
            Self::Param(name) => write!(f, "param '{}'", name),
            Self::Url => f.write_str("url"),
        }
    }
}

// ============================================================================
// Evaluators
// ============================================================================

#[derive(Debug, Clone)]
pub enum Evaluator {
    /// Case-insensitive equality
    Equal { source: SourceText, expected: String },
    /// Full-string regex match
    Match { source: SourceText, pattern: Pattern },
    And(Vec<Evaluator>),
    Or(Vec<Evaluator>),
    Not(Box<Evaluator>),
}

impl Evaluator {
    pub fn equal(kind: SourceKind, name: Option<&str>, expected: &str) -> Result<Self, ConfigurationError> {
        Ok(Self::Equal {
            source: SourceText::new(kind, name, "equal evaluator")?,
            expected: expected.to_string(),
        })
    }

    pub fn matching(kind: SourceKind, name: Option<&str>, regex: &str) -> Result<Self, ConfigurationError> {
        const COMPONENT: &str = "match evaluator";
        let source = SourceText::new(kind, name, COMPONENT)?;
        let pattern = Pattern::new(regex)
            .map_err(|e| ConfigurationError::invalid(COMPONENT, "regex", e.to_string()))?;
        Ok(Self::Match { source, pattern })
    }

    pub fn all(children: Vec<Evaluator>) -> Result<Self, ConfigurationError> {
        if children.len() < 2 {
            return Err(ConfigurationError::invalid(
                "and evaluator",
                "children",
                "two or more evaluators are required",
            ));
        }
        Ok(Self::And(children))
    }

    pub fn any(children: Vec<Evaluator>) -> Result<Self, ConfigurationError> {
        if children.len() < 2 {
            return Err(ConfigurationError::invalid(
                "or evaluator",
                "children",
                "two or more evaluators are required",
            ));
        }
        Ok(Self::Or(children))
    }

    pub fn negate(child: Evaluator) -> Self {
        Self::Not(Box::new(child))
    }

    /// Evaluate against the context; never mutates it
    pub fn evaluate(&self, ctx: &MediationContext) -> Evaluated {
        match self {
            Self::Equal { source, expected } => match source.extract(ctx) {
                Some(text) => Evaluated::from_bool(text.to_lowercase() == expected.to_lowercase()),
                None => Evaluated::NotApplicable,
            },
            Self::Match { source, pattern } => match source.extract(ctx) {
                Some(text) => Evaluated::from_bool(pattern.matches(&text)),
                None => Evaluated::NotApplicable,
            },
            Self::And(children) => {
                for child in children {
                    match child.evaluate(ctx) {
                        Evaluated::Matched => {}
                        other => return other,
                    }
                }
                Evaluated::Matched
            }
            Self::Or(children) => {
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
