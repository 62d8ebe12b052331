//! Filter - a two-way conditional

use async_trait::async_trait;
use conduit_common::MediationContext;
use tracing::debug;

use crate::error::MediationError;
use crate::evaluator::{Evaluator, Pattern};
use crate::expression::{Query, Resolved, ValueExpr};
use crate::mediator::Mediate;
use crate::registry::Environment;
use crate::sequence::Sequence;

/// How a filter decides which branch to take
#[derive(Debug)]
pub enum FilterCondition {
    Query(Query),
    /// Full-string regex match on a source value; an absent value does not match
    Regex { source: ValueExpr, pattern: Pattern },
    Evaluator(Evaluator),
}

impl FilterCondition {
    pub fn test(&self, ctx: &MediationContext) -> Result<bool, MediationError> {
        match self {
            Self::Query(query) => query.evaluate(ctx).into_result(),
            Self::Regex { source, pattern } => match source.resolve(ctx) {
                Resolved::Value(text) => Ok(pattern.matches(&text)),
                Resolved::Absent => {
                    debug!(source = %source, "Filter source absent");
                    Ok(false)
                }
                Resolved::Malformed(reason) => Err(MediationError::Evaluation(reason)),
            },
            Self::Evaluator(evaluator) => evaluator.evaluate(ctx).into_result(),
        }
    }
}

/// Runs one of two branches depending on a condition.
///
/// A named branch sequence takes precedence over inline steps. With no else
/// branch configured, a false condition lets the enclosing sequence continue.
#[derive(Debug)]
pub struct FilterMediator {
    condition: FilterCondition,
    then_sequence: Option<String>,
    then: Sequence,
    else_sequence: Option<String>,
    otherwise: Option<Sequence>,
}

impl FilterMediator {
    pub fn new(condition: FilterCondition, then: Sequence) -> Self {
        Self {
            condition,
            then_sequence: None,
            then,
            else_sequence: None,
            otherwise: None,
        }
    }

    pub fn with_then_sequence(mut self, name: impl Into<String>) -> Self {
        self.then_sequence = Some(name.into());
        self
    }

    pub fn with_else_sequence(mut self, name: impl Into<String>) -> Self {
        self.else_sequence = Some(name.into());
        self
    }

    pub fn with_else(mut self, otherwise: Sequence) -> Self {
        self.otherwise = Some(otherwise);
        self
    }

    pub fn condition(&self) -> &FilterCondition {
        &self.condition
    }
}

#[async_trait]
impl Mediate for FilterMediator {
    async fn mediate(&self, ctx: &mut MediationContext, env: &Environment) -> Result<bool, MediationError> {
        let matched = self.condition.test(ctx)?;
        debug!(matched, "Filter evaluated");

        if matched {
            return match &self.then_sequence {
                Some(name) => env.resolve_sequence(name)?.mediate(ctx, env).await,
                None => self.then.mediate(ctx, env).await,
            };
        }

        match (&self.else_sequence, &self.otherwise) {
            (Some(name), _) => env.resolve_sequence(name)?.mediate(ctx, env).await,
            (None, Some(otherwise)) => otherwise.mediate(ctx, env).await,
            (None, None) => Ok(true),
        }
    }
}
