//! Sequences - ordered lists of mediators

use async_trait::async_trait;
use conduit_common::MediationContext;
use tracing::{debug, error, warn};

use crate::error::MediationError;
use crate::mediator::{Mediate, MediatorNode};
use crate::registry::Environment;

/// An ordered list of mediators run against one message.
///
/// A step returning `false` stops the sequence. Mutations made by earlier steps
/// are kept. A sequence cannot be re-entered while it is running for the same
/// message; nested invocations fail with [`MediationError::SequenceCycle`].
#[derive(Debug)]
pub struct Sequence {
    name: String,
    steps: Vec<MediatorNode>,
    on_error: Option<String>,
}

impl Sequence {
    pub fn new(name: impl Into<String>, steps: Vec<MediatorNode>) -> Self {
        Self {
            name: name.into(),
            steps,
            on_error: None,
        }
    }

    /// Run the named sequence when a step fails
    pub fn with_on_error(mut self, handler: impl Into<String>) -> Self {
        self.on_error = Some(handler.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[MediatorNode] {
        &self.steps
    }

    pub fn on_error(&self) -> Option<&str> {
        self.on_error.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    async fn run_steps(&self, ctx: &mut MediationContext, env: &Environment) -> Result<bool, MediationError> {
        debug!(sequence = %self.name, steps = self.steps.len(), "Sequence started");

        for (index, step) in self.steps.iter().enumerate() {
            match step.mediate(ctx, env).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(sequence = %self.name, step = index, kind = step.kind(), "Sequence stopped");
                    return Ok(false);
                }
                Err(e) => return self.handle_error(e, ctx, env).await,
            }
        }

        Ok(true)
    }

    async fn handle_error(
        &self,
        err: MediationError,
        ctx: &mut MediationContext,
        env: &Environment,
    ) -> Result<bool, MediationError> {
        let Some(handler) = self.on_error.as_deref() else {
            return Err(err);
        };
        if handler == self.name {
            error!(sequence = %self.name, "Sequence is its own error handler, propagating");
            return Err(err);
        }

        warn!(
            sequence = %self.name,
            on_error = handler,
            code = err.code(),
            error = %err,
            "Step failed, running error handler"
        );
        ctx.record_fault(err.code(), &err.to_string(), Some(self.name.as_str()));

        let handler = env.resolve_sequence(handler)?;
        handler.mediate(ctx, env).await?;
        Ok(false)
    }
}

#[async_trait]
impl Mediate for Sequence {
    async fn mediate(&self, ctx: &mut MediationContext, env: &Environment) -> Result<bool, MediationError> {
        if !ctx.enter_sequence(&self.name) {
            warn!(
                sequence = %self.name,
                active = ?ctx.active_sequences(),
                "Sequence invoked while already running"
            );
            return Err(MediationError::SequenceCycle(self.name.clone()));
        }

        let result = self.run_steps(ctx, env).await;
        ctx.exit_sequence(&self.name);
        result
    }
}
