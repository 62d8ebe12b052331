//! Mediation engine - runs one message through the configured pipeline

use conduit_common::MediationContext;
use conduit_config::{AppConfig, MediationSettings};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::endpoint::MessageSender;
use crate::error::{ConfigurationError, MediationError};
use crate::factory::build_environment;
use crate::load_balance::CursorFactory;
use crate::mediator::Mediate;
use crate::registry::Environment;

/// How processing of a message ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The main sequence ran to the end
    Completed,
    /// A mediator stopped the message (drop, filter branch, handled error)
    Stopped,
    /// Mediation failed; the fault sequence has run if one is configured
    Faulted(String),
}

pub struct MediationEngine {
    env: Arc<Environment>,
    main_sequence: String,
    fault_sequence: Option<String>,
    default_endpoint: Option<String>,
}

impl MediationEngine {
    pub fn new(env: Arc<Environment>, settings: &MediationSettings) -> Self {
        Self {
            env,
            main_sequence: settings.main_sequence.clone(),
            fault_sequence: settings.fault_sequence.clone(),
            default_endpoint: settings.default_endpoint.clone(),
        }
    }

    /// Build the environment from configuration and wrap it in an engine
    pub fn from_config(
        config: &AppConfig,
        sender: Arc<dyn MessageSender>,
        cursors: &dyn CursorFactory,
    ) -> Result<Self, ConfigurationError> {
        let env = build_environment(config, sender, cursors)?;
        Ok(Self::new(Arc::new(env), &config.mediation))
    }

    pub fn environment(&self) -> &Arc<Environment> {
        &self.env
    }

    /// Process one message. Never fails: errors are routed to the fault sequence.
    pub async fn process(&self, ctx: &mut MediationContext) -> Outcome {
        let span = info_span!("mediate", message_id = %ctx.message_id(), url = %ctx.url());
        self.process_message(ctx).instrument(span).await
    }

    async fn process_message(&self, ctx: &mut MediationContext) -> Outcome {
        match self.run_main(ctx).await {
            Ok(true) => {
                info!(sent_to = ?ctx.sent_to(), "Mediation completed");
                Outcome::Completed
            }
            Ok(false) => {
                debug!(dropped = ctx.is_dropped(), "Mediation stopped");
                Outcome::Stopped
            }
            Err(err) => self.handle_fault(ctx, err).await,
        }
    }

    async fn run_main(&self, ctx: &mut MediationContext) -> Result<bool, MediationError> {
        let main = self.env.resolve_sequence(&self.main_sequence)?;
        if !main.mediate(ctx, &self.env).await? {
            return Ok(false);
        }

        if let Some(endpoint) = &self.default_endpoint {
            if !ctx.is_sent() {
                self.env.send_via(endpoint, ctx).await?;
            }
        }
        Ok(true)
    }

    async fn handle_fault(&self, ctx: &mut MediationContext, err: MediationError) -> Outcome {
        let message = err.to_string();
        warn!(code = err.code(), error = %message, "Mediation failed");
        ctx.record_fault(err.code(), &message, None);

        let Some(fault_sequence) = &self.fault_sequence else {
            return Outcome::Faulted(message);
        };

        match self.env.resolve_sequence(fault_sequence) {
            Ok(sequence) => {
                if let Err(e) = sequence.mediate(ctx, &self.env).await {
                    error!(fault_sequence = %fault_sequence, error = %e, "Fault sequence failed");
                }
            }
            Err(e) => error!(error = %e, "Fault sequence unavailable"),
        }

        Outcome::Faulted(message)
    }
}

impl std::fmt::Debug for MediationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediationEngine")
            .field("main_sequence", &self.main_sequence)
            .field("fault_sequence", &self.fault_sequence)
            .field("default_endpoint", &self.default_endpoint)
            .finish()
    }
}
