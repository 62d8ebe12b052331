//! The mediator contract and the closed set of mediator variants
//!
//! Every step of a sequence is a [`MediatorNode`]. Returning `Ok(false)` stops the
//! enclosing sequence; returning an error aborts the message unless a sequence
//! on the way up has an error handler.

use async_trait::async_trait;
use conduit_common::MediationContext;
use serde_json::Value;
use tracing::{debug, Level};

use crate::error::MediationError;
use crate::expression::{Resolved, ValueExpr};
use crate::filter::FilterMediator;
use crate::registry::Environment;
use crate::router::{DynamicRouterMediator, SwitchMediator};

#[async_trait]
pub trait Mediate: Send + Sync {
    /// Process the message; `Ok(false)` stops the enclosing sequence
    async fn mediate(&self, ctx: &mut MediationContext, env: &Environment) -> Result<bool, MediationError>;
}

#[derive(Debug)]
pub enum MediatorNode {
    Filter(FilterMediator),
    Switch(SwitchMediator),
    DynamicRouter(DynamicRouterMediator),
    Sequence(SequenceReference),
    Property(PropertyMediator),
    Header(HeaderMediator),
    Log(LogMediator),
    Send(SendMediator),
    Drop(DropMediator),
}

impl MediatorNode {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Filter(_) => "filter",
            Self::Switch(_) => "switch",
            Self::DynamicRouter(_) => "dynamic-router",
            Self::Sequence(_) => "sequence",
            Self::Property(_) => "property",
            Self::Header(_) => "header",
            Self::Log(_) => "log",
            Self::Send(_) => "send",
            Self::Drop(_) => "drop",
        }
    }
}

#[async_trait]
impl Mediate for MediatorNode {
    async fn mediate(&self, ctx: &mut MediationContext, env: &Environment) -> Result<bool, MediationError> {
        match self {
            Self::Filter(m) => m.mediate(ctx, env).await,
            Self::Switch(m) => m.mediate(ctx, env).await,
            Self::DynamicRouter(m) => m.mediate(ctx, env).await,
            Self::Sequence(m) => m.mediate(ctx, env).await,
            Self::Property(m) => m.mediate(ctx, env).await,
            Self::Header(m) => m.mediate(ctx, env).await,
            Self::Log(m) => m.mediate(ctx, env).await,
            Self::Send(m) => m.mediate(ctx, env).await,
            Self::Drop(m) => m.mediate(ctx, env).await,
        }
    }
}

// ============================================================================
// Sequence reference
// ============================================================================

/// Runs a named sequence, resolved at invocation time
#[derive(Debug, Clone)]
pub struct SequenceReference {
    key: String,
}

impl SequenceReference {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl Mediate for SequenceReference {
    async fn mediate(&self, ctx: &mut MediationContext, env: &Environment) -> Result<bool, MediationError> {
        let sequence = env.resolve_sequence(&self.key)?;
        sequence.mediate(ctx, env).await
    }
}

// ============================================================================
// Property
// ============================================================================

#[derive(Debug, Clone)]
pub enum PropertyValue {
    Literal(Value),
    Expression(ValueExpr),
}

/// Sets or removes a message property
#[derive(Debug, Clone)]
pub struct PropertyMediator {
    name: String,
    /// `None` removes the property
    value: Option<PropertyValue>,
}

impl PropertyMediator {
    pub fn set(name: impl Into<String>, value: PropertyValue) -> Self {
        Self {
            name: name.into(),
            value: Some(value),
        }
    }

    pub fn remove(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }
}

#[async_trait]
impl Mediate for PropertyMediator {
    async fn mediate(&self, ctx: &mut MediationContext, _env: &Environment) -> Result<bool, MediationError> {
        let value = match &self.value {
            None => None,
            Some(PropertyValue::Literal(value)) => Some(value.clone()),
            Some(PropertyValue::Expression(expr)) => {
                let value = expr.json(ctx);
                if value.is_none() {
                    debug!(property = %self.name, expression = %expr, "Expression resolved to nothing");
                }
                value
            }
        };

        match value {
            Some(value) => ctx.set_property(self.name.clone(), value),
            None => {
                ctx.remove_property(&self.name);
            }
        }
        Ok(true)
    }
}

// ============================================================================
// Header
// ============================================================================

#[derive(Debug, Clone)]
pub enum HeaderValue {
    Literal(String),
    Expression(ValueExpr),
}

/// Sets or removes a transport header
#[derive(Debug, Clone)]
pub struct HeaderMediator {
    name: String,
    value: Option<HeaderValue>,
}

impl HeaderMediator {
    pub fn set(name: impl Into<String>, value: HeaderValue) -> Self {
        Self {
            name: name.into(),
            value: Some(value),
        }
    }

    pub fn remove(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }
}

#[async_trait]
impl Mediate for HeaderMediator {
    async fn mediate(&self, ctx: &mut MediationContext, _env: &Environment) -> Result<bool, MediationError> {
        let value = match &self.value {
            None => None,
            Some(HeaderValue::Literal(text)) => Some(text.clone()),
            Some(HeaderValue::Expression(expr)) => match expr.resolve(ctx) {
                Resolved::Value(text) => Some(text),
                Resolved::Absent => None,
                Resolved::Malformed(reason) => return Err(MediationError::Evaluation(reason)),
            },
        };

        match value {
            Some(value) => ctx.set_header(&self.name, value),
            None => {
                ctx.remove_header(&self.name);
            }
        }
        Ok(true)
    }
}

// ============================================================================
// Log
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn parse(level: &str) -> Option<Self> {
        match level.trim().to_ascii_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Emits a tracing event with selected message properties
#[derive(Debug, Clone)]
pub struct LogMediator {
    level: LogLevel,
    message: String,
    properties: Vec<String>,
}

impl LogMediator {
    pub fn new(level: LogLevel, message: impl Into<String>, properties: Vec<String>) -> Self {
        Self {
            level,
            message: message.into(),
            properties,
        }
    }

    fn render_properties(&self, ctx: &MediationContext) -> String {
        self.properties
            .iter()
            .map(|name| match ctx.property(name) {
                Some(Value::String(s)) => format!("{}={}", name, s),
                Some(other) => format!("{}={}", name, other),
                None => format!("{}=<unset>", name),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

macro_rules! log_event {
    ($level:expr, $ctx:ident, $props:ident, $message:expr) => {
        tracing::event!(
            target: "conduit::log",
            $level,
            message_id = %$ctx.message_id(),
            url = %$ctx.url(),
            properties = %$props,
            "{}",
            $message
        )
    };
}

#[async_trait]
impl Mediate for LogMediator {
    async fn mediate(&self, ctx: &mut MediationContext, _env: &Environment) -> Result<bool, MediationError> {
        let props = self.render_properties(ctx);
        match self.level {
            LogLevel::Trace => log_event!(Level::TRACE, ctx, props, self.message),
            LogLevel::Debug => log_event!(Level::DEBUG, ctx, props, self.message),
            LogLevel::Info => log_event!(Level::INFO, ctx, props, self.message),
            LogLevel::Warn => log_event!(Level::WARN, ctx, props, self.message),
            LogLevel::Error => log_event!(Level::ERROR, ctx, props, self.message),
        }
        Ok(true)
    }
}

// ============================================================================
// Send / Drop
// ============================================================================

/// Dispatches the message through a named load balancer
#[derive(Debug, Clone)]
pub struct SendMediator {
    load_balancer: String,
}

impl SendMediator {
    pub fn new(load_balancer: impl Into<String>) -> Self {
        Self {
            load_balancer: load_balancer.into(),
        }
    }

    pub fn load_balancer(&self) -> &str {
        &self.load_balancer
    }
}

#[async_trait]
impl Mediate for SendMediator {
    async fn mediate(&self, ctx: &mut MediationContext, env: &Environment) -> Result<bool, MediationError> {
        env.send_via(&self.load_balancer, ctx).await?;
        Ok(true)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DropMediator;

#[async_trait]
impl Mediate for DropMediator {
    async fn mediate(&self, ctx: &mut MediationContext, _env: &Environment) -> Result<bool, MediationError> {
        debug!(message_id = %ctx.message_id(), "Message dropped");
        ctx.mark_dropped();
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::ChannelSender;
    use serde_json::json;
    use std::sync::Arc;

    fn env() -> Environment {
        let (sender, _rx) = ChannelSender::new();
        Environment::new(Arc::new(sender))
    }

    #[tokio::test]
    async fn test_property_literal_and_expression() {
        let env = env();
        let mut ctx = MediationContext::new("http://localhost/orders?id=42");
        ctx.set_payload(json!({"order": {"total": 12.5}}));

        PropertyMediator::set("tier", PropertyValue::Literal(json!("gold")))
            .mediate(&mut ctx, &env)
            .await
            .unwrap();
        PropertyMediator::set("order", PropertyValue::Expression(ValueExpr::parse("$body/order").unwrap()))
            .mediate(&mut ctx, &env)
            .await
            .unwrap();
        PropertyMediator::set("id", PropertyValue::Expression(ValueExpr::parse("$param:id").unwrap()))
            .mediate(&mut ctx, &env)
            .await
            .unwrap();

        assert_eq!(ctx.property("tier"), Some(&json!("gold")));
        assert_eq!(ctx.property("order"), Some(&json!({"total": 12.5})));
        assert_eq!(ctx.property("id"), Some(&json!("42")));
    }

    #[tokio::test]
    async fn test_property_remove_and_absent_expression() {
        let env = env();
        let mut ctx = MediationContext::new("http://localhost/");
        ctx.set_property("a", 1);
        ctx.set_property("b", 2);

        PropertyMediator::remove("a").mediate(&mut ctx, &env).await.unwrap();
        PropertyMediator::set("b", PropertyValue::Expression(ValueExpr::parse("$ctx:missing").unwrap()))
            .mediate(&mut ctx, &env)
            .await
            .unwrap();

        assert!(ctx.property("a").is_none());
        assert!(ctx.property("b").is_none());
    }

    #[tokio::test]
    async fn test_header_set_and_malformed() {
        let env = env();
        let mut ctx = MediationContext::new("http://localhost/");
        ctx.set_payload(json!({"nested": {"a": 1}}));

        HeaderMediator::set("X-Route", HeaderValue::Literal("eu".into()))
            .mediate(&mut ctx, &env)
            .await
            .unwrap();
        assert_eq!(ctx.header("x-route"), Some("eu"));

        let result = HeaderMediator::set(
            "X-Nested",
            HeaderValue::Expression(ValueExpr::parse("$body/nested").unwrap()),
        )
        .mediate(&mut ctx, &env)
        .await;
        assert!(matches!(result, Err(MediationError::Evaluation(_))));

        HeaderMediator::remove("X-Route").mediate(&mut ctx, &env).await.unwrap();
        assert!(ctx.header("X-Route").is_none());
    }

    #[tokio::test]
    async fn test_log_continues() {
        let env = env();
        let mut ctx = MediationContext::new("http://localhost/");
        let log = LogMediator::new(LogLevel::Info, "hello", vec!["missing".into()]);

        assert!(log.mediate(&mut ctx, &env).await.unwrap());
        assert_eq!(log.render_properties(&ctx), "missing=<unset>");
    }

    #[tokio::test]
    async fn test_drop_stops() {
        let env = env();
        let mut ctx = MediationContext::new("http://localhost/");

        assert!(!DropMediator.mediate(&mut ctx, &env).await.unwrap());
        assert!(ctx.is_dropped());
    }

    #[tokio::test]
    async fn test_send_to_unknown_load_balancer() {
        let env = env();
        let mut ctx = MediationContext::new("http://localhost/");

        let err = SendMediator::new("nowhere").mediate(&mut ctx, &env).await.unwrap_err();
        assert_eq!(err, MediationError::LoadBalancerNotFound("nowhere".into()));
    }

    #[tokio::test]
    async fn test_unresolved_sequence_reference() {
        let env = env();
        let mut ctx = MediationContext::new("http://localhost/");

        let err = SequenceReference::new("ghost").mediate(&mut ctx, &env).await.unwrap_err();
        assert_eq!(err, MediationError::SequenceNotFound("ghost".into()));
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!(LogLevel::parse("WARNING"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("loud"), None);
    }
}
