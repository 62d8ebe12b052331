//! Multi-way routing: switch and dynamic router
//!
//! Both evaluate cases in order and dispatch to the sequence of the first match.
//! Target sequences are looked up when a case matches, so a registry replacement
//! takes effect on the next message.

use async_trait::async_trait;
use conduit_common::MediationContext;
use tracing::{debug, warn};

use crate::error::MediationError;
use crate::evaluator::{Evaluated, Evaluator, Pattern, SourceKind};
use crate::expression::{Resolved, ValueExpr};
use crate::mediator::Mediate;
use crate::registry::Environment;

/// Parameter read by the dynamic router unless configured otherwise
pub const DEFAULT_ROUTES_PARAM: &str = "conditions";

#[derive(Debug)]
pub enum CaseMatcher {
    /// Matched against the switch source value
    Pattern(Pattern),
    /// Evaluated against the message
    Evaluator(Evaluator),
}

#[derive(Debug)]
pub struct Case {
    matcher: CaseMatcher,
    sequence: String,
}

impl Case {
    pub fn pattern(pattern: Pattern, sequence: impl Into<String>) -> Self {
        Self {
            matcher: CaseMatcher::Pattern(pattern),
            sequence: sequence.into(),
        }
    }

    pub fn evaluator(evaluator: Evaluator, sequence: impl Into<String>) -> Self {
        Self {
            matcher: CaseMatcher::Evaluator(evaluator),
            sequence: sequence.into(),
        }
    }

    pub fn sequence(&self) -> &str {
        &self.sequence
    }

    fn matches(&self, value: Option<&str>, ctx: &MediationContext) -> Result<bool, MediationError> {
        match &self.matcher {
            CaseMatcher::Pattern(pattern) => Ok(value.is_some_and(|v| pattern.matches(v))),
            CaseMatcher::Evaluator(evaluator) => match evaluator.evaluate(ctx) {
                Evaluated::Matched => Ok(true),
                Evaluated::NotApplicable => Ok(false),
                Evaluated::Malformed(reason) => Err(MediationError::Evaluation(reason)),
            },
        }
    }
}

/// Ordered cases plus an optional default
#[derive(Debug, Default)]
pub struct Router {
    cases: Vec<Case>,
    default: Option<String>,
}

impl Router {
    pub fn new(cases: Vec<Case>, default: Option<String>) -> Self {
        Self { cases, default }
    }

    pub fn cases(&self) -> &[Case] {
        &self.cases
    }

    /// Dispatch to the first matching case, else the default, else continue
    pub async fn route(
        &self,
        value: Option<&str>,
        ctx: &mut MediationContext,
        env: &Environment,
    ) -> Result<bool, MediationError> {
        for (index, case) in self.cases.iter().enumerate() {
            if case.matches(value, ctx)? {
                debug!(case = index, sequence = %case.sequence, "Case matched");
                return env.resolve_sequence(&case.sequence)?.mediate(ctx, env).await;
            }
        }

        match &self.default {
            Some(default) => {
                debug!(sequence = %default, "No case matched, using default");
                env.resolve_sequence(default)?.mediate(ctx, env).await
            }
            None => {
                debug!("No case matched");
                Ok(true)
            }
        }
    }
}

// ============================================================================
// Switch
// ============================================================================

/// Routes on a single source value; pattern cases never match an absent value
#[derive(Debug)]
pub struct SwitchMediator {
    source: ValueExpr,
    router: Router,
}

impl SwitchMediator {
    pub fn new(source: ValueExpr, router: Router) -> Self {
        Self { source, router }
    }
}

#[async_trait]
impl Mediate for SwitchMediator {
    async fn mediate(&self, ctx: &mut MediationContext, env: &Environment) -> Result<bool, MediationError> {
        let value = match self.source.resolve(ctx) {
            Resolved::Value(value) => Some(value),
            Resolved::Absent => {
                debug!(source = %self.source, "Switch source absent");
                None
            }
            Resolved::Malformed(reason) => return Err(MediationError::Evaluation(reason)),
        };

        self.router.route(value.as_deref(), ctx, env).await
    }
}

// ============================================================================
// Dynamic router
// ============================================================================

/// Routes on cases supplied per message through a function parameter.
///
/// Route syntax: `header=X-Mode:fast;seq=fast-path,url=.*/v2/.*;seq=v2`, with
/// several matches joined by `{AND}` or `{OR}` (not both) in one route.
#[derive(Debug, Clone)]
pub struct DynamicRouterMediator {
    param: String,
}

impl DynamicRouterMediator {
    pub fn new(param: impl Into<String>) -> Self {
        Self { param: param.into() }
    }
}

impl Default for DynamicRouterMediator {
    fn default() -> Self {
        Self::new(DEFAULT_ROUTES_PARAM)
    }
}

#[async_trait]
impl Mediate for DynamicRouterMediator {
    async fn mediate(&self, ctx: &mut MediationContext, env: &Environment) -> Result<bool, MediationError> {
        let routes = ctx
            .function_param(&self.param)
            .ok_or_else(|| MediationError::MissingFunctionParam(self.param.clone()))?;
        let cases = parse_routes(routes)?;

        if cases.is_empty() {
            warn!(param = %self.param, "Dynamic router has no routes");
            return Ok(true);
        }

        Router::new(cases, None).route(None, ctx, env).await
    }
}

/// Parse a comma separated route list into cases
pub fn parse_routes(routes: &str) -> Result<Vec<Case>, MediationError> {
    let routes = routes.trim();
    if routes.is_empty() {
        return Ok(Vec::new());
    }
    routes.split(',').map(parse_route).collect()
}

fn parse_route(route: &str) -> Result<Case, MediationError> {
    let route = route.trim();
    let invalid = |reason: &str| MediationError::InvalidRoute(format!("'{}': {}", route, reason));

    let (condition, target) = route
        .rsplit_once(';')
        .ok_or_else(|| invalid("expected '<condition>;seq=<name>'"))?;
    let sequence = match target.split_once('=') {
        Some((key, name)) if key.trim().eq_ignore_ascii_case("seq") && !name.trim().is_empty() => {
            name.trim().to_string()
        }
        _ => return Err(invalid("expected 'seq=<name>' after ';'")),
    };

    let has_and = condition.contains("{AND}");
    let has_or = condition.contains("{OR}");
    let evaluator = match (has_and, has_or) {
        (true, true) => return Err(invalid("{AND} and {OR} cannot be mixed")),
        (true, false) => Evaluator::And(
            condition
                .split("{AND}")
                .map(|m| parse_match(m, route))
                .collect::<Result<_, _>>()?,
        ),
        (false, true) => Evaluator::Or(
            condition
                .split("{OR}")
                .map(|m| parse_match(m, route))
                .collect::<Result<_, _>>()?,
        ),
        (false, false) => parse_match(condition, route)?,
    };

    Ok(Case::evaluator(evaluator, sequence))
}

fn parse_match(condition: &str, route: &str) -> Result<Evaluator, MediationError> {
    let invalid = |reason: String| MediationError::InvalidRoute(format!("'{}': {}", route, reason));
    let condition = condition.trim();

    let (kind, rest) = condition
        .split_once('=')
        .ok_or_else(|| invalid(format!("'{}' is not a header, param or url match", condition)))?;

    let built = match SourceKind::parse(kind) {
        Some(SourceKind::Url) => Evaluator::matching(SourceKind::Url, None, rest),
        Some(kind) => {
            let (name, regex) = rest
                .split_once(':')
                .ok_or_else(|| invalid(format!("expected '<name>:<regex>' in '{}'", condition)))?;
            Evaluator::matching(kind, Some(name), regex)
        }
        None => return Err(invalid(format!("unknown match type '{}'", kind.trim()))),
    };

    built.map_err(|e| invalid(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::ChannelSender;
    use crate::mediator::{MediatorNode, PropertyMediator, PropertyValue};
    use crate::sequence::Sequence;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn env_with(sequences: &[&str]) -> Environment {
        let (sender, _rx) = ChannelSender::new();
        let env = Environment::new(Arc::new(sender));
        for name in sequences {
            env.sequences().register(Sequence::new(
                *name,
                vec![MediatorNode::Property(PropertyMediator::set(
                    "routed",
                    PropertyValue::Literal(json!(name)),
                ))],
            ));
        }
        env
    }

    fn switch_on_region(default: Option<&str>) -> SwitchMediator {
        SwitchMediator::new(
            ValueExpr::parse("$header:X-Region").unwrap(),
            Router::new(
                vec![
                    Case::pattern(Pattern::new("eu-.*").unwrap(), "eu"),
                    Case::pattern(Pattern::new("eu-west-1").unwrap(), "never"),
                    Case::pattern(Pattern::new("us-.*").unwrap(), "us"),
                ],
                default.map(str::to_string),
            ),
        )
    }

    fn region(value: Option<&str>) -> MediationContext {
        let mut ctx = MediationContext::new("http://localhost/");
        if let Some(v) = value {
            ctx.set_header("X-Region", v);
        }
        ctx
    }

    #[tokio::test]
    async fn test_first_match_wins() {
        let env = env_with(&["eu", "never", "us", "fallback"]);
        let switch = switch_on_region(Some("fallback"));

        let mut ctx = region(Some("eu-west-1"));
        switch.mediate(&mut ctx, &env).await.unwrap();
        assert_eq!(ctx.property("routed"), Some(&json!("eu")));
    }

    #[tokio::test]
    async fn test_default_when_nothing_matches() {
        let env = env_with(&["eu", "us", "fallback"]);
        let switch = switch_on_region(Some("fallback"));

        let mut ctx = region(Some("ap-south-1"));
        switch.mediate(&mut ctx, &env).await.unwrap();
        assert_eq!(ctx.property("routed"), Some(&json!("fallback")));

        let mut absent = region(None);
        switch.mediate(&mut absent, &env).await.unwrap();
        assert_eq!(absent.property("routed"), Some(&json!("fallback")));
    }

    #[tokio::test]
    async fn test_no_match_no_default_continues() {
        let env = env_with(&["eu", "us"]);
        let switch = switch_on_region(None);

        let mut ctx = region(Some("ap-south-1"));
        assert!(switch.mediate(&mut ctx, &env).await.unwrap());
        assert!(ctx.property("routed").is_none());
    }

    #[tokio::test]
    async fn test_matched_case_with_missing_sequence() {
        let env = env_with(&[]);
        let switch = switch_on_region(None);

        let err = switch.mediate(&mut region(Some("us-east-1")), &env).await.unwrap_err();
        assert_eq!(err, MediationError::SequenceNotFound("us".into()));
    }

    #[test]
    fn test_parse_routes() {
        let cases = parse_routes(
            "header=X-Mode:fast;seq=fast, param=id:\\d+{AND}url=.*/orders.*;seq=orders,url=.*;SEQ=all",
        )
        .unwrap();

        let targets: Vec<&str> = cases.iter().map(Case::sequence).collect();
        assert_eq!(targets, ["fast", "orders", "all"]);
        assert!(matches!(cases[1].matcher, CaseMatcher::Evaluator(Evaluator::And(ref c)) if c.len() == 2));
    }

    #[test]
    fn test_parse_route_errors() {
        for routes in [
            "header=X:a",
            "header=X:a;dest=b",
            "header=X:a{AND}param=y:b{OR}url=c;seq=s",
            "cookie=x:y;seq=s",
            "header=nocolon;seq=s",
            "url=(unclosed;seq=s",
            "justtext;seq=s",
        ] {
            assert!(
                matches!(parse_routes(routes), Err(MediationError::InvalidRoute(_))),
                "expected an error for {:?}",
                routes
            );
        }
        assert!(parse_routes("   ").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dynamic_router_reads_innermost_scope() {
        let env = env_with(&["outer", "inner"]);
        let router = DynamicRouterMediator::default();

        let mut ctx = MediationContext::new("http://localhost/orders?id=42");
        ctx.push_function_scope(HashMap::from([(
            "conditions".to_string(),
            "url=.*;seq=outer".to_string(),
        )]));
        ctx.push_function_scope(HashMap::from([(
            "conditions".to_string(),
            "param=id:42;seq=inner".to_string(),
        )]));

        router.mediate(&mut ctx, &env).await.unwrap();
        assert_eq!(ctx.property("routed"), Some(&json!("inner")));
    }

    #[tokio::test]
    async fn test_dynamic_router_missing_param() {
        let env = env_with(&[]);
        let mut ctx = MediationContext::new("http://localhost/");

        let err = DynamicRouterMediator::new("routes").mediate(&mut ctx, &env).await.unwrap_err();
        assert_eq!(err, MediationError::MissingFunctionParam("routes".into()));
    }

    #[tokio::test]
    async fn test_dynamic_router_empty_routes_pass_through() {
        let env = env_with(&[]);
        let mut ctx = MediationContext::new("http://localhost/");
        ctx.push_function_scope(HashMap::from([("conditions".to_string(), String::new())]));

        assert!(DynamicRouterMediator::default().mediate(&mut ctx, &env).await.unwrap());
    }
}
