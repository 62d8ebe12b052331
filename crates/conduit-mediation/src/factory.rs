//! Builds mediation components from configuration descriptors
//!
//! All structural problems are reported here, at load time, as
//! [`ConfigurationError`]s naming the component and attribute at fault.
//! Sequence references are not checked: they bind when a message reaches them.

use conduit_config::{
    AppConfig, CaseDescriptor, EndpointDescriptor, EvaluatorDescriptor, MediatorDescriptor,
    SequenceDescriptor,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::endpoint::{AddressEndpoint, CircuitBreaker, Endpoint, MessageSender};
use crate::error::ConfigurationError;
use crate::evaluator::{Evaluator, Pattern, SourceKind};
use crate::expression::{Query, ValueExpr};
use crate::filter::{FilterCondition, FilterMediator};
use crate::load_balance::{CursorFactory, LoadBalancer};
use crate::mediator::{
    DropMediator, HeaderMediator, HeaderValue, LogLevel, LogMediator, MediatorNode,
    PropertyMediator, PropertyValue, SendMediator, SequenceReference,
};
use crate::registry::Environment;
use crate::router::{Case, DynamicRouterMediator, Router, SwitchMediator, DEFAULT_ROUTES_PARAM};
use crate::sequence::Sequence;

/// Turns descriptors into mediators.
///
/// When built with the set of known load balancers, `send` mediators naming any
/// other load balancer are rejected.
#[derive(Debug, Default, Clone)]
pub struct ComponentFactory {
    load_balancers: Option<HashSet<String>>,
}

impl ComponentFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_load_balancers<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            load_balancers: Some(names.into_iter().map(Into::into).collect()),
        }
    }

    pub fn build_sequence(&self, desc: &SequenceDescriptor) -> Result<Sequence, ConfigurationError> {
        if desc.name.trim().is_empty() {
            return Err(ConfigurationError::missing("sequence", "name"));
        }

        let steps = self.build_steps(&desc.mediators, &desc.name)?;
        let sequence = Sequence::new(desc.name.clone(), steps);

        Ok(match desc.on_error.as_deref().map(str::trim) {
            Some(handler) if !handler.is_empty() => sequence.with_on_error(handler),
            _ => sequence,
        })
    }

    /// Build a single mediator outside any sequence
    pub fn build_mediator(&self, desc: &MediatorDescriptor) -> Result<MediatorNode, ConfigurationError> {
        self.mediator_at(desc, "", 0)
    }

    pub fn build_evaluator(&self, desc: &EvaluatorDescriptor) -> Result<Evaluator, ConfigurationError> {
        evaluator(desc, "evaluator")
    }

    fn build_steps(&self, descs: &[MediatorDescriptor], owner: &str) -> Result<Vec<MediatorNode>, ConfigurationError> {
        descs
            .iter()
            .enumerate()
            .map(|(index, desc)| self.mediator_at(desc, owner, index + 1))
            .collect()
    }

    fn mediator_at(
        &self,
        desc: &MediatorDescriptor,
        owner: &str,
        position: usize,
    ) -> Result<MediatorNode, ConfigurationError> {
        let kind = desc.kind.trim().to_ascii_lowercase();
        let component = if owner.is_empty() {
            format!("mediator ({})", kind)
        } else {
            format!("sequence '{}' > mediator #{} ({})", owner, position, kind)
        };
        let inline_name = |branch: &str| {
            if owner.is_empty() {
                format!("{}.{}", kind, branch)
            } else {
                format!("{}[{}].{}", owner, position, branch)
            }
        };

        let node = match kind.as_str() {
            "filter" => {
                let condition = filter_condition(desc, &component)?;
                let then_name = inline_name("then");
                let then = Sequence::new(then_name.clone(), self.build_steps(&desc.then, &then_name)?);

                let mut filter = FilterMediator::new(condition, then);
                if let Some(name) = non_empty(&desc.then_sequence) {
                    filter = filter.with_then_sequence(name);
                }
                if let Some(name) = non_empty(&desc.else_sequence) {
                    filter = filter.with_else_sequence(name);
                }
                if !desc.otherwise.is_empty() {
                    let else_name = inline_name("else");
                    let steps = self.build_steps(&desc.otherwise, &else_name)?;
                    filter = filter.with_else(Sequence::new(else_name, steps));
                }
                MediatorNode::Filter(filter)
            }
            "switch" => {
                let source = non_empty(&desc.source)
                    .ok_or_else(|| ConfigurationError::missing(&component, "source"))?;
                let cases = desc
                    .cases
                    .iter()
                    .enumerate()
                    .map(|(i, case)| switch_case(case, &format!("{} > case #{}", component, i + 1)))
                    .collect::<Result<Vec<_>, _>>()?;
                let default = non_empty(&desc.default_sequence).map(str::to_string);

                MediatorNode::Switch(SwitchMediator::new(ValueExpr::parse(source)?, Router::new(cases, default)))
            }
            "dynamic-router" | "dynamic_router" => {
                let param = non_empty(&desc.param).unwrap_or(DEFAULT_ROUTES_PARAM);
                MediatorNode::DynamicRouter(DynamicRouterMediator::new(param))
            }
            "sequence" => {
                let key = non_empty(&desc.key).ok_or_else(|| ConfigurationError::missing(&component, "key"))?;
                MediatorNode::Sequence(SequenceReference::new(key))
            }
            "property" => {
                let name = non_empty(&desc.name).ok_or_else(|| ConfigurationError::missing(&component, "name"))?;
                if is_remove(desc, &component)? {
                    MediatorNode::Property(PropertyMediator::remove(name))
                } else {
                    let value = match (&desc.value, non_empty(&desc.expression)) {
                        (Some(value), None) => PropertyValue::Literal(value.clone()),
                        (None, Some(expr)) => PropertyValue::Expression(ValueExpr::parse(expr)?),
                        (None, None) => return Err(ConfigurationError::missing(&component, "value")),
                        (Some(_), Some(_)) => {
                            return Err(ConfigurationError::invalid(
                                &component,
                                "value",
                                "value and expression are mutually exclusive",
                            ))
                        }
                    };
                    MediatorNode::Property(PropertyMediator::set(name, value))
                }
            }
            "header" => {
                let name = non_empty(&desc.name).ok_or_else(|| ConfigurationError::missing(&component, "name"))?;
                if is_remove(desc, &component)? {
                    MediatorNode::Header(HeaderMediator::remove(name))
                } else {
                    let value = match (&desc.value, non_empty(&desc.expression)) {
                        (Some(value), None) => HeaderValue::Literal(scalar_text(value, &component)?),
                        (None, Some(expr)) => HeaderValue::Expression(ValueExpr::parse(expr)?),
                        (None, None) => return Err(ConfigurationError::missing(&component, "value")),
                        (Some(_), Some(_)) => {
                            return Err(ConfigurationError::invalid(
                                &component,
                                "value",
                                "value and expression are mutually exclusive",
                            ))
                        }
                    };
                    MediatorNode::Header(HeaderMediator::set(name, value))
                }
            }
            "log" => {
                let level = match non_empty(&desc.level) {
                    None => LogLevel::Info,
                    Some(level) => LogLevel::parse(level).ok_or_else(|| {
                        ConfigurationError::invalid(&component, "level", format!("unknown level '{}'", level))
                    })?,
                };
                let message = desc.message.clone().unwrap_or_default();
                MediatorNode::Log(LogMediator::new(level, message, desc.properties.clone()))
            }
            "send" => {
                let target = non_empty(&desc.endpoint)
                    .ok_or_else(|| ConfigurationError::missing(&component, "endpoint"))?;
                if let Some(known) = &self.load_balancers {
                    if !known.contains(target) {
                        return Err(ConfigurationError::UnknownLoadBalancer {
                            component,
                            name: target.to_string(),
                        });
                    }
                }
                MediatorNode::Send(SendMediator::new(target))
            }
            "drop" => MediatorNode::Drop(DropMediator),
            _ => {
                return Err(ConfigurationError::UnknownMediatorKind {
                    component,
                    kind: desc.kind.clone(),
                })
            }
        };

        debug!(component = %component, "Mediator built");
        Ok(node)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn is_remove(desc: &MediatorDescriptor, component: &str) -> Result<bool, ConfigurationError> {
    match non_empty(&desc.action).map(str::to_ascii_lowercase).as_deref() {
        None | Some("set") => Ok(false),
        Some("remove") => Ok(true),
        Some(other) => Err(ConfigurationError::invalid(
            component,
            "action",
            format!("expected 'set' or 'remove', found '{}'", other),
        )),
    }
}

fn scalar_text(value: &Value, component: &str) -> Result<String, ConfigurationError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(ConfigurationError::invalid(component, "value", "a header value must be a scalar")),
    }
}

fn pattern(regex: &str, component: &str) -> Result<Pattern, ConfigurationError> {
    Pattern::new(regex).map_err(|e| ConfigurationError::invalid(component, "regex", e.to_string()))
}

fn filter_condition(desc: &MediatorDescriptor, component: &str) -> Result<FilterCondition, ConfigurationError> {
    let expression = non_empty(&desc.expression);
    let regex_mode = desc.source.is_some() || desc.regex.is_some();
    let modes = [expression.is_some(), regex_mode, desc.evaluator.is_some()];

    if modes.iter().filter(|m| **m).count() != 1 {
        return Err(ConfigurationError::invalid(
            component,
            "expression",
            "exactly one of expression, source + regex or evaluator is required",
        ));
    }

    if let Some(expression) = expression {
        return Ok(FilterCondition::Query(Query::parse(expression)?));
    }
    if let Some(ev) = &desc.evaluator {
        return Ok(FilterCondition::Evaluator(evaluator(ev, &format!("{} > evaluator", component))?));
    }

    let source = non_empty(&desc.source).ok_or_else(|| ConfigurationError::missing(component, "source"))?;
    let regex = desc
        .regex
        .as_deref()
        .ok_or_else(|| ConfigurationError::missing(component, "regex"))?;

    Ok(FilterCondition::Regex {
        source: ValueExpr::parse(source)?,
        pattern: pattern(regex, component)?,
    })
}

fn switch_case(case: &CaseDescriptor, component: &str) -> Result<Case, ConfigurationError> {
    let sequence = case.sequence.trim();
    if sequence.is_empty() {
        return Err(ConfigurationError::missing(component, "sequence"));
    }

    match (&case.regex, &case.evaluator) {
        (Some(regex), None) => Ok(Case::pattern(pattern(regex, component)?, sequence)),
        (None, Some(ev)) => Ok(Case::evaluator(evaluator(ev, component)?, sequence)),
        (None, None) => Err(ConfigurationError::missing(component, "regex")),
        (Some(_), Some(_)) => Err(ConfigurationError::invalid(
            component,
            "regex",
            "regex and evaluator are mutually exclusive",
        )),
    }
}

fn evaluator(desc: &EvaluatorDescriptor, component: &str) -> Result<Evaluator, ConfigurationError> {
    let kind = desc.kind.trim().to_ascii_lowercase();

    let source = || -> Result<SourceKind, ConfigurationError> {
        let source = non_empty(&desc.source).ok_or_else(|| ConfigurationError::missing(component, "source"))?;
        SourceKind::parse(source).ok_or_else(|| {
            ConfigurationError::invalid(
                component,
                "source",
                format!("expected header, param or url, found '{}'", source),
            )
        })
    };
    let children = || -> Result<Vec<Evaluator>, ConfigurationError> {
        desc.children
            .iter()
            .enumerate()
            .map(|(i, child)| evaluator(child, &format!("{} > child #{}", component, i + 1)))
            .collect()
    };

    match kind.as_str() {
        "equal" => {
            let value = desc
                .value
                .as_deref()
                .ok_or_else(|| ConfigurationError::missing(component, "value"))?;
            Evaluator::equal(source()?, desc.name.as_deref(), value).map_err(|e| e.within(component))
        }
        "match" => {
            let regex = desc
                .regex
                .as_deref()
                .ok_or_else(|| ConfigurationError::missing(component, "regex"))?;
            Evaluator::matching(source()?, desc.name.as_deref(), regex).map_err(|e| e.within(component))
        }
        "and" => Evaluator::all(children()?).map_err(|e| e.within(component)),
        "or" => Evaluator::any(children()?).map_err(|e| e.within(component)),
        "not" => {
            let mut children = children()?;
            if children.len() != 1 {
                return Err(ConfigurationError::invalid(
                    component,
                    "children",
                    "not takes exactly one evaluator",
                ));
            }
            Ok(Evaluator::negate(children.remove(0)))
        }
        _ => Err(ConfigurationError::UnknownEvaluatorKind {
            component: component.to_string(),
            kind: desc.kind.clone(),
        }),
    }
}

/// Build a circuit-breaker guarded endpoint
pub fn build_endpoint(desc: &EndpointDescriptor) -> Result<AddressEndpoint, ConfigurationError> {
    if desc.name.trim().is_empty() {
        return Err(ConfigurationError::missing("endpoint", "name"));
    }
    let component = format!("endpoint '{}'", desc.name);
    if desc.address.trim().is_empty() {
        return Err(ConfigurationError::missing(&component, "address"));
    }

    let breaker = CircuitBreaker::new(
        desc.failure_threshold,
        desc.success_threshold,
        Duration::from_millis(desc.reset_timeout_ms),
    );
    Ok(AddressEndpoint::with_breaker(&desc.name, &desc.address, breaker))
}

/// Build a single mediator outside any sequence
pub fn build_mediator(desc: &MediatorDescriptor) -> Result<MediatorNode, ConfigurationError> {
    ComponentFactory::new().build_mediator(desc)
}

pub fn build_evaluator(desc: &EvaluatorDescriptor) -> Result<Evaluator, ConfigurationError> {
    ComponentFactory::new().build_evaluator(desc)
}

/// Build every endpoint, load balancer and sequence declared in the configuration
pub fn build_environment(
    config: &AppConfig,
    sender: Arc<dyn MessageSender>,
    cursors: &dyn CursorFactory,
) -> Result<Environment, ConfigurationError> {
    let env = Environment::new(sender);

    let mut endpoints: HashMap<&str, Arc<dyn Endpoint>> = HashMap::new();
    for desc in &config.endpoints {
        let endpoint = build_endpoint(desc)?;
        if endpoints.insert(desc.name.as_str(), Arc::new(endpoint)).is_some() {
            return Err(ConfigurationError::Duplicate {
                what: "endpoint",
                name: desc.name.clone(),
            });
        }
    }

    let mut lb_names = HashSet::new();
    for desc in &config.load_balancers {
        let component = format!("load balancer '{}'", desc.name);
        if desc.name.trim().is_empty() {
            return Err(ConfigurationError::missing("load balancer", "name"));
        }
        if !lb_names.insert(desc.name.clone()) {
            return Err(ConfigurationError::Duplicate {
                what: "load balancer",
                name: desc.name.clone(),
            });
        }
        if desc.endpoints.is_empty() {
            return Err(ConfigurationError::missing(&component, "endpoints"));
        }

        let members = desc
            .endpoints
            .iter()
            .map(|name| {
                endpoints.get(name.as_str()).cloned().ok_or_else(|| {
                    ConfigurationError::invalid(&component, "endpoints", format!("unknown endpoint '{}'", name))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        env.register_load_balancer(
            LoadBalancer::new(&desc.name, members, cursors.cursor(&desc.name)).with_failover(desc.failover),
        );
    }

    if let Some(default) = non_empty(&config.mediation.default_endpoint) {
        if !lb_names.contains(default) {
            return Err(ConfigurationError::UnknownLoadBalancer {
                component: "mediation.default_endpoint".to_string(),
                name: default.to_string(),
            });
        }
    }

    let factory = ComponentFactory::with_load_balancers(lb_names.iter().cloned());
    for desc in &config.sequences {
        if env.sequences().contains(&desc.name) {
            return Err(ConfigurationError::Duplicate {
                what: "sequence",
                name: desc.name.clone(),
            });
        }
        env.sequences().register(factory.build_sequence(desc)?);
    }

    info!(
        sequences = env.sequences().len(),
        load_balancers = lb_names.len(),
        endpoints = endpoints.len(),
        "Mediation environment built"
    );
    Ok(env)
}
