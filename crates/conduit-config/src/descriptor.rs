//! Declarative component descriptors
//!
//! Descriptors are plain attribute bags. They only check shape (types, unknown
//! fields); whether a given combination of attributes makes sense for a `kind` is
//! decided by the mediation factory, which reports the offending attribute.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named, ordered list of mediators
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SequenceDescriptor {
    pub name: String,
    /// Sequence to run when a step fails with a mediation error
    pub on_error: Option<String>,
    pub mediators: Vec<MediatorDescriptor>,
}

/// One mediator; `kind` selects the variant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MediatorDescriptor {
    pub kind: String,

    // filter / switch
    pub source: Option<String>,
    pub regex: Option<String>,
    pub expression: Option<String>,
    pub evaluator: Option<EvaluatorDescriptor>,
    pub then_sequence: Option<String>,
    pub else_sequence: Option<String>,
    pub then: Vec<MediatorDescriptor>,
    #[serde(rename = "else")]
    pub otherwise: Vec<MediatorDescriptor>,
    pub cases: Vec<CaseDescriptor>,
    pub default_sequence: Option<String>,

    // sequence reference, send, dynamic router
    pub key: Option<String>,
    pub endpoint: Option<String>,
    pub param: Option<String>,

    // property / header / log
    pub name: Option<String>,
    pub value: Option<Value>,
    pub action: Option<String>,
    pub level: Option<String>,
    pub message: Option<String>,
    pub properties: Vec<String>,
}

impl MediatorDescriptor {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            ..Default::default()
        }
    }
}

/// A switch case: a regex or an evaluator, and the sequence it dispatches to
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaseDescriptor {
    pub regex: Option<String>,
    pub evaluator: Option<EvaluatorDescriptor>,
    pub sequence: String,
}

/// Predicate over request metadata.
///
/// `kind` is one of `equal`, `match`, `and`, `or`, `not`; `source` is one of
/// `header`, `param`, `url`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EvaluatorDescriptor {
    pub kind: String,
    pub source: Option<String>,
    pub name: Option<String>,
    pub value: Option<String>,
    pub regex: Option<String>,
    pub children: Vec<EvaluatorDescriptor>,
}

/// An outbound destination guarded by a circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EndpointDescriptor {
    pub name: String,
    pub address: String,
    /// Consecutive failures before the endpoint is taken out of rotation
    pub failure_threshold: u32,
    /// Successful probes needed in half-open state to return to rotation
    pub success_threshold: u32,
    /// Time an open endpoint stays out of rotation before it is probed again
    pub reset_timeout_ms: u64,
}

impl Default for EndpointDescriptor {
    fn default() -> Self {
        Self {
            name: String::new(),
            address: String::new(),
            failure_threshold: 5,
            success_threshold: 1,
            reset_timeout_ms: 30_000,
        }
    }
}

/// Round-robin group over endpoints declared in `[[endpoints]]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoadBalancerDescriptor {
    pub name: String,
    pub endpoints: Vec<String>,
    /// Retry on the next endpoint when a send fails
    pub failover: bool,
}

impl Default for LoadBalancerDescriptor {
    fn default() -> Self {
        Self {
            name: String::new(),
            endpoints: Vec::new(),
            failover: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_mediators_parse() {
        let seq: SequenceDescriptor = toml::from_str(
            r#"
            name = "main"
            on_error = "fault"

            [[mediators]]
            kind = "filter"
            source = "$header:Content-Type"
            regex = "application/json.*"
            else_sequence = "reject"

            [[mediators.then]]
            kind = "property"
            name = "json"
            value = true
            "#,
        )
        .unwrap();

        assert_eq!(seq.on_error.as_deref(), Some("fault"));
        let filter = &seq.mediators[0];
        assert_eq!(filter.kind, "filter");
        assert_eq!(filter.then.len(), 1);
        assert_eq!(filter.then[0].value, Some(Value::Bool(true)));
        assert!(filter.otherwise.is_empty());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<MediatorDescriptor, _> = toml::from_str(
            r#"
            kind = "log"
            colour = "blue"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_endpoint_defaults() {
        let ep: EndpointDescriptor = toml::from_str(
            r#"
            name = "a"
            address = "http://a"
            "#,
        )
        .unwrap();
        assert_eq!(ep.failure_threshold, 5);
        assert_eq!(ep.reset_timeout_ms, 30_000);
    }
}
