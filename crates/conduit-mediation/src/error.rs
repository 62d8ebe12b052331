use thiserror::Error;

/// A component could not be built from its descriptor
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("{component}: missing required attribute '{attribute}'")]
    MissingAttribute {
        component: String,
        attribute: &'static str,
    },

    #[error("{component}: invalid attribute '{attribute}': {reason}")]
    InvalidAttribute {
        component: String,
        attribute: &'static str,
        reason: String,
    },

    #[error("{component}: unknown mediator kind '{kind}'")]
    UnknownMediatorKind { component: String, kind: String },

    #[error("{component}: unknown evaluator kind '{kind}'")]
    UnknownEvaluatorKind { component: String, kind: String },

    #[error("{component}: unknown load balancer '{name}'")]
    UnknownLoadBalancer { component: String, name: String },

    #[error("duplicate {what} '{name}'")]
    Duplicate { what: &'static str, name: String },

    #[error("invalid expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },
}

impl ConfigurationError {
    pub(crate) fn missing(component: &str, attribute: &'static str) -> Self {
        Self::MissingAttribute {
            component: component.to_string(),
            attribute,
        }
    }

    pub(crate) fn invalid(component: &str, attribute: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidAttribute {
            component: component.to_string(),
            attribute,
            reason: reason.into(),
        }
    }

    /// Prefix the component path with the enclosing component
    pub fn within(self, outer: &str) -> Self {
        let nest = |inner: String| format!("{} > {}", outer, inner);
        match self {
            Self::MissingAttribute { component, attribute } => Self::MissingAttribute {
                component: nest(component),
                attribute,
            },
            Self::InvalidAttribute { component, attribute, reason } => Self::InvalidAttribute {
                component: nest(component),
                attribute,
                reason,
            },
            Self::UnknownMediatorKind { component, kind } => Self::UnknownMediatorKind {
                component: nest(component),
                kind,
            },
            Self::UnknownEvaluatorKind { component, kind } => Self::UnknownEvaluatorKind {
                component: nest(component),
                kind,
            },
            Self::UnknownLoadBalancer { component, name } => Self::UnknownLoadBalancer {
                component: nest(component),
                name,
            },
            other => other,
        }
    }
}

/// Processing of the current message failed.
///
/// Aborts the current message only; the engine diverts it to the fault sequence.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediationError {
    #[error("sequence '{0}' cannot be found")]
    SequenceNotFound(String),

    #[error("sequence '{0}' is already running for this message")]
    SequenceCycle(String),

    #[error("load balancer '{0}' cannot be found")]
    LoadBalancerNotFound(String),

    #[error("evaluation failed: {0}")]
    Evaluation(String),

    #[error("function parameter '{0}' is not defined")]
    MissingFunctionParam(String),

    #[error("invalid dynamic route: {0}")]
    InvalidRoute(String),

    #[error("no active endpoint available in '{0}'")]
    NoActiveEndpoint(String),

    #[error("send to endpoint '{endpoint}' failed: {reason}")]
    Send { endpoint: String, reason: String },

    #[error("load balancer state unavailable: {0}")]
    Cursor(String),
}

impl MediationError {
    /// Stable code written to the ERROR_CODE property
    pub fn code(&self) -> &'static str {
        match self {
            Self::SequenceNotFound(_) => "SEQUENCE_NOT_FOUND",
            Self::SequenceCycle(_) => "SEQUENCE_CYCLE",
            Self::LoadBalancerNotFound(_) => "LOAD_BALANCER_NOT_FOUND",
            Self::Evaluation(_) => "EVALUATION_FAILED",
            Self::MissingFunctionParam(_) => "MISSING_FUNCTION_PARAM",
            Self::InvalidRoute(_) => "INVALID_ROUTE",
            Self::NoActiveEndpoint(_) => "NO_ACTIVE_ENDPOINT",
            Self::Send { .. } => "SEND_FAILED",
            Self::Cursor(_) => "CURSOR_UNAVAILABLE",
        }
    }
}

pub type Result<T> = std::result::Result<T, MediationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_within_nests_component_path() {
        let err = ConfigurationError::missing("match evaluator", "regex")
            .within("case #1")
            .within("sequence 'main'");

        assert_eq!(
            err.to_string(),
            "sequence 'main' > case #1 > match evaluator: missing required attribute 'regex'"
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(MediationError::SequenceNotFound("x".into()).code(), "SEQUENCE_NOT_FOUND");
        assert_eq!(MediationError::NoActiveEndpoint("lb".into()).code(), "NO_ACTIVE_ENDPOINT");
        assert_eq!(MediationError::SequenceCycle("main".into()).code(), "SEQUENCE_CYCLE");
    }
}
