//! Conduit Mediation
//!
//! Content-based routing for messages flowing between endpoints:
//! - Evaluators and expressions: predicates over headers, query params, URL and payload
//! - Mediators: filter, switch, dynamic router, property/header/log/send/drop
//! - Sequences: ordered mediator lists, resolved by name at invocation time
//! - Load balancing: round-robin over circuit-breaker guarded endpoints
//! - Factory: builds all of the above from `conduit-config` descriptors
//! - Engine: runs a message through the main sequence and the fault path

pub mod endpoint;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod expression;
pub mod factory;
pub mod filter;
pub mod load_balance;
pub mod mediator;
pub mod registry;
pub mod router;
pub mod sequence;

pub use endpoint::{
    AddressEndpoint, ChannelSender, CircuitBreaker, CircuitState, Dispatch, Endpoint,
    MessageSender, SendError,
};
pub use engine::{MediationEngine, Outcome};
pub use error::{ConfigurationError, MediationError, Result};
pub use evaluator::{Evaluated, Evaluator, Pattern, SourceKind, SourceText};
pub use expression::{Query, Resolved, ValueExpr};
pub use factory::{build_endpoint, build_environment, build_evaluator, build_mediator, ComponentFactory};
pub use filter::{FilterCondition, FilterMediator};
pub use load_balance::{CursorFactory, LoadBalancer, LocalCursor, LocalCursorFactory, RoundRobinCursor};
pub use mediator::{
    DropMediator, HeaderMediator, HeaderValue, LogLevel, LogMediator, Mediate, MediatorNode,
    PropertyMediator, PropertyValue, SendMediator, SequenceReference,
};
pub use registry::{Environment, SequenceRegistry};
pub use router::{parse_routes, Case, CaseMatcher, DynamicRouterMediator, Router, SwitchMediator};
pub use sequence::Sequence;
