//! Conduit Common
//!
//! Shared types for the mediation pipeline:
//! - MediationContext: per-message state threaded through every mediator
//! - InboundMessage: serializable description of a message arriving at the boundary
//! - Query string decoding helpers
//! - Structured logging setup

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

pub mod context;
pub mod logging;
pub mod query;

pub use context::{FaultInfo, MediationContext};
pub use query::{percent_decode, DecodeError};

/// Property holding the code of the last mediation error seen by a message
pub const ERROR_CODE: &str = "ERROR_CODE";
/// Property holding the message of the last mediation error seen by a message
pub const ERROR_MESSAGE: &str = "ERROR_MESSAGE";
/// Property holding the name of the sequence that was running when the error occurred
pub const ERROR_SEQUENCE: &str = "ERROR_SEQUENCE";

// ============================================================================
// Inbound Message
// ============================================================================

/// A message as handed over by the transport collaborator.
///
/// Uses camelCase field names so transport adapters can emit it as JSON directly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    /// Message identifier; generated when absent
    #[serde(default)]
    pub id: Option<String>,
    /// Raw inbound URL including the query string
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub properties: HashMap<String, Value>,
    #[serde(default)]
    pub addressing: Addressing,
    /// Function parameter scopes, outermost first
    #[serde(default)]
    pub function_params: Vec<HashMap<String, String>>,
    #[serde(default)]
    pub response: bool,
}

/// WS-Addressing style routing addresses
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Addressing {
    pub to: Option<String>,
    pub from: Option<String>,
    pub reply_to: Option<String>,
    pub fault_to: Option<String>,
}
