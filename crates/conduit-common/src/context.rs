//! Mediation context - the mutable per-message state

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::query::{self, DecodeError};
use crate::{Addressing, InboundMessage, ERROR_CODE, ERROR_MESSAGE, ERROR_SEQUENCE};

/// Details of the last mediation error seen by a message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultInfo {
    pub code: String,
    pub message: String,
    pub sequence: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// State of one in-flight message.
///
/// A context is owned by exactly one task for the lifetime of its message and is
/// mutated in place by mediators. Header names are case-insensitive.
#[derive(Debug, Clone)]
pub struct MediationContext {
    message_id: String,
    received_at: DateTime<Utc>,
    url: String,
    headers: HashMap<String, String>,
    properties: HashMap<String, Value>,
    payload: Value,
    addressing: Addressing,
    function_scopes: Vec<HashMap<String, String>>,
    active_sequences: Vec<String>,
    response: bool,
    fault: Option<FaultInfo>,
    sent_to: Vec<String>,
    dropped: bool,
}

impl MediationContext {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            received_at: Utc::now(),
            url: url.into(),
            headers: HashMap::new(),
            properties: HashMap::new(),
            payload: Value::Null,
            addressing: Addressing::default(),
            function_scopes: Vec::new(),
            active_sequences: Vec::new(),
            response: false,
            fault: None,
            sent_to: Vec::new(),
            dropped: false,
        }
    }

    /// Build a context from a message handed over by a transport
    pub fn from_inbound(message: InboundMessage) -> Self {
        let mut ctx = Self::new(message.url);
        if let Some(id) = message.id {
            ctx.message_id = id;
        }
        for (name, value) in message.headers {
            ctx.set_header(&name, value);
        }
        ctx.properties = message.properties;
        ctx.payload = message.payload;
        ctx.addressing = message.addressing;
        ctx.function_scopes = message.function_params;
        ctx.response = message.response;
        ctx
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    // ------------------------------------------------------------------------
    // Transport metadata
    // ------------------------------------------------------------------------

    /// Raw inbound URL, query string included
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn remove_header(&mut self, name: &str) -> Option<String> {
        self.headers.remove(&name.to_ascii_lowercase())
    }

    /// Headers keyed by lower-cased name
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Decoded query parameter; the first occurrence wins
    pub fn query_param(&self, name: &str) -> Result<Option<String>, DecodeError> {
        query::find_param(&self.url, name)
    }

    // ------------------------------------------------------------------------
    // Properties and payload
    // ------------------------------------------------------------------------

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.properties.insert(name.into(), value.into());
    }

    pub fn remove_property(&mut self, name: &str) -> Option<Value> {
        self.properties.remove(name)
    }

    pub fn properties(&self) -> &HashMap<String, Value> {
        &self.properties
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn set_payload(&mut self, payload: Value) {
        self.payload = payload;
    }

    // ------------------------------------------------------------------------
    // Addressing
    // ------------------------------------------------------------------------

    pub fn addressing(&self) -> &Addressing {
        &self.addressing
    }

    pub fn addressing_mut(&mut self) -> &mut Addressing {
        &mut self.addressing
    }

    pub fn is_response(&self) -> bool {
        self.response
    }

    pub fn set_response(&mut self, response: bool) {
        self.response = response;
    }

    // ------------------------------------------------------------------------
    // Function parameter scopes
    // ------------------------------------------------------------------------

    pub fn push_function_scope(&mut self, params: HashMap<String, String>) {
        self.function_scopes.push(params);
    }

    pub fn pop_function_scope(&mut self) -> Option<HashMap<String, String>> {
        self.function_scopes.pop()
    }

    /// Look a parameter up, innermost scope first
    pub fn function_param(&self, name: &str) -> Option<&str> {
        self.function_scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .map(String::as_str)
    }

    // ------------------------------------------------------------------------
    // Sequence nesting
    // ------------------------------------------------------------------------

    /// Mark a sequence as running; `false` if it is already running for this message
    pub fn enter_sequence(&mut self, name: &str) -> bool {
        if self.active_sequences.iter().any(|active| active == name) {
            return false;
        }
        self.active_sequences.push(name.to_string());
        true
    }

    pub fn exit_sequence(&mut self, name: &str) {
        if let Some(pos) = self.active_sequences.iter().rposition(|active| active == name) {
            self.active_sequences.truncate(pos);
        }
    }

    /// Sequences currently running, outermost first
    pub fn active_sequences(&self) -> &[String] {
        &self.active_sequences
    }

    // ------------------------------------------------------------------------
    // Outcome tracking
    // ------------------------------------------------------------------------

    /// Record a mediation error, mirroring it into the ERROR_* properties
    pub fn record_fault(&mut self, code: &str, message: &str, sequence: Option<&str>) {
        self.set_property(ERROR_CODE, code);
        self.set_property(ERROR_MESSAGE, message);
        match sequence {
            Some(name) => self.set_property(ERROR_SEQUENCE, name),
            None => {
                self.remove_property(ERROR_SEQUENCE);
            }
        }
        self.fault = Some(FaultInfo {
            code: code.to_string(),
            message: message.to_string(),
            sequence: sequence.map(str::to_string),
            occurred_at: Utc::now(),
        });
    }

    pub fn fault(&self) -> Option<&FaultInfo> {
        self.fault.as_ref()
    }

    pub fn mark_sent(&mut self, endpoint: &str) {
        self.sent_to.push(endpoint.to_string());
    }

    /// Endpoints this message has been handed to, in order
    pub fn sent_to(&self) -> &[String] {
        &self.sent_to
    }

    pub fn is_sent(&self) -> bool {
        !self.sent_to.is_empty()
    }

    pub fn mark_dropped(&mut self) {
        self.dropped = true;
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped
    }
}
