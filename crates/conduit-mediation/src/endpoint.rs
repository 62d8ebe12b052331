//! Outbound endpoints and the sender collaborator
//!
//! An [`Endpoint`] is a destination that can report whether it is currently able
//! to take traffic. [`AddressEndpoint`] guards a static address with a circuit
//! breaker fed by send outcomes, and can be suspended by an operator.
//! Delivering a message is the job of a [`MessageSender`].

use async_trait::async_trait;
use conduit_common::MediationContext;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[async_trait]
pub trait Endpoint: Send + Sync {
    fn name(&self) -> &str;

    fn address(&self) -> &str;

    /// Liveness probe consulted by the load balancer before selection
    async fn is_active(&self, ctx: &MediationContext) -> bool;

    fn record_success(&self) {}

    fn record_failure(&self) {}
}

// ============================================================================
// Circuit breaker
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerState {
    circuit: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    opened_at: Option<Instant>,
}

/// Per-endpoint breaker; opens after `failure_threshold` consecutive failures
#[derive(Debug)]
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    failure_threshold: u32,
    success_threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, success_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(BreakerState {
                circuit: CircuitState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                opened_at: None,
            }),
            failure_threshold: failure_threshold.max(1),
            success_threshold: success_threshold.max(1),
            reset_timeout,
        }
    }

    /// Whether a request may go through; an expired open breaker moves to half-open
    pub fn allow_request(&self) -> bool {
        let mut state = self.state.lock();
        match state.circuit {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let expired = state
                    .opened_at
                    .is_some_and(|opened| opened.elapsed() >= self.reset_timeout);
                if expired {
                    state.circuit = CircuitState::HalfOpen;
                    state.half_open_successes = 0;
                    debug!("Circuit breaker half-open, probing endpoint");
                }
                expired
            }
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock();
        match state.circuit {
            CircuitState::HalfOpen => {
                state.half_open_successes += 1;
                if state.half_open_successes >= self.success_threshold {
                    state.circuit = CircuitState::Closed;
                    state.consecutive_failures = 0;
                    state.opened_at = None;
                    info!(successes = state.half_open_successes, "Circuit breaker closed");
                }
            }
            CircuitState::Closed => state.consecutive_failures = 0,
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        match state.circuit {
            CircuitState::Closed => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.failure_threshold {
                    state.circuit = CircuitState::Open;
                    state.opened_at = Some(Instant::now());
                    warn!(failures = state.consecutive_failures, "Circuit breaker opened");
                }
            }
            CircuitState::HalfOpen => {
                state.circuit = CircuitState::Open;
                state.opened_at = Some(Instant::now());
                state.half_open_successes = 0;
                warn!("Circuit breaker re-opened by a failed probe");
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state.lock().circuit
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state.lock().consecutive_failures
    }

    /// Force the breaker closed
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.circuit = CircuitState::Closed;
        state.consecutive_failures = 0;
        state.half_open_successes = 0;
        state.opened_at = None;
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5, 1, Duration::from_secs(30))
    }
}

// ============================================================================
// Address endpoint
// ============================================================================

/// A static address guarded by a circuit breaker
pub struct AddressEndpoint {
    name: String,
    address: String,
    breaker: CircuitBreaker,
    suspended: AtomicBool,
}

impl AddressEndpoint {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self::with_breaker(name, address, CircuitBreaker::default())
    }

    pub fn with_breaker(
        name: impl Into<String>,
        address: impl Into<String>,
        breaker: CircuitBreaker,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            breaker,
            suspended: AtomicBool::new(false),
        }
    }

    /// Take the endpoint out of rotation until [`resume`](Self::resume)
    pub fn suspend(&self) {
        if !self.suspended.swap(true, Ordering::SeqCst) {
            info!(endpoint = %self.name, "Endpoint suspended");
        }
    }

    pub fn resume(&self) {
        if self.suspended.swap(false, Ordering::SeqCst) {
            self.breaker.reset();
            info!(endpoint = %self.name, "Endpoint resumed");
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }
}

#[async_trait]
impl Endpoint for AddressEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn address(&self) -> &str {
        &self.address
    }

    async fn is_active(&self, _ctx: &MediationContext) -> bool {
        !self.is_suspended() && self.breaker.allow_request()
    }

    fn record_success(&self) {
        self.breaker.record_success();
    }

    fn record_failure(&self) {
        self.breaker.record_failure();
        if self.breaker.state() == CircuitState::Open {
            debug!(endpoint = %self.name, address = %self.address, "Endpoint out of rotation");
        }
    }
}

impl std::fmt::Debug for AddressEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressEndpoint")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("circuit", &self.breaker.state())
            .field("suspended", &self.is_suspended())
            .finish()
    }
}

// ============================================================================
// Sender
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct SendError(pub String);

/// Delivers a mediated message to a selected endpoint
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, ctx: &MediationContext, endpoint: &dyn Endpoint) -> Result<(), SendError>;
}

/// A message handed to an endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dispatch {
    pub message_id: String,
    pub endpoint: String,
    pub address: String,
    pub headers: HashMap<String, String>,
    pub properties: HashMap<String, Value>,
    pub payload: Value,
}

impl Dispatch {
    pub fn new(ctx: &MediationContext, endpoint: &dyn Endpoint) -> Self {
        Self {
            message_id: ctx.message_id().to_string(),
            endpoint: endpoint.name().to_string(),
            address: endpoint.address().to_string(),
            headers: ctx.headers().clone(),
            properties: ctx.properties().clone(),
            payload: ctx.payload().clone(),
        }
    }
}

/// Forwards dispatches to a channel drained by the transport
#[derive(Debug, Clone)]
pub struct ChannelSender {
    tx: mpsc::UnboundedSender<Dispatch>,
}

impl ChannelSender {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Dispatch>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl MessageSender for ChannelSender {
    async fn send(&self, ctx: &MediationContext, endpoint: &dyn Endpoint) -> Result<(), SendError> {
        self.tx
            .send(Dispatch::new(ctx, endpoint))
            .map_err(|_| SendError("dispatch channel closed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breaker_opens_after_threshold() {
        let cb = CircuitBreaker::new(3, 1, Duration::from_secs(60));

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow_request());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let cb = CircuitBreaker::new(2, 1, Duration::from_secs(60));

        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 1);
    }

    #[test]
    fn test_half_open_after_timeout() {
        let cb = CircuitBreaker::new(1, 2, Duration::from_millis(10));

        cb.record_failure();
        assert!(!cb.allow_request());

        std::thread::sleep(Duration::from_millis(20));
        assert!(cb.allow_request());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_failed_probe_reopens() {
        let cb = CircuitBreaker::new(1, 1, Duration::from_millis(0));

        cb.record_failure();
        assert!(cb.allow_request());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_suspend_and_resume() {
        let ctx = MediationContext::new("http://localhost/");
        let ep = AddressEndpoint::new("a", "http://a");

        assert!(ep.is_active(&ctx).await);
        ep.suspend();
        assert!(!ep.is_active(&ctx).await);
        ep.resume();
        assert!(ep.is_active(&ctx).await);
    }

    #[tokio::test]
    async fn test_channel_sender_forwards_dispatch() {
        let (sender, mut rx) = ChannelSender::new();
        let mut ctx = MediationContext::new("http://localhost/orders");
        ctx.set_header("X-Trace", "t-1");
        let ep = AddressEndpoint::new("orders-a", "http://orders-a/orders");

        sender.send(&ctx, &ep).await.unwrap();

        let dispatch = rx.recv().await.unwrap();
        assert_eq!(dispatch.endpoint, "orders-a");
        assert_eq!(dispatch.address, "http://orders-a/orders");
        assert_eq!(dispatch.message_id, ctx.message_id());
        assert_eq!(dispatch.headers.get("x-trace").map(String::as_str), Some("t-1"));
    }

    #[tokio::test]
    async fn test_channel_sender_closed() {
        let (sender, rx) = ChannelSender::new();
        drop(rx);
        let ctx = MediationContext::new("http://localhost/");
        let ep = AddressEndpoint::new("a", "http://a");

        assert!(sender.send(&ctx, &ep).await.is_err());
    }
}
