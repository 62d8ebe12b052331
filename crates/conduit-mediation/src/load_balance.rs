//! Round-robin load balancing over endpoints
//!
//! The cursor is the only shared mutable state on the selection path. It is held
//! behind [`RoundRobinCursor`] so it can live in process memory ([`LocalCursor`])
//! or be shared by a cluster (see `conduit-cluster`). Liveness probes run after
//! the cursor has advanced, never while it is held.

use async_trait::async_trait;
use conduit_common::MediationContext;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::endpoint::{Endpoint, MessageSender};
use crate::error::MediationError;

#[async_trait]
pub trait RoundRobinCursor: Send + Sync {
    /// Return the current position and advance it, wrapping at `len`
    async fn advance(&self, len: usize) -> Result<usize, MediationError>;

    async fn reset(&self) -> Result<(), MediationError>;
}

/// Cursor kept in process memory
#[derive(Debug, Default)]
pub struct LocalCursor {
    current: Mutex<usize>,
}

impl LocalCursor {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoundRobinCursor for LocalCursor {
    async fn advance(&self, len: usize) -> Result<usize, MediationError> {
        let mut current = self.current.lock();
        let index = *current % len.max(1);
        *current = (index + 1) % len.max(1);
        Ok(index)
    }

    async fn reset(&self) -> Result<(), MediationError> {
        *self.current.lock() = 0;
        Ok(())
    }
}

/// Creates the cursor for each load balancer at build time
pub trait CursorFactory: Send + Sync {
    fn cursor(&self, load_balancer: &str) -> Arc<dyn RoundRobinCursor>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalCursorFactory;

impl CursorFactory for LocalCursorFactory {
    fn cursor(&self, _load_balancer: &str) -> Arc<dyn RoundRobinCursor> {
        Arc::new(LocalCursor::new())
    }
}

// ============================================================================
// Load balancer
// ============================================================================

pub struct LoadBalancer {
    name: String,
    endpoints: Vec<Arc<dyn Endpoint>>,
    cursor: Arc<dyn RoundRobinCursor>,
    failover: bool,
}

impl LoadBalancer {
    pub fn new(
        name: impl Into<String>,
        endpoints: Vec<Arc<dyn Endpoint>>,
        cursor: Arc<dyn RoundRobinCursor>,
    ) -> Self {
        Self {
            name: name.into(),
            endpoints,
            cursor,
            failover: true,
        }
    }

    pub fn with_failover(mut self, failover: bool) -> Self {
        self.failover = failover;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoints(&self) -> &[Arc<dyn Endpoint>] {
        &self.endpoints
    }

    pub fn failover(&self) -> bool {
        self.failover
    }

    /// Select the next active endpoint in rotation.
    ///
    /// Makes at most one attempt per endpoint; `None` when every attempt landed on
    /// an inactive endpoint or there are no endpoints at all.
    pub async fn next(&self, ctx: &MediationContext) -> Result<Option<Arc<dyn Endpoint>>, MediationError> {
        let count = self.endpoints.len();

        for attempt in 1..=count {
            let index = self.cursor.advance(count).await? % count;
            let endpoint = &self.endpoints[index];

            if endpoint.is_active(ctx).await {
                debug!(
                    load_balancer = %self.name,
                    endpoint = %endpoint.name(),
                    attempt,
                    "Endpoint selected"
                );
                return Ok(Some(Arc::clone(endpoint)));
            }

            debug!(
                load_balancer = %self.name,
                endpoint = %endpoint.name(),
                attempt,
                "Endpoint inactive, trying next"
            );
        }

        if count > 0 {
            warn!(load_balancer = %self.name, attempts = count, "No active endpoint");
        }
        Ok(None)
    }

    /// Restart rotation from the first endpoint
    pub async fn reset(&self) -> Result<(), MediationError> {
        self.cursor.reset().await?;
        info!(load_balancer = %self.name, "Load balancer reset");
        Ok(())
    }

    /// Hand the message to the next active endpoint.
    ///
    /// With failover enabled a failed send moves on to the next selection, up to
    /// one send per endpoint.
    pub async fn send(
        &self,
        ctx: &mut MediationContext,
        sender: &dyn MessageSender,
    ) -> Result<(), MediationError> {
        let attempts = if self.failover { self.endpoints.len().max(1) } else { 1 };
        let mut last_error = None;

        for attempt in 1..=attempts {
            let Some(endpoint) = self.next(ctx).await? else {
                break;
            };

            match sender.send(ctx, endpoint.as_ref()).await {
                Ok(()) => {
                    endpoint.record_success();
                    ctx.mark_sent(endpoint.name());
                    info!(
                        load_balancer = %self.name,
                        endpoint = %endpoint.name(),
                        address = %endpoint.address(),
                        "Message sent"
                    );
                    return Ok(());
                }
                Err(e) => {
                    endpoint.record_failure();
                    warn!(
                        load_balancer = %self.name,
                        endpoint = %endpoint.name(),
                        attempt,
                        error = %e,
                        "Send failed"
                    );
                    last_error = Some(MediationError::Send {
                        endpoint: endpoint.name().to_string(),
                        reason: e.0,
                    });
                }
            }
        }

        Err(last_error.unwrap_or_else(|| MediationError::NoActiveEndpoint(self.name.clone())))
    }
}

impl std::fmt::Debug for LoadBalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.endpoints.iter().map(|e| e.name()).collect();
        f.debug_struct("LoadBalancer")
            .field("name", &self.name)
            .field("endpoints", &names)
            .field("failover", &self.failover)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::SendError;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct TestEndpoint {
        name: String,
        active: AtomicBool,
        probes: AtomicUsize,
    }

    impl TestEndpoint {
        fn new(name: &str, active: bool) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                active: AtomicBool::new(active),
                probes: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Endpoint for TestEndpoint {
        fn name(&self) -> &str {
            &self.name
        }

        fn address(&self) -> &str {
            "test://"
        }

        async fn is_active(&self, _ctx: &MediationContext) -> bool {
            self.probes.fetch_add(1, Ordering::SeqCst);
            self.active.load(Ordering::SeqCst)
        }
    }

    /// Fails every send to the listed endpoints
    struct FailingSender {
        failing: HashSet<String>,
        attempts: Mutex<Vec<String>>,
    }

    impl FailingSender {
        fn new(failing: &[&str]) -> Self {
            Self {
                failing: failing.iter().map(|s| s.to_string()).collect(),
                attempts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MessageSender for FailingSender {
        async fn send(&self, _ctx: &MediationContext, endpoint: &dyn Endpoint) -> Result<(), SendError> {
            self.attempts.lock().push(endpoint.name().to_string());
            if self.failing.contains(endpoint.name()) {
                Err(SendError("connection refused".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn balancer(endpoints: &[Arc<TestEndpoint>]) -> LoadBalancer {
        let endpoints = endpoints
            .iter()
            .map(|e| Arc::clone(e) as Arc<dyn Endpoint>)
            .collect();
        LoadBalancer::new("lb", endpoints, Arc::new(LocalCursor::new()))
    }

    async fn pick(lb: &LoadBalancer, ctx: &MediationContext) -> Option<String> {
        lb.next(ctx).await.unwrap().map(|e| e.name().to_string())
    }

    #[tokio::test]
    async fn test_round_robin_order_and_wrap() {
        let ctx = MediationContext::new("http://localhost/");
        let lb = balancer(&[
            TestEndpoint::new("a", true),
            TestEndpoint::new("b", true),
            TestEndpoint::new("c", true),
        ]);

        let mut picks = Vec::new();
        for _ in 0..4 {
            picks.push(pick(&lb, &ctx).await.unwrap());
        }
        assert_eq!(picks, ["a", "b", "c", "a"]);
    }

    #[tokio::test]
    async fn test_skips_inactive() {
        let ctx = MediationContext::new("http://localhost/");
        let lb = balancer(&[
            TestEndpoint::new("a", true),
            TestEndpoint::new("b", false),
            TestEndpoint::new("c", true),
        ]);

        assert_eq!(pick(&lb, &ctx).await.as_deref(), Some("a"));
        assert_eq!(pick(&lb, &ctx).await.as_deref(), Some("c"));
        assert_eq!(pick(&lb, &ctx).await.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_all_inactive_returns_none_after_one_pass() {
        let ctx = MediationContext::new("http://localhost/");
        let endpoints = [TestEndpoint::new("a", false), TestEndpoint::new("b", false)];
        let lb = balancer(&endpoints);

        assert!(lb.next(&ctx).await.unwrap().is_none());
        let probes: usize = endpoints.iter().map(|e| e.probes.load(Ordering::SeqCst)).sum();
        assert_eq!(probes, 2);
    }

    #[tokio::test]
    async fn test_empty_returns_none() {
        let ctx = MediationContext::new("http://localhost/");
        let lb = balancer(&[]);
        assert!(lb.next(&ctx).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reset_restarts_rotation() {
        let ctx = MediationContext::new("http://localhost/");
        let lb = balancer(&[TestEndpoint::new("a", true), TestEndpoint::new("b", true)]);

        assert_eq!(pick(&lb, &ctx).await.as_deref(), Some("a"));
        lb.reset().await.unwrap();
        assert_eq!(pick(&lb, &ctx).await.as_deref(), Some("a"));
        assert_eq!(pick(&lb, &ctx).await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_concurrent_selection_is_even() {
        let ctx = Arc::new(MediationContext::new("http://localhost/"));
        let lb = Arc::new(balancer(&[
            TestEndpoint::new("a", true),
            TestEndpoint::new("b", true),
            TestEndpoint::new("c", true),
            TestEndpoint::new("d", true),
        ]));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let lb = Arc::clone(&lb);
            let ctx = Arc::clone(&ctx);
            handles.push(tokio::spawn(async move {
                let mut names = Vec::new();
                for _ in 0..50 {
                    names.push(pick(&lb, &ctx).await.unwrap());
                }
                names
            }));
        }

        let mut counts = std::collections::HashMap::new();
        for handle in handles {
            for name in handle.await.unwrap() {
                *counts.entry(name).or_insert(0) += 1;
            }
        }
        assert!(counts.values().all(|&c| c == 100), "uneven distribution: {:?}", counts);
    }

    #[tokio::test]
    async fn test_send_fails_over() {
        let mut ctx = MediationContext::new("http://localhost/");
        let lb = balancer(&[TestEndpoint::new("a", true), TestEndpoint::new("b", true)]);
        let sender = FailingSender::new(&["a"]);

        lb.send(&mut ctx, &sender).await.unwrap();

        assert_eq!(*sender.attempts.lock(), ["a", "b"]);
        assert_eq!(ctx.sent_to(), ["b"]);
    }

    #[tokio::test]
    async fn test_send_without_failover_reports_first_failure() {
        let mut ctx = MediationContext::new("http://localhost/");
        let lb = balancer(&[TestEndpoint::new("a", true), TestEndpoint::new("b", true)])
            .with_failover(false);
        let sender = FailingSender::new(&["a"]);

        let err = lb.send(&mut ctx, &sender).await.unwrap_err();

        assert_eq!(
            err,
            MediationError::Send {
                endpoint: "a".to_string(),
                reason: "connection refused".to_string()
            }
        );
        assert!(!ctx.is_sent());
    }

    #[tokio::test]
    async fn test_send_with_no_active_endpoint() {
        let mut ctx = MediationContext::new("http://localhost/");
        let lb = balancer(&[TestEndpoint::new("a", false)]);
        let sender = FailingSender::new(&[]);

        let err = lb.send(&mut ctx, &sender).await.unwrap_err();
        assert_eq!(err, MediationError::NoActiveEndpoint("lb".to_string()));
        assert!(sender.attempts.lock().is_empty());
    }

    #[test]
    fn test_local_cursor_wraps() {
        let cursor = LocalCursor::new();
        let picks: Vec<usize> = (0..5)
            .map(|_| tokio_test::block_on(cursor.advance(2)).unwrap())
            .collect();
        assert_eq!(picks, [0, 1, 0, 1, 0]);
    }
}
