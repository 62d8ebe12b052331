//! Redis Cursor Integration Tests
//!
//! Requires a running Redis; run with `--features redis-tests`.
//! Tests for:
//! - Rotation and wrap-around through Redis
//! - Cursors on the same key sharing one rotation
//! - Reset
//! - Concurrent advances staying evenly distributed

#![cfg(feature = "redis-tests")]

use std::collections::HashMap;
use std::sync::Arc;

use conduit_cluster::{cursor_key, RedisCursorFactory};
use conduit_common::MediationContext;
use conduit_config::ClusterConfig;
use conduit_mediation::{AddressEndpoint, CursorFactory, Endpoint, LoadBalancer, RoundRobinCursor};

async fn factory() -> RedisCursorFactory {
    let config = ClusterConfig {
        enabled: true,
        redis_url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
        key_prefix: format!("conduit-test-{}", uuid::Uuid::new_v4()),
        cas_retries: 64,
    };
    RedisCursorFactory::connect(&config).await.expect("Redis must be running for redis-tests")
}

#[tokio::test]
async fn test_rotation_wraps() {
    let cursor = factory().await.cursor("orders");

    let mut picks = Vec::new();
    for _ in 0..5 {
        picks.push(cursor.advance(3).await.unwrap());
    }
    assert_eq!(picks, [0, 1, 2, 0, 1]);
}

#[tokio::test]
async fn test_cursors_share_rotation() {
    let factory = factory().await;
    let first = factory.cursor("orders");
    let second = factory.cursor("orders");

    assert_eq!(first.advance(4).await.unwrap(), 0);
    assert_eq!(second.advance(4).await.unwrap(), 1);
    assert_eq!(first.advance(4).await.unwrap(), 2);

    // Different load balancers do not interfere
    assert_eq!(factory.cursor("billing").advance(4).await.unwrap(), 0);
}

#[tokio::test]
async fn test_reset() {
    let cursor = factory().await.cursor("orders");

    cursor.advance(3).await.unwrap();
    cursor.advance(3).await.unwrap();
    cursor.reset().await.unwrap();

    assert_eq!(cursor.advance(3).await.unwrap(), 0);
}

#[tokio::test]
async fn test_concurrent_instances_share_load_evenly() {
    let factory = factory().await;
    let ctx = Arc::new(MediationContext::new("http://host/"));

    let mut handles = Vec::new();
    for _ in 0..4 {
        // One balancer per simulated instance, all on the same Redis key
        let endpoints: Vec<Arc<dyn Endpoint>> = ["a", "b", "c"]
            .iter()
            .map(|n| Arc::new(AddressEndpoint::new(*n, format!("http://{}", n))) as Arc<dyn Endpoint>)
            .collect();
        let lb = LoadBalancer::new("orders", endpoints, factory.cursor("orders"));
        let ctx = Arc::clone(&ctx);

        handles.push(tokio::spawn(async move {
            let mut names = Vec::new();
            for _ in 0..30 {
                let endpoint = lb.next(&ctx).await.unwrap().unwrap();
                names.push(endpoint.name().to_string());
            }
            names
        }));
    }

    let mut counts: HashMap<String, usize> = HashMap::new();
    for handle in handles {
        for name in handle.await.unwrap() {
            *counts.entry(name).or_default() += 1;
        }
    }
    assert_eq!(counts.len(), 3);
    assert!(counts.values().all(|&c| c == 40), "uneven distribution: {:?}", counts);
}

#[test]
fn test_key_matches_factory_prefix() {
    assert_eq!(cursor_key("lb", "orders"), "lb.orders.current");
}
