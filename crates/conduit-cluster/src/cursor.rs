//! Redis-backed round-robin cursor
//!
//! The cursor lives under `<prefix>.<load balancer>.current`. Advancing is an
//! optimistic loop: read the current value, then swap in the successor with a
//! Lua compare-and-set that only succeeds if nobody moved the cursor meanwhile.

use async_trait::async_trait;
use conduit_config::ClusterConfig;
use conduit_mediation::{CursorFactory, MediationError, RoundRobinCursor};
use redis::aio::ConnectionManager;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{ClusterError, Result};

/// Swap ARGV[2] in if the key still holds ARGV[1]; an empty ARGV[1] means unset
const COMPARE_AND_SET: &str = r#"
    local current = redis.call("GET", KEYS[1])
    if (current == false and ARGV[1] == "") or current == ARGV[1] then
        redis.call("SET", KEYS[1], ARGV[2])
        return 1
    else
        return 0
    end
"#;

pub fn cursor_key(prefix: &str, load_balancer: &str) -> String {
    format!("{}.{}.current", prefix, load_balancer)
}

/// Position the cursor points at for a stored value; unreadable values restart at 0
fn position(stored: Option<&str>, len: usize) -> usize {
    stored
        .and_then(|value| value.trim().parse::<usize>().ok())
        .map(|value| value % len)
        .unwrap_or(0)
}

pub struct RedisCursor {
    conn: ConnectionManager,
    key: String,
    cas_retries: u32,
}

impl RedisCursor {
    pub fn new(conn: ConnectionManager, key: impl Into<String>, cas_retries: u32) -> Self {
        Self {
            conn,
            key: key.into(),
            cas_retries: cas_retries.max(1),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    async fn try_advance(&self, len: usize) -> Result<usize> {
        let mut conn = self.conn.clone();

        for attempt in 1..=self.cas_retries {
            let stored: Option<String> = redis::cmd("GET")
                .arg(&self.key)
                .query_async(&mut conn)
                .await?;

            let index = position(stored.as_deref(), len);
            let next = (index + 1) % len;

            let swapped: i32 = redis::Script::new(COMPARE_AND_SET)
                .key(&self.key)
                .arg(stored.as_deref().unwrap_or(""))
                .arg(next)
                .invoke_async(&mut conn)
                .await?;

            if swapped == 1 {
                return Ok(index);
            }
            debug!(key = %self.key, attempt, "Cursor moved concurrently, retrying");
        }

        Err(ClusterError::Contention {
            key: self.key.clone(),
            attempts: self.cas_retries,
        })
    }
}

#[async_trait]
impl RoundRobinCursor for RedisCursor {
    async fn advance(&self, len: usize) -> std::result::Result<usize, MediationError> {
        if len == 0 {
            return Ok(0);
        }
        self.try_advance(len).await.map_err(|e| {
            warn!(key = %self.key, error = %e, "Cursor advance failed");
            MediationError::from(e)
        })
    }

    async fn reset(&self) -> std::result::Result<(), MediationError> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(&self.key)
            .arg(0)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| MediationError::from(ClusterError::from(e)))?;
        debug!(key = %self.key, "Cursor reset");
        Ok(())
    }
}

/// Hands every load balancer a cursor on a shared Redis connection
#[derive(Clone)]
pub struct RedisCursorFactory {
    conn: ConnectionManager,
    key_prefix: String,
    cas_retries: u32,
}

impl RedisCursorFactory {
    pub async fn connect(config: &ClusterConfig) -> Result<Self> {
        let client = redis::Client::open(config.redis_url.as_str())
            .map_err(|e| ClusterError::Connection(e.to_string()))?;
        let conn = ConnectionManager::new(client).await?;

        info!(
            redis_url = %config.redis_url,
            key_prefix = %config.key_prefix,
            "Connected to Redis for shared load balancer state"
        );

        Ok(Self::new(conn, config.key_prefix.clone(), config.cas_retries))
    }

    pub fn new(conn: ConnectionManager, key_prefix: impl Into<String>, cas_retries: u32) -> Self {
        Self {
            conn,
            key_prefix: key_prefix.into(),
            cas_retries,
        }
    }
}

impl CursorFactory for RedisCursorFactory {
    fn cursor(&self, load_balancer: &str) -> Arc<dyn RoundRobinCursor> {
        Arc::new(RedisCursor::new(
            self.conn.clone(),
            cursor_key(&self.key_prefix, load_balancer),
            self.cas_retries,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_key_format() {
        assert_eq!(cursor_key("lb", "orders"), "lb.orders.current");
        assert_eq!(cursor_key("prod.eu", "billing"), "prod.eu.billing.current");
    }

    #[test]
    fn test_position_from_stored_value() {
        assert_eq!(position(None, 3), 0);
        assert_eq!(position(Some("2"), 3), 2);
        // Endpoint list shrank since the value was written
        assert_eq!(position(Some("5"), 3), 2);
        assert_eq!(position(Some("garbage"), 3), 0);
        assert_eq!(position(Some("-1"), 3), 0);
    }

    #[test]
    fn test_contention_maps_to_cursor_error() {
        let err: MediationError = ClusterError::Contention {
            key: "lb.orders.current".to_string(),
            attempts: 16,
        }
        .into();

        assert_eq!(err.code(), "CURSOR_UNAVAILABLE");
        assert!(err.to_string().contains("lb.orders.current"));
    }
}
