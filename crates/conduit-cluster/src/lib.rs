//! Conduit Cluster
//!
//! Round-robin cursors kept in Redis so that every instance of a cluster walks
//! the same rotation. Plug [`RedisCursorFactory`] into the mediation factory in
//! place of the in-process `LocalCursorFactory`.

pub mod cursor;
pub mod error;

pub use cursor::{cursor_key, RedisCursor, RedisCursorFactory};
pub use error::{ClusterError, Result};
