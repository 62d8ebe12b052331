//! Error types for the cluster module

use conduit_mediation::MediationError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis operation error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Cursor contention on '{key}' after {attempts} attempts")]
    Contention { key: String, attempts: u32 },
}

impl From<ClusterError> for MediationError {
    fn from(err: ClusterError) -> Self {
        MediationError::Cursor(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClusterError>;
