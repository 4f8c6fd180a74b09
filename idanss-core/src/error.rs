use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Message bus error: {0}")]
    Bus(String),

    #[error("Progress store error: {0}")]
    Store(String),

    #[error("Message bus is not connected")]
    NotConnected,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
