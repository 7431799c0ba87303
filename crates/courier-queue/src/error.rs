use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid queue token: {0}")]
    InvalidToken(String),

    #[error("queue is shutting down")]
    Stopped,
}

pub type Result<T> = std::result::Result<T, QueueError>;
