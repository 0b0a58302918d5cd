use stratum_core::AppError;

#[derive(Debug, thiserror::Error)]
pub enum SynchroError {
    #[error("failed to connect to broker: {0}")]
    Connect(String),

    #[error("failed to publish invalidation: {0}")]
    Publish(String),

    #[error("failed to subscribe: {0}")]
    Subscribe(String),

    #[error("failed to encode/decode invalidation: {0}")]
    Codec(#[from] serde_json::Error),
}

impl From<SynchroError> for AppError {
    fn from(err: SynchroError) -> Self {
        AppError::unexpected(err.to_string())
    }
}
