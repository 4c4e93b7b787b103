use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The store failed or a transaction aborted; nothing was partially applied.
    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
