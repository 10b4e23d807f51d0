use thiserror::Error;

/// Errors raised while configuring or starting a node.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("config error: {reason}")]
    ConfigError { reason: String },

    #[error("storage error: {0}")]
    StorageError(#[from] casework_storage::error::StorageError),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}
