use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid scope: {0}")]
    InvalidScope(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Data provider is not initialized")]
    NotInitialized,
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// An asynchronous fault raised by a store connection, unrelated to any
/// particular operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Store fault: {0}")]
pub struct StoreFault(pub String);
