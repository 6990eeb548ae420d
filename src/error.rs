use thiserror::Error;

/// Errors that can occur while issuing or serving correlated requests
#[derive(Error, Debug)]
pub enum RpcError {
    /// No reply bearing the request's correlation id arrived in time
    #[error("request timed out")]
    Timeout,

    /// The reply subscription ended (broker connection lost or transport closed)
    #[error("broker connection lost")]
    ConnectionLost,

    /// Non-retryable transport failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Transient failure; the retry layer may attempt the request again
    #[error("transport error (retryable): {0}")]
    TransportRetryable(String),

    /// A required builder field was not provided
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    /// Builder fields that cannot be combined
    #[error("configuration conflict: {0}")]
    ConfigConflict(String),

    /// Reply payload was not valid UTF-8
    #[error("reply is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for RPC operations
pub type Result<T> = std::result::Result<T, RpcError>;
