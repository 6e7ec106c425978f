use thiserror::Error;

/// Gateway-wide error taxonomy. Every variant is tagged below with the
/// bucket it belongs to (Transient transport / Configuration-validation /
/// Persisted-state corruption / Fatal); `.code()` is the stable string
/// surfaced to WS/HTTP clients.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Configuration/validation bucket.
    #[error("configuration error: {0}")]
    Config(String),

    /// Configuration/validation bucket: an unknown model alias or malformed
    /// model reference was used.
    #[error("invalid model reference: {0}")]
    InvalidModelRef(String),

    /// Transient transport bucket.
    #[error("LLM provider error: {0}")]
    LlmProvider(String),

    /// Transient transport bucket.
    #[error("channel error ({channel}): {reason}")]
    Channel { channel: String, reason: String },

    /// WS/HTTP protocol bucket (treated as Configuration/validation: caller
    /// sent something the server can't interpret).
    #[error("unknown method: {method}")]
    MethodNotFound { method: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("path traversal rejected: {0}")]
    PathTraversal(String),

    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// Persisted-state corruption bucket. Never surfaced to a user; logged
    /// and the caller proceeds with a zero value.
    #[error("corrupt persisted state at {path}: {reason}")]
    StateCorrupt { path: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Fatal bucket: startup aborts non-zero.
    #[error("fatal startup error: {0}")]
    Fatal(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Short, stable error code surfaced to WS `res` frames and HTTP JSON
    /// error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Config(_) => "config_error",
            GatewayError::InvalidModelRef(_) => "invalid_model_ref",
            GatewayError::LlmProvider(_) => "llm_provider_error",
            GatewayError::Channel { .. } => "channel_error",
            GatewayError::MethodNotFound { .. } => "method_not_found",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::PathTraversal(_) => "path_traversal",
            GatewayError::PayloadTooLarge { .. } => "payload_too_large",
            GatewayError::StateCorrupt { .. } => "state_corrupt",
            GatewayError::Serialization(_) => "serialization_error",
            GatewayError::Io(_) => "io_error",
            GatewayError::Fatal(_) => "fatal_error",
            GatewayError::Internal(_) => "internal_error",
        }
    }

    /// HTTP status the ManagementAPI should map this error to.
    pub fn http_status(&self) -> u16 {
        match self {
            GatewayError::PathTraversal(_) => 403,
            GatewayError::NotFound(_) => 404,
            GatewayError::Config(_)
            | GatewayError::InvalidModelRef(_)
            | GatewayError::MethodNotFound { .. }
            | GatewayError::PayloadTooLarge { .. } => 400,
            _ => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
