//! Error types for the gatewatch client

/// Errors that can occur in the gatewatch client
#[derive(Debug, thiserror::Error)]
pub enum GatewatchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// The backend answered, but refused the request
    #[error("Backend error: {0}")]
    Api(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    /// Shut down before the operation finished
    #[error("Cancelled")]
    Cancelled,
}

/// Result type alias for gatewatch operations
pub type Result<T> = std::result::Result<T, GatewatchError>;

/// Why a session could not be established.
///
/// None of these are propagated past the session validator; they decide
/// which terminal state it publishes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No token stored. A normal logged-out state.
    #[error("No stored credential")]
    NoCredential,

    /// The backend was reached and did not accept the token
    #[error("Validation rejected: {0}")]
    Rejected(String),

    /// The request did not complete. Fails closed like `Rejected`.
    #[error("Validation request failed: {0}")]
    Network(String),

    /// Superseded or torn down before completion. Never surfaced.
    #[error("Validation cancelled")]
    Cancelled,
}

impl SessionError {
    /// Whether this outcome must wipe the credential store
    pub fn clears_credentials(&self) -> bool {
        matches!(
            self,
            SessionError::NoCredential | SessionError::Rejected(_) | SessionError::Network(_)
        )
    }
}
