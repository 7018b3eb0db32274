//! Error types for the engine's IO-facing operations.
//!
//! Decode and normalization problems never surface here: those are logged
//! and dropped where they happen.

use thiserror::Error;

/// Errors from the socket layer
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("WebSocket handshake failed: {0}")]
    Handshake(String),

    #[error("WebSocket error: {0}")]
    Socket(String),

    #[error("Invalid WebSocket URL: {0}")]
    InvalidUrl(String),
}

/// Errors from the REST collaborator
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Backend returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Workspace needs a git repository before a session can start: {message}")]
    GitInitRequired { message: String },

    #[error("Unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Errors from approval decisions
#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("No pending approval with id {0}")]
    UnknownRequest(String),

    #[error("Approval decision could not be delivered: {0}")]
    Delivery(#[source] ApiError),
}

/// Errors from controller-level operations
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Session start failed: {0}")]
    Start(#[source] ApiError),

    #[error("Workspace needs a git repository: {message}")]
    GitInitRequired { message: String },

    #[error("Could not connect to session {session_id}: {source}")]
    Connect {
        session_id: String,
        #[source]
        source: TransportError,
    },

    #[error("History refresh failed: {0}")]
    History(#[source] ApiError),

    #[error(transparent)]
    Approval(#[from] ApprovalError),

    #[error("No task is attached")]
    NoTask,
}

impl ControllerError {
    /// Start failures that need caller-side remediation rather than a retry.
    pub fn requires_git_init(&self) -> bool {
        matches!(self, ControllerError::GitInitRequired { .. })
    }
}
