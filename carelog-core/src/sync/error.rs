//! Sync error types.

use thiserror::Error;

/// Errors that can occur while talking to the sync server.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Sync is not configured
    #[error("Sync not configured. Add server_url and api_key to config.")]
    NotConfigured,
    /// The request could not reach the server
    #[error("Connection error: {0}")]
    ConnectionError(String),
    /// The request did not complete within the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// The server answered with a non-success status
    #[error("Server returned status {status}: {message}")]
    ServerError { status: u16, message: String },
    /// The response body was not the expected shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    /// The server processed the request but listed the event as failed
    #[error("Server rejected event {0}")]
    Rejected(String),
}

impl SyncError {
    /// Transport-level failures are retried; nothing else changes on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::ConnectionError(_) | SyncError::Timeout => true,
            SyncError::ServerError { status, .. } => *status >= 500,
            SyncError::NotConfigured | SyncError::InvalidResponse(_) | SyncError::Rejected(_) => {
                false
            }
        }
    }
}
