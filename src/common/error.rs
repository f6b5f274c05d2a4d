use thiserror::Error;

use crate::client::services::websocket_client::WebSocketError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{message} (HTTP {status})")]
    Status { status: u16, message: String },

    #[error("Session missing or expired, please log in again")]
    Unauthorized,

    #[error("You are not allowed to perform this action")]
    Forbidden,

    #[error("Not logged in")]
    NotLoggedIn,

    #[error("No conversation is open")]
    NoConversation,

    #[error("Real-time connection is not available, message not sent")]
    NotConnected,

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WebSocketError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Text meant for the person at the keyboard.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Status { message, .. } => message.clone(),
            ClientError::Http(e) if e.is_timeout() => "The server took too long to answer".to_string(),
            ClientError::Http(e) if e.is_connect() => "Cannot reach the server".to_string(),
            other => other.to_string(),
        }
    }

    /// The caller has to go back to the login step.
    pub fn requires_login(&self) -> bool {
        matches!(self, ClientError::Unauthorized | ClientError::Forbidden | ClientError::NotLoggedIn)
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
