use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorType {
    InvalidRequestError,
    RateLimitError,
    AuthenticationError,
    ServerError,
    #[serde(other)]
    Unknown,
}

/// Error payload carried by `error` frames, both the ones the model emits and
/// the ones the relay originates towards the client.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ServerError {
    #[serde(rename = "type")]
    pub error_type: ApiErrorType,
    pub code: Option<String>,
    pub message: String,
    pub param: Option<String>,
    pub event_id: Option<String>,
}

impl ServerError {
    #[must_use]
    pub fn relay(code: &str, message: impl Into<String>) -> Self {
        Self {
            error_type: ApiErrorType::ServerError,
            code: Some(code.to_string()),
            message: message.into(),
            param: None,
            event_id: None,
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Client socket error: {0}")]
    Axum(#[from] axum::Error),

    #[error("HTTP protocol error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse or serialize JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Header error: {0}")]
    Header(#[from] tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Realtime API error: {0:?}")]
    Api(ServerError),

    #[error("The connection was closed unexpectedly")]
    ConnectionClosed,

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("tool call timed out after {0:?}")]
    ToolTimeout(Duration),

    #[error("Document store error: {0}")]
    Store(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Ingestion error: {0}")]
    Ingestion(String),
}

impl Error {
    /// Whether the model endpoint refused the configured credentials.
    #[must_use]
    pub fn is_auth_rejection(&self) -> bool {
        match self {
            Self::Credential(_) => true,
            Self::WebSocket(tokio_tungstenite::tungstenite::Error::Http(response)) => {
                matches!(response.status().as_u16(), 401 | 403)
            }
            Self::Api(err) => err.error_type == ApiErrorType::AuthenticationError,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
