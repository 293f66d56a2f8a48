//! Error types for wealthsimple-realtime

use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Error, Debug)]
pub enum RealtimeError {
    #[error("Failed to connect after trying {attempts} endpoint(s): {last}")]
    Connect {
        attempts: usize,
        #[source]
        last: Box<RealtimeError>,
    },

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("Request timeout: {0}")]
    Timeout(String),

    #[error("Subscription client is not connected")]
    NotConnected,

    #[error("identity_id is required for identity updates subscription")]
    MissingIdentity,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RealtimeError>;
