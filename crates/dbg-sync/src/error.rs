use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Failed to attach to debug endpoint: {0}")]
    AttachFailure(TransportError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Remote command `{command}` failed: {message}")]
    CommandFailed { command: String, message: String },
    #[error("Failed to decode `{command}` response: {source}")]
    Decode {
        command: String,
        source: serde_json::Error,
    },
    #[error("No active debug session")]
    NotAttached,
    #[error("Session detached while `{0}` was in flight")]
    Detached(String),
    #[error("Invalid session configuration: {0}")]
    Config(serde_json::Error),
    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("failed to open transport: {0}")]
    Open(String),
    #[error("failed to send message: {0}")]
    Send(String),
    #[error("transport closed")]
    Closed,
}
