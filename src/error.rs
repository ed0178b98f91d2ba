use thiserror::Error;

/// Failure talking to the remote backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Remote rejected request with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Protocol error: {0}")]
    Protocol(String),
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Unknown entity type '{0}'")]
    UnknownEntity(String),

    #[error("Unknown conflict strategy '{0}' (expected smart, local or server)")]
    UnknownStrategy(String),

    #[error("Unknown operation '{0}'")]
    UnknownOperation(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Corrupt local data: {0}")]
    Corrupt(String),

    #[error("Record '{0}' not found")]
    RecordNotFound(String),

    #[error("Sync manager is not running")]
    ManagerStopped,
}

pub type Result<T> = std::result::Result<T, SyncError>;
