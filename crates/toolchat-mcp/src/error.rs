use thiserror::Error;

#[derive(Error, Debug)]
pub enum McpError {
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Server returned error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Connection closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, McpError>;
