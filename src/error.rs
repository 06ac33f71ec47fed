//! Error types for the toolwire protocol engine.

use std::io;

use thiserror::Error;

use crate::mcp::protocol::{error_codes, JsonRpcError, RequestId};

/// Result type alias for toolwire operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for toolwire.
#[derive(Error, Debug)]
pub enum Error {
    // ===== Connection Lifecycle =====
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<io::Error>,
    },

    #[error("Initialization failed: {message}")]
    Initialization {
        message: String,
        #[source]
        source: Option<Box<Error>>,
    },

    #[error("Peer disconnected: {0}")]
    PeerDisconnected(String),

    #[error("Invalid client state: {0}")]
    InvalidState(String),

    // ===== Protocol Errors =====
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Remote error for {method} (id {id}): {error}")]
    Remote {
        method: String,
        id: RequestId,
        error: JsonRpcError,
    },

    // ===== Registry / Dispatch Errors =====
    #[error("Tool already registered: {0}")]
    DuplicateTool(String),

    #[error("Unknown tool: {0}")]
    ToolNotFound(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidToolArguments(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    // ===== I/O Errors =====
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a connection error with an underlying I/O cause.
    pub fn connection(message: impl Into<String>, source: io::Error) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Wrap a handshake failure, keeping the original error as the source.
    pub fn initialization(message: impl Into<String>, source: Error) -> Self {
        Self::Initialization {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Whether this error means the peer went away rather than misbehaved.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::PeerDisconnected(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }

    /// JSON-RPC error code used when this error is reported to a peer.
    pub fn rpc_code(&self) -> i32 {
        match self {
            Self::ToolNotFound(_) | Self::InvalidToolArguments(_) => error_codes::INVALID_PARAMS,
            Self::Protocol(_) => error_codes::INVALID_REQUEST,
            Self::Remote { error, .. } => error.code,
            _ => error_codes::INTERNAL_ERROR,
        }
    }

    /// Convert into the JSON-RPC error object sent back to a peer.
    pub fn to_rpc_error(&self) -> JsonRpcError {
        match self {
            Self::ToolExecutionFailed(message) => JsonRpcError::with_data(
                error_codes::INTERNAL_ERROR,
                "Tool execution failed",
                serde_json::Value::String(message.clone()),
            ),
            Self::Remote { error, .. } => error.clone(),
            other => JsonRpcError::new(other.rpc_code(), other.to_string()),
        }
    }
}
