use thiserror::Error;

/// Errors produced by the node protocol layer.
///
/// Command-level failures are not represented here: those are answered on
/// the wire as [`crate::messages::RpcError`] values.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("tunnel error: {0}")]
    Tunnel(String),

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("not paired with a gateway")]
    NotPaired,

    #[error("a connection attempt is in progress")]
    AttemptInProgress,

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("keystore error: {0}")]
    Keystore(String),

    #[error("engine stopped")]
    EngineStopped,

    #[error("timeout")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type NodeResult<T> = Result<T, NodeError>;
