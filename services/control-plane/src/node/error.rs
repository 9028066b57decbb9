//! Remote node client errors.

use thiserror::Error;

use super::templates::TemplateError;

/// Result type for node operations.
pub type NodeResult<T> = Result<T, NodeError>;

/// Errors from talking to a node.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The remote shell session could not be established.
    #[error("node {address} unreachable: {message}")]
    NodeUnreachable { address: String, message: String },

    /// The remote command ran and exited non-zero.
    #[error("remote command exited with {exit_code}: {stderr}")]
    RemoteCommandFailed { exit_code: i32, stderr: String },

    /// Zones are provisioned with exactly one service.
    #[error("expected exactly one service, got {0}")]
    UnsupportedServiceCount(usize),

    /// The node reported no zone with this name.
    #[error("zone {0} not reported by node")]
    ZoneNotFound(String),

    /// A script template could not be rendered.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// The remote command printed something that is not the expected JSON.
    #[error("failed to decode remote output: {0}")]
    Decode(#[from] serde_json::Error),

    /// Local I/O while driving the ssh client.
    #[error("local I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NodeError {
    /// Stderr of a failed remote command, if that is what this is.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::RemoteCommandFailed { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}
