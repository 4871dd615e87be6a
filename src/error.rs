//! Error taxonomy for the relay.
//!
//! None of these are fatal: the sampling path logs them and keeps running.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RelayError {
    /// Malformed or incomplete payload; nothing is emitted.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The gateway link is not READY; the send is dropped.
    #[error("Gateway link not ready")]
    LinkNotReady,

    /// The gateway transport rejected the envelope.
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Peer {peer} unreachable: {reason}")]
    PeerUnreachable { peer: String, reason: String },

    /// The link actor has shut down.
    #[error("Gateway link closed")]
    LinkClosed,
}

impl RelayError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
