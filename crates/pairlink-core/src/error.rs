//! Error types for pairlink.
//!
//! Only validation failures are returned synchronously. Anything that happens
//! after a command has been handed to the transport is reported as a
//! [`CommandStatus`](crate::status::CommandStatus) with a `failed` phrase.

use std::io;

use thiserror::Error;

use crate::channel::ChannelKind;
use crate::transfer::TransferId;

/// A specialized `Result` type for pairlink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for pairlink.
#[derive(Error, Debug)]
pub enum Error {
    /// Peer is not reachable for a channel that needs a live link (P001)
    #[error("peer is not reachable, '{0}' requires a live connection")]
    NotReachable(ChannelKind),

    /// Payload shape does not match the channel (P002)
    #[error("payload '{payload}' cannot be sent on channel '{channel}'")]
    PayloadMismatch {
        /// Channel the payload was dispatched on
        channel: ChannelKind,
        /// Kind of payload that was supplied
        payload: &'static str,
    },

    /// Transfer failed on the transport (P003); displays the transport's message
    #[error("{0}")]
    TransferFailed(String),

    /// Index no longer present in the current snapshot (P004)
    #[error("index {index} is out of range for a snapshot of {len} transfers")]
    StaleIndex {
        /// Requested index
        index: usize,
        /// Length of the snapshot
        len: usize,
    },

    /// Transfer is not known to the registry or store
    #[error("unknown transfer {0}")]
    UnknownTransfer(TransferId),

    /// Session has not finished activating
    #[error("session is not activated")]
    NotActivated,

    /// Complication is not enabled on the paired device
    #[error("complication is not enabled")]
    ComplicationDisabled,

    /// The transport refused an operation
    #[error("transport error: {0}")]
    TransportError(String),

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Invalid configuration value
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Reason for invalidity
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not happen)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns the error code associated with this error, if any.
    #[must_use]
    pub const fn code(&self) -> Option<&'static str> {
        match self {
            Self::NotReachable(_) => Some("P001"),
            Self::PayloadMismatch { .. } => Some("P002"),
            Self::TransferFailed(_) => Some("P003"),
            Self::StaleIndex { .. } => Some("P004"),
            _ => None,
        }
    }

    /// Returns whether the same request may succeed if tried again later.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotReachable(_) | Self::NotActivated | Self::TransportError(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
