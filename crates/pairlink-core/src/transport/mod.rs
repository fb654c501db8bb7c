//! The peer link consumed by the session layer.
//!
//! The session layer never talks to a radio or socket itself. It is handed
//! something that implements [`Transport`]: a production link, the in-process
//! [`loopback`] pair, or a fake in tests.

pub mod loopback;

pub use loopback::{LoopbackConfig, LoopbackTransport};

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::channel::ChannelKind;
use crate::color::TimedColor;
use crate::error::Result;
use crate::status::Phrase;
use crate::transfer::{DataTransfer, FileHandle, FileTransfer, SessionTransfer};
use crate::Mapping;

/// Activation state of the underlying session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationState {
    /// Not activated yet, or deactivated
    #[default]
    NotActivated,
    /// Activation in progress
    Activating,
    /// Ready to exchange data
    Activated,
}

impl fmt::Display for ActivationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotActivated => write!(f, "not activated"),
            Self::Activating => write!(f, "activating"),
            Self::Activated => write!(f, "activated"),
        }
    }
}

/// Content handed to [`Transport::send`].
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Application context mapping
    Context(Mapping),
    /// Dictionary message
    Message(Mapping),
    /// Raw message bytes
    MessageData(Vec<u8>),
    /// User info mapping
    UserInfo(Mapping),
    /// Complication info mapping
    ComplicationInfo(Mapping),
    /// File with optional metadata
    File {
        /// File to transfer
        file: FileHandle,
        /// Metadata sent with the file
        metadata: Option<Mapping>,
    },
}

impl Payload {
    /// Short name of the payload kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Context(_) => "context",
            Self::Message(_) => "message",
            Self::MessageData(_) => "message data",
            Self::UserInfo(_) => "user info",
            Self::ComplicationInfo(_) => "complication info",
            Self::File { .. } => "file",
        }
    }

    /// Whether this payload can travel on `channel`.
    #[must_use]
    pub const fn fits(&self, channel: ChannelKind) -> bool {
        matches!(
            (self, channel),
            (Self::Context(_), ChannelKind::UpdateContext)
                | (Self::Message(_), ChannelKind::SendMessage)
                | (Self::MessageData(_), ChannelKind::SendMessageData)
                | (Self::UserInfo(_), ChannelKind::TransferUserInfo)
                | (
                    Self::ComplicationInfo(_),
                    ChannelKind::TransferCurrentComplicationInfo
                )
                | (Self::File { .. }, ChannelKind::TransferFile)
        )
    }

    /// The timed color embedded in the payload, if any.
    #[must_use]
    pub fn timed_color(&self) -> Option<TimedColor> {
        match self {
            Self::Context(m)
            | Self::Message(m)
            | Self::UserInfo(m)
            | Self::ComplicationInfo(m) => TimedColor::from_mapping(m),
            Self::MessageData(bytes) => serde_json::from_slice::<Mapping>(bytes)
                .ok()
                .and_then(|m| TimedColor::from_mapping(&m)),
            Self::File { metadata, .. } => metadata.as_ref().and_then(TimedColor::from_mapping),
        }
    }
}

/// Something that happened on the link.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Activation state changed
    ActivationChanged(ActivationState),
    /// Peer reachability changed
    ReachabilityChanged(bool),
    /// A non-transfer operation was accepted (`updated`, `sent`, `replied`)
    Delivered {
        /// Channel of the operation
        channel: ChannelKind,
        /// Outcome phrase
        phrase: Phrase,
        /// Color carried by the operation
        timed_color: Option<TimedColor>,
    },
    /// Data arrived from the peer
    Received {
        /// Channel the data arrived on
        channel: ChannelKind,
        /// Color carried by the data
        timed_color: Option<TimedColor>,
        /// Received file, for file transfers
        file: Option<FileHandle>,
    },
    /// A transfer was queued
    TransferStarted(SessionTransfer),
    /// A transfer made progress
    TransferProgress {
        /// The transfer
        transfer: SessionTransfer,
        /// Units completed
        completed: u64,
        /// Total units
        total: u64,
    },
    /// A transfer settled; `error` is set when it failed or was cancelled
    TransferFinished {
        /// The transfer
        transfer: SessionTransfer,
        /// Failure description
        error: Option<String>,
    },
    /// A non-transfer operation failed
    OperationFailed {
        /// Channel of the operation
        channel: ChannelKind,
        /// Failure description
        error: String,
        /// Color carried by the operation
        timed_color: Option<TimedColor>,
    },
}

/// Handler the transport calls for every event, from any thread.
pub type EventHandler = Arc<dyn Fn(TransportEvent) + Send + Sync>;

/// A bidirectional link to the paired device.
pub trait Transport: Send + Sync {
    /// Whether the peer can receive live messages right now.
    fn is_reachable(&self) -> bool;

    /// Activation state of the session.
    fn activation_state(&self) -> ActivationState;

    /// Whether the peer has the complication installed on its face.
    fn is_complication_enabled(&self) -> bool {
        true
    }

    /// Hand a payload to the link. Returns once it is queued; the outcome is
    /// reported later through the event handler.
    ///
    /// # Errors
    ///
    /// Returns an error if the link refuses the payload outright.
    fn send(&self, channel: ChannelKind, payload: Payload) -> Result<()>;

    /// User info and complication info transfers still in flight.
    fn outstanding_data_transfers(&self) -> Vec<DataTransfer>;

    /// File transfers still in flight.
    fn outstanding_file_transfers(&self) -> Vec<FileTransfer>;

    /// The most recent application context received from the peer.
    fn received_application_context(&self) -> Option<Mapping> {
        None
    }

    /// Install the event handler, replacing any previous one.
    fn on_status_event(&self, handler: EventHandler);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_fits_only_its_channel() {
        let payloads = [
            Payload::Context(Mapping::new()),
            Payload::Message(Mapping::new()),
            Payload::MessageData(Vec::new()),
            Payload::File {
                file: FileHandle::new("a.log"),
                metadata: None,
            },
            Payload::UserInfo(Mapping::new()),
            Payload::ComplicationInfo(Mapping::new()),
        ];

        for payload in &payloads {
            let fitting: Vec<_> = ChannelKind::ALL
                .into_iter()
                .filter(|c| payload.fits(*c))
                .collect();
            assert_eq!(fitting.len(), 1, "{}", payload.kind());
        }
    }

    #[test]
    fn test_payload_timed_color() {
        let color = TimedColor::now();
        let payload = Payload::Message(color.to_mapping());
        assert_eq!(payload.timed_color(), Some(color.clone()));

        let bytes = serde_json::to_vec(&color.to_mapping()).unwrap();
        assert_eq!(Payload::MessageData(bytes).timed_color(), Some(color));

        assert_eq!(Payload::MessageData(vec![1, 2, 3]).timed_color(), None);
    }
}
