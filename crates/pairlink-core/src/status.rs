//! Status records broadcast to observers.

use std::fmt;

use serde::Serialize;

use crate::channel::ChannelKind;
use crate::color::TimedColor;
use crate::transfer::{FileHandle, SessionTransfer, Transfer};

/// Lifecycle tag of a channel operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phrase {
    /// Context accepted by the transport
    Updated,
    /// Message handed to the link
    Sent,
    /// Peer answered a message
    Replied,
    /// Data arrived from the peer
    Received,
    /// Transfer in flight
    Transferring,
    /// Operation completed
    Finished,
    /// Operation failed
    Failed,
}

impl Phrase {
    /// Display text of the phrase.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Updated => "Updated",
            Self::Sent => "Sent",
            Self::Replied => "Replied",
            Self::Received => "Received",
            Self::Transferring => "Transferring",
            Self::Finished => "Finished",
            Self::Failed => "Failed",
        }
    }

    /// Whether this phrase ends a transfer.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

impl fmt::Display for Phrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of one transport event on one channel.
///
/// Built once and handed to observers by reference; observers copy what
/// they need and never modify it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandStatus {
    /// Channel the event belongs to
    pub channel: ChannelKind,
    /// What happened
    pub phrase: Phrase,
    /// Color to render, shared by every observer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timed_color: Option<TimedColor>,
    /// Failure description, rendered in place of the time stamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Transfer the event is about
    #[serde(skip)]
    pub transfer: Option<SessionTransfer>,
    /// File received from the peer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<FileHandle>,
}

impl CommandStatus {
    /// Create a bare status.
    #[must_use]
    pub fn new(channel: ChannelKind, phrase: Phrase) -> Self {
        Self {
            channel,
            phrase,
            timed_color: None,
            error_message: None,
            transfer: None,
            file: None,
        }
    }

    /// Create a `failed` status carrying an error message.
    #[must_use]
    pub fn failed(channel: ChannelKind, error_message: impl Into<String>) -> Self {
        Self::new(channel, Phrase::Failed).with_error(error_message)
    }

    /// Attach a timed color.
    #[must_use]
    pub fn with_timed_color(mut self, timed_color: Option<TimedColor>) -> Self {
        self.timed_color = timed_color;
        self
    }

    /// Attach an error message.
    #[must_use]
    pub fn with_error(mut self, error_message: impl Into<String>) -> Self {
        self.error_message = Some(error_message.into());
        self
    }

    /// Attach a transfer; its timed color is used unless one is already set.
    #[must_use]
    pub fn with_transfer(mut self, transfer: SessionTransfer) -> Self {
        if self.timed_color.is_none() {
            self.timed_color = Some(transfer.timed_color().clone());
        }
        self.transfer = Some(transfer);
        self
    }

    /// Attach a received file.
    #[must_use]
    pub fn with_file(mut self, file: FileHandle) -> Self {
        self.file = Some(file);
        self
    }

    /// One-line summary, as shown in a log view.
    ///
    /// `! TransferFile...disk full` for failures,
    /// `#TransferFile...Finished at 3:04:05 PM` otherwise.
    #[must_use]
    pub fn summary(&self) -> String {
        if let Some(error) = &self.error_message {
            return format!("! {}...{}", self.channel, error);
        }
        match &self.timed_color {
            Some(color) => format!(
                "#{}...{} at {}",
                self.channel,
                self.phrase,
                color.time_stamp()
            ),
            None => format!("#{}...{}", self.channel, self.phrase),
        }
    }
}
