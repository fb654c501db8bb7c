//! The six command channels between paired devices.
//!
//! Each channel has fixed delivery properties. Durable channels survive an
//! app restart and are queued by the transport while the peer is away;
//! ephemeral channels need the peer to be reachable right now.
//!
//! | Channel | Durable | Needs reachability |
//! |---------|---------|--------------------|
//! | `UpdateContext` | yes | no |
//! | `SendMessage` | no | yes |
//! | `SendMessageData` | no | yes |
//! | `TransferFile` | yes | no |
//! | `TransferUserInfo` | yes | no |
//! | `TransferCurrentComplicationInfo` | yes | no |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A command delivery path between the two peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelKind {
    /// Replace the shared application context
    UpdateContext,
    /// Send a dictionary message to a reachable peer
    SendMessage,
    /// Send raw bytes to a reachable peer
    SendMessageData,
    /// Queue a file transfer
    TransferFile,
    /// Queue a user info dictionary
    TransferUserInfo,
    /// Queue user info for the watch face complication
    TransferCurrentComplicationInfo,
}

/// Static delivery properties of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelProperties {
    /// Survives restarts of either app
    pub durable: bool,
    /// Needs a live connection to the peer; otherwise the transport queues
    pub requires_reachability: bool,
}

impl ChannelKind {
    /// All channels, in the order pages and tables show them.
    pub const ALL: [Self; 6] = [
        Self::UpdateContext,
        Self::SendMessage,
        Self::SendMessageData,
        Self::TransferFile,
        Self::TransferUserInfo,
        Self::TransferCurrentComplicationInfo,
    ];

    /// Delivery properties of this channel.
    #[must_use]
    pub const fn properties(self) -> ChannelProperties {
        match self {
            Self::SendMessage | Self::SendMessageData => ChannelProperties {
                durable: false,
                requires_reachability: true,
            },
            Self::UpdateContext
            | Self::TransferFile
            | Self::TransferUserInfo
            | Self::TransferCurrentComplicationInfo => ChannelProperties {
                durable: true,
                requires_reachability: false,
            },
        }
    }

    /// Whether operations on this channel create outstanding transfers.
    #[must_use]
    pub const fn is_transfer(self) -> bool {
        matches!(
            self,
            Self::TransferFile | Self::TransferUserInfo | Self::TransferCurrentComplicationInfo
        )
    }

    /// Display name of the channel.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UpdateContext => "UpdateContext",
            Self::SendMessage => "SendMessage",
            Self::SendMessageData => "SendMessageData",
            Self::TransferFile => "TransferFile",
            Self::TransferUserInfo => "TransferUserInfo",
            Self::TransferCurrentComplicationInfo => "TransferCurrentComplicationInfo",
        }
    }
}

/// Look up the delivery properties of a channel.
#[must_use]
pub const fn properties_of(kind: ChannelKind) -> ChannelProperties {
    kind.properties()
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().replace(['-', '_'], "").to_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().to_lowercase() == normalized)
            .ok_or_else(|| Error::InvalidConfig {
                key: "channel".to_string(),
                reason: format!("unknown channel '{s}'"),
            })
    }
}
