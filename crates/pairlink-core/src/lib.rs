//! # Pairlink Core Library
//!
//! `pairlink-core` is the session layer between a phone and its paired
//! wearable: it dispatches commands over six delivery channels, tracks the
//! transfers those commands create, and tells any number of UI observers what
//! happened on each channel.
//!
//! ## Features
//!
//! - **Channel rules**: durable channels queue, message channels need a live peer
//! - **Status broadcast**: every observer sees each status once, late joiners
//!   can ask for the last status of a channel
//! - **Transfer tracking**: cached snapshots with stable indices, per-transfer
//!   progress observation, best-effort cancellation
//!
//! ## Modules
//!
//! - [`broadcast`] - Status fan-out and last status per channel
//! - [`channel`] - The six channels and their delivery properties
//! - [`color`] - Timed colors carried by every exchange
//! - [`config`] - Configuration management
//! - [`observer`] - Per-transfer progress callbacks
//! - [`samples`] - Sample payloads for every channel
//! - [`session`] - Session coordinator
//! - [`status`] - Status records
//! - [`store`] - Cached snapshots of outstanding transfers
//! - [`transfer`] - Data and file transfers
//! - [`transport`] - The link consumed by the session, plus a loopback pair
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use pairlink_core::{config::Config, ChannelKind, LoopbackTransport, SessionCoordinator};
//!
//! let config = Config::load()?;
//! let (phone, _watch) = LoopbackTransport::pair(&config.loopback)?;
//! let session = SessionCoordinator::new(Arc::new(phone.clone()), &config.session);
//! phone.activate();
//! session.broadcaster().subscribe(|status| println!("{}", status.summary()));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]

pub mod broadcast;
pub mod channel;
pub mod color;
pub mod config;
pub mod error;
pub mod observer;
pub mod samples;
pub mod session;
pub mod status;
pub mod store;
pub mod transfer;
pub mod transport;

pub use broadcast::{StatusBroadcaster, SubscriptionId};
pub use channel::{properties_of, ChannelKind, ChannelProperties};
pub use color::{Rgb, TimedColor};
pub use error::{Error, Result};
pub use observer::TransferObserverSet;
pub use session::{LinkState, SessionCoordinator};
pub use status::{CommandStatus, Phrase};
pub use store::{TransferFilter, TransferSnapshot, TransferStore};
pub use transfer::{
    CancelOutcome, DataTransfer, FileHandle, FileTransfer, SessionTransfer, Transfer, TransferId,
    TransferProgress, TransferState,
};
pub use transport::{
    ActivationState, LoopbackConfig, LoopbackTransport, Payload, Transport, TransportEvent,
};

/// Key/value payload exchanged between peers.
pub type Mapping = serde_json::Map<String, serde_json::Value>;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default bytes per loopback progress step (16 KB)
pub const DEFAULT_CHUNK_SIZE: u64 = 16 * 1024;
