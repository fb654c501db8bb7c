//! In-process link between two endpoints.
//!
//! [`LoopbackTransport::pair`] returns two connected endpoints, conventionally
//! the phone and the watch. Each one acknowledges what it is sent, delivers a
//! `received` event to its peer, and runs transfers as a series of chunked
//! progress steps on the tokio runtime it was created on.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;

use super::{ActivationState, EventHandler, Payload, Transport, TransportEvent};
use crate::channel::ChannelKind;
use crate::color::TimedColor;
use crate::error::{Error, Result};
use crate::status::Phrase;
use crate::transfer::{
    CancelHook, DataTransfer, FileHandle, FileTransfer, SessionTransfer, Transfer, TransferId,
};
use crate::Mapping;

/// Error message of a transfer stopped by a cancel request.
pub const CANCELLED_MESSAGE: &str = "transfer cancelled";

/// Behaviour of a loopback pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopbackConfig {
    /// Bytes moved per progress step
    pub chunk_size: u64,
    /// Delay before each acknowledgement or progress step
    #[serde(with = "crate::config::duration_serde")]
    pub step_interval: Duration,
    /// Answer every message with a reply
    pub reply_to_messages: bool,
    /// Peer reachability right after activation
    pub start_reachable: bool,
    /// Whether the peer has the complication installed
    pub complication_enabled: bool,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
            step_interval: Duration::from_millis(250),
            reply_to_messages: true,
            start_reachable: true,
            complication_enabled: true,
        }
    }
}

struct LinkFlags {
    activation: ActivationState,
    reachable: bool,
    complication_enabled: bool,
}

struct Endpoint {
    name: &'static str,
    config: LoopbackConfig,
    runtime: Handle,
    flags: Mutex<LinkFlags>,
    handler: Mutex<Option<EventHandler>>,
    data: Mutex<Vec<DataTransfer>>,
    files: Mutex<Vec<FileTransfer>>,
    cancelled: Mutex<HashSet<TransferId>>,
    received_context: Mutex<Option<Mapping>>,
    peer: OnceLock<Weak<Endpoint>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Endpoint {
    fn emit(&self, event: TransportEvent) {
        let handler = lock(&self.handler).clone();
        match handler {
            Some(handler) => handler(event),
            None => tracing::debug!("{}: no event handler, dropping {:?}", self.name, event),
        }
    }

    fn emit_to_peer(&self, event: TransportEvent) {
        if let Some(peer) = self.peer.get().and_then(Weak::upgrade) {
            peer.emit(event);
        }
    }

    fn cancel_hook(self: &Arc<Self>) -> CancelHook {
        let endpoint = Arc::downgrade(self);
        Arc::new(move |id| {
            if let Some(endpoint) = endpoint.upgrade() {
                let mut cancelled = lock(&endpoint.cancelled);
                if endpoint.is_outstanding(id) {
                    tracing::debug!("{}: cancel requested for transfer {}", endpoint.name, id);
                    cancelled.insert(id);
                }
            }
        })
    }

    fn take_cancelled(&self, id: TransferId) -> bool {
        lock(&self.cancelled).remove(&id)
    }

    fn is_outstanding(&self, id: TransferId) -> bool {
        lock(&self.data).iter().any(|t| t.id() == id)
            || lock(&self.files).iter().any(|t| t.id() == id)
    }

    /// Lock order is `cancelled`, then the transfer lists.
    fn forget(&self, id: TransferId) {
        let mut cancelled = lock(&self.cancelled);
        lock(&self.data).retain(|t| t.id() != id);
        lock(&self.files).retain(|t| t.id() != id);
        cancelled.remove(&id);
    }

    fn store_peer_context(&self, context: Mapping) {
        if let Some(peer) = self.peer.get().and_then(Weak::upgrade) {
            *lock(&peer.received_context) = Some(context);
        }
    }

    /// Remove the transfer from the outstanding lists, then report it.
    fn finish(&self, transfer: SessionTransfer, error: Option<String>) {
        self.forget(transfer.id());
        let delivered = error.is_none();
        let channel = transfer.channel();
        let timed_color = transfer.timed_color().clone();
        let file = transfer.as_file().map(|f| f.file().clone());

        self.emit(TransportEvent::TransferFinished { transfer, error });
        if delivered {
            self.emit_to_peer(TransportEvent::Received {
                channel,
                timed_color: Some(timed_color),
                file,
            });
        }
    }

    async fn run_transfer(self: Arc<Self>, transfer: SessionTransfer, total: Option<u64>) {
        let total = match total {
            Some(total) => total,
            None => match transfer.as_file() {
                Some(file) => match tokio::fs::metadata(file.file().path()).await {
                    Ok(meta) => meta.len(),
                    Err(e) => {
                        let message = format!("cannot read {}: {e}", file.file().file_name());
                        self.finish(transfer, Some(message));
                        return;
                    }
                },
                None => 0,
            },
        }
        .max(1);

        let chunk = self.config.chunk_size.max(1);
        let mut completed = 0;
        while completed < total {
            tokio::time::sleep(self.config.step_interval).await;
            if self.take_cancelled(transfer.id()) {
                self.finish(transfer, Some(CANCELLED_MESSAGE.to_string()));
                return;
            }
            completed = completed.saturating_add(chunk).min(total);
            self.emit(TransportEvent::TransferProgress {
                transfer: transfer.clone(),
                completed,
                total,
            });
        }
        self.finish(transfer, None);
    }

    fn acknowledge(
        self: &Arc<Self>,
        channel: ChannelKind,
        timed_color: Option<TimedColor>,
        context: Option<Mapping>,
    ) {
        let endpoint = Arc::clone(self);
        self.runtime.spawn(async move {
            tokio::time::sleep(endpoint.config.step_interval).await;
            let phrase = if channel == ChannelKind::UpdateContext {
                Phrase::Updated
            } else {
                Phrase::Sent
            };
            endpoint.emit(TransportEvent::Delivered {
                channel,
                phrase,
                timed_color: timed_color.clone(),
            });
            if let Some(context) = context {
                endpoint.store_peer_context(context);
            }
            endpoint.emit_to_peer(TransportEvent::Received {
                channel,
                timed_color: timed_color.clone(),
                file: None,
            });
            if phrase == Phrase::Sent && endpoint.config.reply_to_messages {
                tokio::time::sleep(endpoint.config.step_interval).await;
                endpoint.emit(TransportEvent::Delivered {
                    channel,
                    phrase: Phrase::Replied,
                    timed_color,
                });
            }
        });
    }

    fn start_data(self: &Arc<Self>, user_info: Mapping, is_complication: bool) {
        let timed_color = TimedColor::from_mapping(&user_info).unwrap_or_else(TimedColor::now);
        let total = serde_json::to_vec(&user_info).map_or(0, |bytes| bytes.len() as u64);
        let transfer = DataTransfer::new(
            user_info,
            is_complication,
            timed_color,
            Some(self.cancel_hook()),
        );
        lock(&self.data).push(transfer.clone());
        self.launch(transfer.into(), Some(total));
    }

    fn start_file(self: &Arc<Self>, file: FileHandle, metadata: Option<Mapping>) {
        let timed_color = metadata
            .as_ref()
            .and_then(TimedColor::from_mapping)
            .unwrap_or_else(TimedColor::now);
        let transfer = FileTransfer::new(file, metadata, timed_color, Some(self.cancel_hook()));
        lock(&self.files).push(transfer.clone());
        self.launch(transfer.into(), None);
    }

    fn launch(self: &Arc<Self>, transfer: SessionTransfer, total: Option<u64>) {
        tracing::debug!(
            "{}: starting {} transfer {}",
            self.name,
            transfer.channel(),
            transfer.id()
        );
        self.emit(TransportEvent::TransferStarted(transfer.clone()));
        self.runtime.spawn(Arc::clone(self).run_transfer(transfer, total));
    }
}

/// One end of an in-process link.
#[derive(Clone)]
pub struct LoopbackTransport {
    endpoint: Arc<Endpoint>,
}

impl LoopbackTransport {
    /// Create two connected endpoints, `phone` and `watch`.
    ///
    /// # Errors
    ///
    /// Returns an error when called outside a tokio runtime.
    pub fn pair(config: &LoopbackConfig) -> Result<(Self, Self)> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::TransportError(format!("loopback needs a tokio runtime: {e}")))?;

        let phone = Self::endpoint("phone", config, runtime.clone());
        let watch = Self::endpoint("watch", config, runtime);
        let _ = phone.endpoint.peer.set(Arc::downgrade(&watch.endpoint));
        let _ = watch.endpoint.peer.set(Arc::downgrade(&phone.endpoint));
        Ok((phone, watch))
    }

    fn endpoint(name: &'static str, config: &LoopbackConfig, runtime: Handle) -> Self {
        Self {
            endpoint: Arc::new(Endpoint {
                name,
                config: config.clone(),
                runtime,
                flags: Mutex::new(LinkFlags {
                    activation: ActivationState::NotActivated,
                    reachable: false,
                    complication_enabled: config.complication_enabled,
                }),
                handler: Mutex::new(None),
                data: Mutex::new(Vec::new()),
                files: Mutex::new(Vec::new()),
                cancelled: Mutex::new(HashSet::new()),
                received_context: Mutex::new(None),
                peer: OnceLock::new(),
            }),
        }
    }

    /// Name of this endpoint.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.endpoint.name
    }

    /// Activate the session and report the initial reachability.
    pub fn activate(&self) {
        let reachable = self.endpoint.config.start_reachable;
        self.set_activation(ActivationState::Activating);
        self.set_activation(ActivationState::Activated);
        self.set_reachable(reachable);
        tracing::info!("{}: session activated", self.endpoint.name);
    }

    /// Deactivate the session.
    pub fn deactivate(&self) {
        self.set_reachable(false);
        self.set_activation(ActivationState::NotActivated);
    }

    fn set_activation(&self, state: ActivationState) {
        lock(&self.endpoint.flags).activation = state;
        self.endpoint.emit(TransportEvent::ActivationChanged(state));
    }

    /// Change whether the peer counts as reachable.
    pub fn set_reachable(&self, reachable: bool) {
        {
            let mut flags = lock(&self.endpoint.flags);
            if flags.reachable == reachable {
                return;
            }
            flags.reachable = reachable;
        }
        self.endpoint.emit(TransportEvent::ReachabilityChanged(reachable));
    }

    /// Install or remove the peer's complication.
    pub fn set_complication_enabled(&self, enabled: bool) {
        lock(&self.endpoint.flags).complication_enabled = enabled;
    }
}

impl Transport for LoopbackTransport {
    fn is_reachable(&self) -> bool {
        lock(&self.endpoint.flags).reachable
    }

    fn activation_state(&self) -> ActivationState {
        lock(&self.endpoint.flags).activation
    }

    fn is_complication_enabled(&self) -> bool {
        lock(&self.endpoint.flags).complication_enabled
    }

    fn send(&self, channel: ChannelKind, payload: Payload) -> Result<()> {
        if self.activation_state() != ActivationState::Activated {
            return Err(Error::NotActivated);
        }
        if !payload.fits(channel) {
            return Err(Error::PayloadMismatch {
                channel,
                payload: payload.kind(),
            });
        }
        if channel.properties().requires_reachability && !self.is_reachable() {
            return Err(Error::NotReachable(channel));
        }

        tracing::debug!("{}: {} {}", self.endpoint.name, channel, payload.kind());
        let timed_color = payload.timed_color();
        match payload {
            Payload::Context(context) => {
                self.endpoint.acknowledge(channel, timed_color, Some(context));
            }
            Payload::Message(_) | Payload::MessageData(_) => {
                self.endpoint.acknowledge(channel, timed_color, None);
            }
            Payload::UserInfo(user_info) => self.endpoint.start_data(user_info, false),
            Payload::ComplicationInfo(user_info) => {
                if !self.is_complication_enabled() {
                    return Err(Error::ComplicationDisabled);
                }
                self.endpoint.start_data(user_info, true);
            }
            Payload::File { file, metadata } => self.endpoint.start_file(file, metadata),
        }
        Ok(())
    }

    fn outstanding_data_transfers(&self) -> Vec<DataTransfer> {
        lock(&self.endpoint.data).clone()
    }

    fn outstanding_file_transfers(&self) -> Vec<FileTransfer> {
        lock(&self.endpoint.files).clone()
    }

    fn received_application_context(&self) -> Option<Mapping> {
        lock(&self.endpoint.received_context).clone()
    }

    fn on_status_event(&self, handler: EventHandler) {
        *lock(&self.endpoint.handler) = Some(handler);
    }
}

impl fmt::Debug for LoopbackTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackTransport")
            .field("name", &self.endpoint.name)
            .field("activation", &self.activation_state())
            .field("reachable", &self.is_reachable())
            .finish_non_exhaustive()
    }
}
