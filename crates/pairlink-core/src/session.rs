//! One communication session with the paired device.
//!
//! [`SessionCoordinator`] is what a UI talks to. It checks a command against
//! the channel's delivery rules before handing it to the transport, owns the
//! [`TransferStore`] and [`StatusBroadcaster`] of the session, and installs
//! itself as the transport's event handler.
//!
//! ## Example
//!
//! ```rust,ignore
//! use pairlink_core::session::SessionCoordinator;
//! use pairlink_core::{ChannelKind, Payload, TimedColor};
//!
//! let session = SessionCoordinator::new(transport, &config.session);
//! session.broadcaster().subscribe(|status| println!("{}", status.summary()));
//! session.dispatch(ChannelKind::SendMessage, Payload::Message(TimedColor::now().to_mapping()))?;
//! ```

use std::fmt;
use std::sync::{Arc, Weak};

use serde::Serialize;
use tokio::sync::watch;

use crate::broadcast::StatusBroadcaster;
use crate::channel::ChannelKind;
use crate::color::TimedColor;
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::status::{CommandStatus, Phrase};
use crate::store::TransferStore;
use crate::transfer::{CancelOutcome, SessionTransfer, Transfer};
use crate::transport::{ActivationState, Payload, Transport, TransportEvent};

/// Link state as last reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LinkState {
    /// Activation state of the session
    pub activation: ActivationState,
    /// Whether the peer is reachable
    pub reachable: bool,
}

impl LinkState {
    /// Whether messages can be sent right now.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.activation == ActivationState::Activated && self.reachable
    }
}

/// Façade over the transport for one session.
pub struct SessionCoordinator {
    transport: Arc<dyn Transport>,
    store: Arc<TransferStore>,
    broadcaster: Arc<StatusBroadcaster>,
    link: Arc<watch::Sender<LinkState>>,
}

impl SessionCoordinator {
    /// Create a coordinator and register it as the transport's event handler,
    /// replacing any previous handler.
    ///
    /// Transfers already in flight stay with the transport and show up in the
    /// new coordinator's store.
    pub fn new(transport: Arc<dyn Transport>, config: &SessionConfig) -> Self {
        let store = Arc::new(
            TransferStore::new(Arc::clone(&transport))
                .with_stale_warnings(config.warn_on_stale_index),
        );
        let broadcaster = Arc::new(StatusBroadcaster::new(config.status_stream_capacity));

        // Subscribed first so every other observer reads a fresh snapshot.
        let weak_store: Weak<TransferStore> = Arc::downgrade(&store);
        broadcaster.subscribe(move |status: &CommandStatus| {
            if status.transfer.is_some() || status.channel.is_transfer() {
                if let Some(store) = weak_store.upgrade() {
                    store.invalidate();
                }
            }
        });

        // A page built after the peer last updated the context shows that
        // context, not an empty channel.
        if let Some(context) = transport.received_application_context() {
            broadcaster.publish(
                CommandStatus::new(ChannelKind::UpdateContext, Phrase::Received)
                    .with_timed_color(TimedColor::from_mapping(&context)),
            );
        }

        let (link, _) = watch::channel(LinkState {
            activation: transport.activation_state(),
            reachable: transport.is_reachable(),
        });
        let link = Arc::new(link);

        let handler_broadcaster = Arc::clone(&broadcaster);
        let handler_link = Arc::clone(&link);
        transport.on_status_event(Arc::new(move |event| match event {
            TransportEvent::ActivationChanged(activation) => {
                tracing::info!("Session {}", activation);
                handler_link.send_modify(|state| state.activation = activation);
            }
            TransportEvent::ReachabilityChanged(reachable) => {
                tracing::info!(
                    "Peer is {}",
                    if reachable { "reachable" } else { "not reachable" }
                );
                handler_link.send_modify(|state| state.reachable = reachable);
            }
            other => {
                handler_broadcaster.ingest(other);
            }
        }));

        Self {
            transport,
            store,
            broadcaster,
            link,
        }
    }

    /// Send `payload` on `channel`.
    ///
    /// Returns once the payload is handed to the transport. The outcome
    /// arrives later as a status. Local failures (session not activated,
    /// complication not enabled, transport refusal) are published as a
    /// `failed` status and are not errors.
    ///
    /// # Errors
    ///
    /// - [`Error::PayloadMismatch`] if the payload does not belong on `channel`
    /// - [`Error::NotReachable`] if the channel needs a live peer and there is
    ///   none; nothing is sent and no status is published
    pub fn dispatch(&self, channel: ChannelKind, payload: Payload) -> Result<()> {
        if !payload.fits(channel) {
            return Err(Error::PayloadMismatch {
                channel,
                payload: payload.kind(),
            });
        }
        if channel.properties().requires_reachability && !self.transport.is_reachable() {
            tracing::debug!("{} refused: peer not reachable", channel);
            return Err(Error::NotReachable(channel));
        }

        let timed_color = payload.timed_color();
        if self.transport.activation_state() != ActivationState::Activated {
            self.publish_failure(channel, &Error::NotActivated, timed_color);
            return Ok(());
        }
        if channel == ChannelKind::TransferCurrentComplicationInfo
            && !self.transport.is_complication_enabled()
        {
            self.publish_failure(channel, &Error::ComplicationDisabled, timed_color);
            return Ok(());
        }

        tracing::debug!("Dispatching {} on {}", payload.kind(), channel);
        if let Err(e) = self.transport.send(channel, payload) {
            tracing::warn!("Transport refused {}: {}", channel, e);
            self.publish_failure(channel, &e, timed_color);
        }
        Ok(())
    }

    fn publish_failure(
        &self,
        channel: ChannelKind,
        error: &Error,
        timed_color: Option<TimedColor>,
    ) {
        let status = CommandStatus::failed(channel, error.to_string()).with_timed_color(timed_color);
        self.broadcaster.publish(status);
    }

    /// Ask the transport to cancel `transfer`; the outcome is reported on
    /// `notify_channel` once the transport settles it.
    pub fn cancel(&self, transfer: &SessionTransfer, notify_channel: ChannelKind) -> CancelOutcome {
        let outcome = transfer.cancel(notify_channel);
        tracing::debug!("Cancel of transfer {}: {:?}", transfer.id(), outcome);
        outcome
    }

    /// The session's transfer store.
    #[must_use]
    pub fn store(&self) -> &Arc<TransferStore> {
        &self.store
    }

    /// The session's status broadcaster.
    #[must_use]
    pub fn broadcaster(&self) -> &Arc<StatusBroadcaster> {
        &self.broadcaster
    }

    /// The current link state.
    #[must_use]
    pub fn link(&self) -> LinkState {
        *self.link.borrow()
    }

    /// A receiver notified whenever the link state changes.
    #[must_use]
    pub fn link_state(&self) -> watch::Receiver<LinkState> {
        self.link.subscribe()
    }
}

impl fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("link", &self.link())
            .field("store", &self.store)
            .field("broadcaster", &self.broadcaster)
            .finish_non_exhaustive()
    }
}
