//! Status fan-out.
//!
//! Every transport event that means something to a user becomes one
//! [`CommandStatus`], delivered once to each subscriber in subscription order
//! and remembered as the last status of its channel, so a page built later
//! can show what happened before it existed.
//!
//! Delivery never holds a lock while an observer runs. A status published
//! while another is being delivered (from another thread, or from inside an
//! observer) is queued and delivered by the thread already delivering, in
//! publish order.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;

use crate::channel::ChannelKind;
use crate::error::Error;
use crate::status::{CommandStatus, Phrase};
use crate::transfer::Transfer;
use crate::transport::TransportEvent;

/// Default capacity of the async status stream.
pub const DEFAULT_STREAM_CAPACITY: usize = 64;

/// Callback receiving every published status.
pub type StatusObserver = Arc<dyn Fn(&CommandStatus) + Send + Sync>;

/// Handle returned by [`StatusBroadcaster::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct Registry {
    next_id: u64,
    observers: Vec<(SubscriptionId, StatusObserver)>,
    last: HashMap<ChannelKind, CommandStatus>,
}

#[derive(Default)]
struct Delivery {
    queue: VecDeque<CommandStatus>,
    draining: bool,
}

/// Resets the draining flag if an observer panics mid-delivery.
struct DrainGuard<'a>(&'a Mutex<Delivery>);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            lock(self.0).draining = false;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fans statuses out to observers and remembers the last one per channel.
pub struct StatusBroadcaster {
    registry: Mutex<Registry>,
    delivery: Mutex<Delivery>,
    stream: broadcast::Sender<CommandStatus>,
}

impl StatusBroadcaster {
    /// Create a broadcaster whose async stream buffers `stream_capacity`
    /// statuses per lagging receiver.
    #[must_use]
    pub fn new(stream_capacity: usize) -> Self {
        let (stream, _) = broadcast::channel(stream_capacity.max(1));
        Self {
            registry: Mutex::new(Registry::default()),
            delivery: Mutex::new(Delivery::default()),
            stream,
        }
    }

    /// Register an observer. It sees every status published from now on.
    pub fn subscribe<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&CommandStatus) + Send + Sync + 'static,
    {
        let mut registry = lock(&self.registry);
        registry.next_id += 1;
        let id = SubscriptionId(registry.next_id);
        registry.observers.push((id, Arc::new(observer)));
        id
    }

    /// Remove an observer. Returns whether it was registered.
    ///
    /// A status already being delivered may still reach it.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = lock(&self.registry);
        let before = registry.observers.len();
        registry.observers.retain(|(sid, _)| *sid != id);
        registry.observers.len() != before
    }

    /// Number of registered observers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        lock(&self.registry).observers.len()
    }

    /// A receiver of every status published from now on, for async consumers.
    #[must_use]
    pub fn subscribe_stream(&self) -> broadcast::Receiver<CommandStatus> {
        self.stream.subscribe()
    }

    /// The most recent status published on `channel`.
    #[must_use]
    pub fn last_status(&self, channel: ChannelKind) -> Option<CommandStatus> {
        lock(&self.registry).last.get(&channel).cloned()
    }

    /// The most recent status of every channel that has one, in
    /// [`ChannelKind::ALL`] order.
    #[must_use]
    pub fn last_statuses(&self) -> Vec<CommandStatus> {
        let registry = lock(&self.registry);
        ChannelKind::ALL
            .into_iter()
            .filter_map(|channel| registry.last.get(&channel).cloned())
            .collect()
    }

    /// Deliver `status` to every observer.
    ///
    /// The status is the channel's last status as soon as this returns, even
    /// if another thread is still delivering and the observers see it later.
    pub fn publish(&self, status: CommandStatus) {
        {
            let mut delivery = lock(&self.delivery);
            // Recorded under the delivery lock so last status follows queue order.
            lock(&self.registry)
                .last
                .insert(status.channel, status.clone());
            delivery.queue.push_back(status);
            if delivery.draining {
                return;
            }
            delivery.draining = true;
        }

        let _guard = DrainGuard(&self.delivery);
        while let Some(status) = self.next_queued() {
            self.deliver(&status);
        }
    }

    fn next_queued(&self) -> Option<CommandStatus> {
        let mut delivery = lock(&self.delivery);
        let next = delivery.queue.pop_front();
        if next.is_none() {
            delivery.draining = false;
        }
        next
    }

    fn deliver(&self, status: &CommandStatus) {
        let observers: Vec<StatusObserver> = {
            let registry = lock(&self.registry);
            registry
                .observers
                .iter()
                .map(|(_, o)| Arc::clone(o))
                .collect()
        };

        tracing::debug!("{}", status.summary());
        for observer in observers {
            observer(status);
        }

        // No receivers is fine.
        let _ = self.stream.send(status.clone());
    }

    /// Turn a transport event into a status and publish it.
    ///
    /// Transfer events update the transfer itself first: progress is
    /// recorded, and a terminal report settles it. Duplicate terminal reports
    /// and a late start for a settled transfer are dropped. Returns the
    /// published status, if any.
    pub fn ingest(&self, event: TransportEvent) -> Option<CommandStatus> {
        let status = match event {
            TransportEvent::ActivationChanged(_) | TransportEvent::ReachabilityChanged(_) => None,
            TransportEvent::Delivered {
                channel,
                phrase,
                timed_color,
            } => Some(CommandStatus::new(channel, phrase).with_timed_color(timed_color)),
            TransportEvent::Received {
                channel,
                timed_color,
                file,
            } => {
                let status =
                    CommandStatus::new(channel, Phrase::Received).with_timed_color(timed_color);
                Some(match file {
                    Some(file) => status.with_file(file),
                    None => status,
                })
            }
            TransportEvent::TransferStarted(transfer) => {
                if transfer.core().is_settled() {
                    tracing::debug!("Dropping late start of settled transfer {}", transfer.id());
                    None
                } else {
                    Some(
                        CommandStatus::new(transfer.channel(), Phrase::Transferring)
                            .with_transfer(transfer),
                    )
                }
            }
            TransportEvent::TransferProgress {
                transfer,
                completed,
                total,
            } => {
                transfer.core().record_progress(completed, total);
                None
            }
            TransportEvent::TransferFinished { transfer, error } => {
                if transfer.core().settle(error.clone()) {
                    let channel = transfer.core().notify_channel();
                    let status = match error {
                        None => CommandStatus::new(channel, Phrase::Finished),
                        Some(message) => {
                            let error = Error::TransferFailed(message);
                            tracing::info!("Transfer {} failed: {}", transfer.id(), error);
                            CommandStatus::failed(channel, error.to_string())
                        }
                    };
                    Some(status.with_transfer(transfer))
                } else {
                    tracing::warn!(
                        "Ignoring duplicate completion of transfer {}",
                        transfer.id()
                    );
                    None
                }
            }
            TransportEvent::OperationFailed {
                channel,
                error,
                timed_color,
            } => Some(CommandStatus::failed(channel, error).with_timed_color(timed_color)),
        };

        if let Some(status) = &status {
            self.publish(status.clone());
        }
        status
    }
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_STREAM_CAPACITY)
    }
}

impl fmt::Debug for StatusBroadcaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = lock(&self.registry);
        f.debug_struct("StatusBroadcaster")
            .field("subscribers", &registry.observers.len())
            .field("channels", &registry.last.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::TimedColor;
    use crate::transfer::{DataTransfer, SessionTransfer};
    use crate::Mapping;

    fn collector(
        broadcaster: &StatusBroadcaster,
    ) -> (Arc<Mutex<Vec<CommandStatus>>>, SubscriptionId) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = broadcaster.subscribe(move |s: &CommandStatus| sink.lock().unwrap().push(s.clone()));
        (seen, id)
    }

    fn user_info_transfer() -> SessionTransfer {
        DataTransfer::new(Mapping::new(), false, TimedColor::now(), None).into()
    }

    #[test]
    fn test_publish_reaches_every_observer_once() {
        let broadcaster = StatusBroadcaster::default();
        let (a, _) = collector(&broadcaster);
        let (b, _) = collector(&broadcaster);

        let color = TimedColor::now();
        broadcaster.publish(
            CommandStatus::new(ChannelKind::UpdateContext, Phrase::Updated)
                .with_timed_color(Some(color.clone())),
        );

        assert_eq!(a.lock().unwrap().len(), 1);
        assert_eq!(*a.lock().unwrap(), *b.lock().unwrap());
        assert_eq!(a.lock().unwrap()[0].timed_color, Some(color));
    }

    #[test]
    fn test_subscription_order() {
        let broadcaster = StatusBroadcaster::default();
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = Arc::clone(&order);
            broadcaster.subscribe(move |_: &CommandStatus| order.lock().unwrap().push(n));
        }

        broadcaster.publish(CommandStatus::new(ChannelKind::SendMessage, Phrase::Sent));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let broadcaster = StatusBroadcaster::default();
        let (seen, id) = collector(&broadcaster);

        assert!(broadcaster.unsubscribe(id));
        assert!(!broadcaster.unsubscribe(id));
        broadcaster.publish(CommandStatus::new(ChannelKind::SendMessage, Phrase::Sent));

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn test_last_status_overwrites() {
        let broadcaster = StatusBroadcaster::default();
        assert!(broadcaster.last_status(ChannelKind::SendMessage).is_none());

        broadcaster.publish(CommandStatus::new(ChannelKind::SendMessage, Phrase::Sent));
        broadcaster.publish(CommandStatus::new(ChannelKind::SendMessage, Phrase::Replied));
        broadcaster.publish(CommandStatus::new(ChannelKind::UpdateContext, Phrase::Updated));

        assert_eq!(
            broadcaster
                .last_status(ChannelKind::SendMessage)
                .map(|s| s.phrase),
            Some(Phrase::Replied)
        );
        let channels: Vec<_> = broadcaster
            .last_statuses()
            .into_iter()
            .map(|s| s.channel)
            .collect();
        assert_eq!(
            channels,
            vec![ChannelKind::UpdateContext, ChannelKind::SendMessage]
        );
    }

    #[test]
    fn test_reentrant_publish_is_queued_in_order() {
        let broadcaster = Arc::new(StatusBroadcaster::default());
        let inner = Arc::clone(&broadcaster);
        broadcaster.subscribe(move |s: &CommandStatus| {
            if s.phrase == Phrase::Sent {
                inner.publish(CommandStatus::new(ChannelKind::SendMessage, Phrase::Replied));
            }
        });
        let (seen, _) = collector(&broadcaster);

        broadcaster.publish(CommandStatus::new(ChannelKind::SendMessage, Phrase::Sent));

        let phrases: Vec<_> = seen.lock().unwrap().iter().map(|s| s.phrase).collect();
        assert_eq!(phrases, vec![Phrase::Sent, Phrase::Replied]);
        assert_eq!(
            broadcaster
                .last_status(ChannelKind::SendMessage)
                .map(|s| s.phrase),
            Some(Phrase::Replied)
        );
    }

    #[test]
    fn test_ingest_transfer_lifecycle() {
        let broadcaster = StatusBroadcaster::default();
        let (seen, _) = collector(&broadcaster);
        let transfer = user_info_transfer();

        broadcaster.ingest(TransportEvent::TransferStarted(transfer.clone()));
        broadcaster.ingest(TransportEvent::TransferProgress {
            transfer: transfer.clone(),
            completed: 1,
            total: 2,
        });
        broadcaster.ingest(TransportEvent::TransferFinished {
            transfer: transfer.clone(),
            error: None,
        });

        let phrases: Vec<_> = seen.lock().unwrap().iter().map(|s| s.phrase).collect();
        assert_eq!(phrases, vec![Phrase::Transferring, Phrase::Finished]);
        assert!(transfer.core().is_settled());
    }

    #[test]
    fn test_ingest_drops_duplicate_terminal_and_late_start() {
        let broadcaster = StatusBroadcaster::default();
        let (seen, _) = collector(&broadcaster);
        let transfer = user_info_transfer();

        assert!(broadcaster
            .ingest(TransportEvent::TransferFinished {
                transfer: transfer.clone(),
                error: Some("disk full".into()),
            })
            .is_some());
        assert!(broadcaster
            .ingest(TransportEvent::TransferFinished {
                transfer: transfer.clone(),
                error: None,
            })
            .is_none());
        assert!(broadcaster
            .ingest(TransportEvent::TransferStarted(transfer))
            .is_none());

        let statuses = seen.lock().unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].phrase, Phrase::Failed);
        assert_eq!(statuses[0].error_message.as_deref(), Some("disk full"));
    }

    #[test]
    fn test_cancelled_transfer_reports_on_notify_channel() {
        let broadcaster = StatusBroadcaster::default();
        let transfer = user_info_transfer();
        transfer.cancel(ChannelKind::TransferCurrentComplicationInfo);

        let status = broadcaster
            .ingest(TransportEvent::TransferFinished {
                transfer,
                error: Some("transfer cancelled".into()),
            })
            .unwrap();

        assert_eq!(status.channel, ChannelKind::TransferCurrentComplicationInfo);
        assert_eq!(status.phrase, Phrase::Failed);
    }

    #[test]
    fn test_link_events_publish_nothing() {
        let broadcaster = StatusBroadcaster::default();
        let (seen, _) = collector(&broadcaster);

        assert!(broadcaster
            .ingest(TransportEvent::ReachabilityChanged(true))
            .is_none());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stream_receives_statuses() {
        let broadcaster = StatusBroadcaster::new(4);
        let mut rx = broadcaster.subscribe_stream();

        broadcaster.publish(CommandStatus::failed(ChannelKind::SendMessage, "timed out"));

        let status = rx.recv().await.unwrap();
        assert_eq!(status.error_message.as_deref(), Some("timed out"));
    }

    #[test]
    fn test_last_status_is_current_while_another_thread_delivers() {
        use std::sync::mpsc;

        let broadcaster = Arc::new(StatusBroadcaster::default());
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        broadcaster.subscribe(move |s: &CommandStatus| {
            if s.channel == ChannelKind::UpdateContext {
                entered_tx.send(()).unwrap();
                release_rx.lock().unwrap().recv().unwrap();
            }
        });
        let (seen, _) = collector(&broadcaster);

        let delivering = {
            let broadcaster = Arc::clone(&broadcaster);
            std::thread::spawn(move || {
                broadcaster.publish(CommandStatus::new(ChannelKind::UpdateContext, Phrase::Updated));
            })
        };
        entered_rx.recv().unwrap();

        let sent = CommandStatus::new(ChannelKind::SendMessage, Phrase::Sent)
            .with_timed_color(Some(TimedColor::now()));
        broadcaster.publish(sent.clone());
        assert_eq!(broadcaster.last_status(ChannelKind::SendMessage), Some(sent));

        release_tx.send(()).unwrap();
        delivering.join().unwrap();

        let phrases: Vec<_> = seen.lock().unwrap().iter().map(|s| s.phrase).collect();
        assert_eq!(phrases, vec![Phrase::Updated, Phrase::Sent]);
    }

    #[test]
    fn test_concurrent_publishers_deliver_everything() {
        let broadcaster = Arc::new(StatusBroadcaster::default());
        let (seen, _) = collector(&broadcaster);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let broadcaster = Arc::clone(&broadcaster);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        broadcaster
                            .publish(CommandStatus::new(ChannelKind::SendMessage, Phrase::Sent));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(seen.lock().unwrap().len(), 200);
    }
}
