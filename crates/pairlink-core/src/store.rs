//! Cached view of the outstanding transfers.
//!
//! The transport can add or complete transfers at any time. A UI pass that
//! lists transfers by row and later acts on "row 3" needs the list to stay
//! put in between, so [`TransferStore::snapshot`] hands out a frozen
//! [`TransferSnapshot`] and keeps returning the same one until
//! [`TransferStore::invalidate`] is called.

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::channel::ChannelKind;
use crate::error::{Error, Result};
use crate::transfer::{CancelOutcome, SessionTransfer, Transfer};
use crate::transport::Transport;

/// Which outstanding transfers a snapshot contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferFilter {
    /// Every data and file transfer
    All,
    /// File transfers only
    Files,
    /// User info transfers that are not complication info
    UserInfo,
    /// Complication info transfers only
    ComplicationInfo,
}

impl TransferFilter {
    /// The filter listing the transfers of a transfer channel.
    #[must_use]
    pub const fn for_channel(channel: ChannelKind) -> Option<Self> {
        match channel {
            ChannelKind::TransferFile => Some(Self::Files),
            ChannelKind::TransferUserInfo => Some(Self::UserInfo),
            ChannelKind::TransferCurrentComplicationInfo => Some(Self::ComplicationInfo),
            _ => None,
        }
    }

    fn includes_data(self) -> bool {
        !matches!(self, Self::Files)
    }

    fn includes_files(self) -> bool {
        matches!(self, Self::All | Self::Files)
    }

    fn matches(self, transfer: &SessionTransfer) -> bool {
        match self {
            Self::All => true,
            Self::Files => transfer.as_file().is_some(),
            Self::UserInfo => transfer
                .as_data()
                .is_some_and(|d| !d.is_current_complication_info()),
            Self::ComplicationInfo => transfer.is_current_complication_info(),
        }
    }
}

/// A frozen, indexable list of transfers.
///
/// Indices stay valid for the lifetime of the snapshot, whatever the
/// transport does in the meantime.
#[derive(Debug, Clone, Default)]
pub struct TransferSnapshot(Arc<[SessionTransfer]>);

impl TransferSnapshot {
    /// Whether two snapshots are the same cached list.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for TransferSnapshot {
    type Target = [SessionTransfer];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<SessionTransfer>> for TransferSnapshot {
    fn from(transfers: Vec<SessionTransfer>) -> Self {
        Self(transfers.into())
    }
}

#[derive(Default)]
struct Cache {
    generation: u64,
    snapshots: HashMap<TransferFilter, TransferSnapshot>,
}

/// Session-scoped cache of outstanding transfers.
pub struct TransferStore {
    transport: Arc<dyn Transport>,
    cache: Mutex<Cache>,
    warn_on_stale: bool,
}

impl TransferStore {
    /// Create a store reading from `transport`.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            cache: Mutex::new(Cache::default()),
            warn_on_stale: true,
        }
    }

    /// Log ignored stale selections at `warn` (the default) or `debug`.
    #[must_use]
    pub fn with_stale_warnings(mut self, enabled: bool) -> Self {
        self.warn_on_stale = enabled;
        self
    }

    fn cache(&self) -> MutexGuard<'_, Cache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The cached transfers matching `filter`, building the list from the
    /// transport if nothing is cached since the last invalidation.
    pub fn snapshot(&self, filter: TransferFilter) -> TransferSnapshot {
        let generation = {
            let cache = self.cache();
            if let Some(snapshot) = cache.snapshots.get(&filter) {
                return snapshot.clone();
            }
            cache.generation
        };

        let built = self.build(filter);

        let mut cache = self.cache();
        if cache.generation != generation {
            // Invalidated while building; hand it out but do not cache it.
            return built;
        }
        cache.snapshots.entry(filter).or_insert(built).clone()
    }

    fn build(&self, filter: TransferFilter) -> TransferSnapshot {
        let mut transfers: Vec<SessionTransfer> = Vec::new();
        if filter.includes_data() {
            transfers.extend(
                self.transport
                    .outstanding_data_transfers()
                    .into_iter()
                    .map(SessionTransfer::from),
            );
        }
        if filter.includes_files() {
            transfers.extend(
                self.transport
                    .outstanding_file_transfers()
                    .into_iter()
                    .map(SessionTransfer::from),
            );
        }
        transfers.retain(|t| filter.matches(t));

        tracing::debug!(
            "Rebuilt {:?} transfer snapshot with {} entries",
            filter,
            transfers.len()
        );
        transfers.into()
    }

    /// Drop every cached snapshot. The next [`snapshot`](Self::snapshot)
    /// reads the transport again.
    pub fn invalidate(&self) {
        let mut cache = self.cache();
        cache.generation += 1;
        cache.snapshots.clear();
    }

    /// Number of transfers in the current snapshot for `filter`.
    pub fn count(&self, filter: TransferFilter) -> usize {
        self.snapshot(filter).len()
    }

    /// The transfer at `index` in the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleIndex`] if the snapshot has no such row.
    pub fn get(&self, filter: TransferFilter, index: usize) -> Result<SessionTransfer> {
        let snapshot = self.snapshot(filter);
        snapshot.get(index).cloned().ok_or(Error::StaleIndex {
            index,
            len: snapshot.len(),
        })
    }

    /// Cancel the transfer at `index` in the current snapshot, reporting the
    /// outcome on `notify_channel`.
    ///
    /// A row that is no longer part of the snapshot is logged and ignored.
    pub fn cancel_at(
        &self,
        filter: TransferFilter,
        index: usize,
        notify_channel: ChannelKind,
    ) -> CancelOutcome {
        match self.get(filter, index) {
            Ok(transfer) => {
                let outcome = transfer.cancel(notify_channel);
                tracing::debug!("Cancel of transfer {}: {:?}", transfer.id(), outcome);
                outcome
            }
            Err(e) => {
                if self.warn_on_stale {
                    tracing::warn!("Selected row has been removed, ignoring cancel: {}", e);
                } else {
                    tracing::debug!("Selected row has been removed, ignoring cancel: {}", e);
                }
                CancelOutcome::StaleIndex
            }
        }
    }
}

impl fmt::Debug for TransferStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cache = self.cache();
        f.debug_struct("TransferStore")
            .field("generation", &cache.generation)
            .field("cached", &cache.snapshots.len())
            .finish_non_exhaustive()
    }
}
