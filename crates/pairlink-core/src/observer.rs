//! Per-transfer progress observation.
//!
//! A [`TransferObserverSet`] holds at most one callback per transfer. The
//! transport reports progress from its own worker threads; callbacks are
//! re-dispatched onto the [`Executor`] chosen when the set was built, for
//! example a queue drained by a UI loop.
//!
//! Callbacks for one transfer only ever see increasing progress, and the
//! terminal update is the last one, even when the executor runs jobs out of
//! order: every job checks the update's sequence number against the newest
//! one already delivered and drops anything older.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::UnboundedSender;

use crate::error::Error;
use crate::transfer::{SessionTransfer, Transfer, TransferId, TransferProgress};

/// A unit of work handed to an [`Executor`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Where progress callbacks run.
pub trait Executor: Send + Sync {
    /// Run or schedule the job.
    fn execute(&self, job: Job);
}

/// Runs jobs immediately on the reporting thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct Inline;

impl Executor for Inline {
    fn execute(&self, job: Job) {
        job();
    }
}

impl Executor for tokio::runtime::Handle {
    fn execute(&self, job: Job) {
        drop(self.spawn(async move { job() }));
    }
}

impl Executor for UnboundedSender<Job> {
    fn execute(&self, job: Job) {
        if self.send(job).is_err() {
            tracing::debug!("Job queue closed, dropping progress update");
        }
    }
}

struct Gate {
    active: AtomicBool,
    /// Newest sequence delivered, shared with the registrations this one replaced.
    delivered: Arc<AtomicU64>,
}

struct Registration {
    transfer: SessionTransfer,
    token: u64,
    gate: Arc<Gate>,
}

impl Registration {
    fn detach(&self) {
        self.gate.active.store(false, Ordering::Release);
        self.transfer.core().remove_listener(self.token);
    }
}

/// Progress callbacks keyed by transfer identity.
pub struct TransferObserverSet {
    registrations: Mutex<HashMap<TransferId, Registration>>,
    executor: Arc<dyn Executor>,
}

impl TransferObserverSet {
    /// Create a set whose callbacks run on `executor`.
    pub fn new(executor: impl Executor + 'static) -> Self {
        Self {
            registrations: Mutex::new(HashMap::new()),
            executor: Arc::new(executor),
        }
    }

    /// Create a set whose callbacks run on the reporting thread.
    #[must_use]
    pub fn inline() -> Self {
        Self::new(Inline)
    }

    fn registrations(&self) -> MutexGuard<'_, HashMap<TransferId, Registration>> {
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Call `on_progress` for every progress update of `transfer`.
    ///
    /// Replaces any callback this set already holds for the transfer. The
    /// previous callback is detached before the new one is attached, and the
    /// two share one delivery counter, so a single update never reaches both.
    pub fn observe<F>(&self, transfer: &SessionTransfer, on_progress: F)
    where
        F: Fn(TransferId, &TransferProgress) + Send + Sync + 'static,
    {
        let id = transfer.id();
        let mut registrations = self.registrations();

        let delivered = match registrations.remove(&id) {
            Some(previous) => {
                tracing::debug!("Replacing progress observer for transfer {}", id);
                previous.detach();
                Arc::clone(&previous.gate.delivered)
            }
            None => Arc::new(AtomicU64::new(0)),
        };
        delivered.fetch_max(transfer.progress().sequence, Ordering::AcqRel);

        let gate = Arc::new(Gate {
            active: AtomicBool::new(true),
            delivered,
        });
        let callback = Arc::new(on_progress);
        let executor = Arc::clone(&self.executor);
        let listener_gate = Arc::clone(&gate);

        let token = transfer
            .core()
            .add_listener(Arc::new(move |progress: &TransferProgress| {
                if !listener_gate.active.load(Ordering::Acquire) {
                    return;
                }
                let gate = Arc::clone(&listener_gate);
                let callback = Arc::clone(&callback);
                let progress = progress.clone();
                executor.execute(Box::new(move || {
                    if !gate.active.load(Ordering::Acquire) {
                        return;
                    }
                    let newest = gate.delivered.fetch_max(progress.sequence, Ordering::AcqRel);
                    if newest >= progress.sequence {
                        return;
                    }
                    callback(id, &progress);
                }));
            }));

        registrations.insert(
            id,
            Registration {
                transfer: transfer.clone(),
                token,
                gate,
            },
        );
    }

    /// Stop observing `transfer`. Returns whether a callback was removed;
    /// unknown transfers are ignored.
    pub fn unobserve(&self, transfer: &SessionTransfer) -> bool {
        let removed = self.registrations().remove(&transfer.id());
        match removed {
            Some(registration) => {
                registration.detach();
                true
            }
            None => {
                tracing::debug!(
                    "Ignoring unobserve: {}",
                    Error::UnknownTransfer(transfer.id())
                );
                false
            }
        }
    }

    /// Whether a callback is registered for `transfer`.
    #[must_use]
    pub fn contains(&self, transfer: &SessionTransfer) -> bool {
        self.registrations().contains_key(&transfer.id())
    }

    /// Number of observed transfers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations().len()
    }

    /// Whether no transfer is observed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registrations().is_empty()
    }

    /// Stop observing every transfer.
    pub fn clear(&self) {
        let drained: Vec<Registration> = self.registrations().drain().map(|(_, r)| r).collect();
        for registration in &drained {
            registration.detach();
        }
    }
}

impl Drop for TransferObserverSet {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for TransferObserverSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferObserverSet")
            .field("observed", &self.len())
            .finish_non_exhaustive()
    }
}
