//! Outstanding transfers.
//!
//! A [`SessionTransfer`] is created by the transport when a user info or file
//! transfer begins and stays alive until the transport reports it finished,
//! failed or cancelled. Two transfers with identical payloads are still
//! distinct: identity is the [`TransferId`] handed out by the transport.
//!
//! Progress only moves forward. Once a transfer is settled it ignores any
//! further progress reports, so the terminal update is always the last one a
//! listener sees.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::channel::ChannelKind;
use crate::color::TimedColor;
use crate::Mapping;

/// Identity of a transfer, assigned by the transport that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferId(Uuid);

impl TransferId {
    /// Generate a fresh identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    /// Transfer in flight
    Transferring,
    /// Transfer completed successfully
    Finished,
    /// Transfer failed or was cancelled
    Failed,
}

impl TransferState {
    /// Whether no further updates will follow.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

/// Progress of a single transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferProgress {
    /// Current state
    pub state: TransferState,
    /// Units completed so far
    pub completed: u64,
    /// Total units (0 while unknown)
    pub total: u64,
    /// Update counter, strictly increasing per transfer
    pub sequence: u64,
}

impl TransferProgress {
    fn new() -> Self {
        Self {
            state: TransferState::Transferring,
            completed: 0,
            total: 0,
            sequence: 0,
        }
    }

    /// Completed fraction in `0.0..=1.0`.
    #[must_use]
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return if self.state == TransferState::Finished {
                1.0
            } else {
                0.0
            };
        }
        (self.completed as f64 / self.total as f64).clamp(0.0, 1.0)
    }

    /// Completed percentage in `0.0..=100.0`.
    #[must_use]
    pub fn percentage(&self) -> f64 {
        self.fraction() * 100.0
    }

    /// Short human readable description, e.g. `42% completed`.
    #[must_use]
    pub fn describe(&self) -> String {
        match self.state {
            TransferState::Transferring => format!("{:.0}% completed", self.percentage()),
            TransferState::Finished => "Finished".to_string(),
            TransferState::Failed => "Failed".to_string(),
        }
    }
}

/// Result of asking for a transfer to be cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Cancellation was handed to the transport
    Requested,
    /// Cancellation had already been requested; nothing was done
    AlreadyRequested,
    /// The transfer had already settled; nothing was done
    AlreadySettled,
    /// The selected index is not part of the snapshot; nothing was done
    StaleIndex,
}

/// Callback invoked with every progress change of a transfer.
pub type ProgressListener = Arc<dyn Fn(&TransferProgress) + Send + Sync>;

/// Hook the transport installs to be told about cancellation requests.
pub type CancelHook = Arc<dyn Fn(TransferId) + Send + Sync>;

/// A file on the local device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileHandle {
    path: PathBuf,
}

impl FileHandle {
    /// Wrap a file path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last path component, or an empty string.
    #[must_use]
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[derive(Default)]
struct CancelState {
    requested: bool,
    notify_channel: Option<ChannelKind>,
}

struct ProgressCell {
    progress: TransferProgress,
    error: Option<String>,
}

/// State shared by every kind of transfer.
pub struct TransferCore {
    id: TransferId,
    channel: ChannelKind,
    timed_color: TimedColor,
    cell: Mutex<ProgressCell>,
    listeners: Mutex<Vec<(u64, ProgressListener)>>,
    next_listener: AtomicU64,
    cancel: Mutex<CancelState>,
    cancel_hook: Option<CancelHook>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TransferCore {
    fn new(channel: ChannelKind, timed_color: TimedColor, cancel_hook: Option<CancelHook>) -> Self {
        Self {
            id: TransferId::new(),
            channel,
            timed_color,
            cell: Mutex::new(ProgressCell {
                progress: TransferProgress::new(),
                error: None,
            }),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            cancel: Mutex::new(CancelState::default()),
            cancel_hook,
        }
    }

    /// Transfer identity.
    #[must_use]
    pub fn id(&self) -> TransferId {
        self.id
    }

    /// Channel the transfer was dispatched on.
    #[must_use]
    pub fn channel(&self) -> ChannelKind {
        self.channel
    }

    /// Color stamped when the transfer was created.
    #[must_use]
    pub fn timed_color(&self) -> &TimedColor {
        &self.timed_color
    }

    /// Current progress.
    #[must_use]
    pub fn progress(&self) -> TransferProgress {
        lock(&self.cell).progress.clone()
    }

    /// Failure message, once the transfer has failed.
    #[must_use]
    pub fn error(&self) -> Option<String> {
        lock(&self.cell).error.clone()
    }

    /// Whether a terminal state has been recorded.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        lock(&self.cell).progress.state.is_terminal()
    }

    /// Channel that should hear about the outcome.
    ///
    /// The channel passed to [`Transfer::cancel`] if the transfer was
    /// cancelled, the transfer's own channel otherwise.
    #[must_use]
    pub fn notify_channel(&self) -> ChannelKind {
        lock(&self.cancel).notify_channel.unwrap_or(self.channel)
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        lock(&self.cancel).requested
    }

    /// Record a progress report. Returns `false` if the report was ignored
    /// because it went backwards or the transfer already settled.
    pub(crate) fn record_progress(&self, completed: u64, total: u64) -> bool {
        let snapshot = {
            let mut cell = lock(&self.cell);
            let current = &cell.progress;
            if current.state.is_terminal() {
                return false;
            }

            let total = total.max(current.total);
            let completed = completed.min(total).max(current.completed);
            if completed == current.completed && total == current.total {
                return false;
            }

            let next = TransferProgress {
                state: TransferState::Transferring,
                completed,
                total,
                sequence: current.sequence + 1,
            };
            if next.fraction() < current.fraction() {
                return false;
            }
            cell.progress = next;
            cell.progress.clone()
        };

        self.notify(&snapshot);
        true
    }

    /// Record the terminal outcome. Returns `false` if the transfer had
    /// already settled.
    pub(crate) fn settle(&self, error: Option<String>) -> bool {
        let snapshot = {
            let mut cell = lock(&self.cell);
            if cell.progress.state.is_terminal() {
                return false;
            }

            let current = cell.progress.clone();
            cell.progress = match error {
                None => TransferProgress {
                    state: TransferState::Finished,
                    completed: current.total,
                    total: current.total,
                    sequence: current.sequence + 1,
                },
                Some(_) => TransferProgress {
                    state: TransferState::Failed,
                    sequence: current.sequence + 1,
                    ..current
                },
            };
            cell.error = error;
            cell.progress.clone()
        };

        self.notify(&snapshot);
        true
    }

    pub(crate) fn add_listener(&self, listener: ProgressListener) -> u64 {
        let token = self.next_listener.fetch_add(1, Ordering::Relaxed);
        lock(&self.listeners).push((token, listener));
        token
    }

    pub(crate) fn remove_listener(&self, token: u64) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.len();
        listeners.retain(|(t, _)| *t != token);
        listeners.len() != before
    }

    fn notify(&self, progress: &TransferProgress) {
        let listeners: Vec<ProgressListener> = lock(&self.listeners)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(progress);
        }
    }

    fn request_cancel(&self, notify_channel: ChannelKind) -> CancelOutcome {
        if self.is_settled() {
            return CancelOutcome::AlreadySettled;
        }

        {
            let mut cancel = lock(&self.cancel);
            if cancel.requested {
                return CancelOutcome::AlreadyRequested;
            }
            cancel.requested = true;
            cancel.notify_channel = Some(notify_channel);
        }

        if let Some(hook) = &self.cancel_hook {
            hook(self.id);
        }
        CancelOutcome::Requested
    }
}

impl fmt::Debug for TransferCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferCore")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .field("progress", &self.progress())
            .finish_non_exhaustive()
    }
}

/// Capabilities shared by data and file transfers.
pub trait Transfer {
    /// Shared transfer state.
    fn core(&self) -> &TransferCore;

    /// Transfer identity.
    fn id(&self) -> TransferId {
        self.core().id()
    }

    /// Channel the transfer was dispatched on.
    fn channel(&self) -> ChannelKind {
        self.core().channel()
    }

    /// Color stamped when the transfer was created.
    fn timed_color(&self) -> &TimedColor {
        self.core().timed_color()
    }

    /// Current progress.
    fn progress(&self) -> TransferProgress {
        self.core().progress()
    }

    /// Ask the transport to cancel the transfer and report the outcome on
    /// `notify_channel`.
    ///
    /// Never blocks. Cancelling twice, or cancelling a settled transfer,
    /// does nothing.
    fn cancel(&self, notify_channel: ChannelKind) -> CancelOutcome {
        self.core().request_cancel(notify_channel)
    }
}

struct DataInner {
    core: TransferCore,
    user_info: Mapping,
    is_current_complication_info: bool,
}

/// An outstanding user info transfer.
#[derive(Clone)]
pub struct DataTransfer(Arc<DataInner>);

impl DataTransfer {
    /// Create a transfer for a user info mapping.
    #[must_use]
    pub fn new(
        user_info: Mapping,
        is_current_complication_info: bool,
        timed_color: TimedColor,
        cancel_hook: Option<CancelHook>,
    ) -> Self {
        let channel = if is_current_complication_info {
            ChannelKind::TransferCurrentComplicationInfo
        } else {
            ChannelKind::TransferUserInfo
        };
        Self(Arc::new(DataInner {
            core: TransferCore::new(channel, timed_color, cancel_hook),
            user_info,
            is_current_complication_info,
        }))
    }

    /// The mapping being transferred.
    #[must_use]
    pub fn user_info(&self) -> &Mapping {
        &self.0.user_info
    }

    /// Whether this is complication info.
    #[must_use]
    pub fn is_current_complication_info(&self) -> bool {
        self.0.is_current_complication_info
    }
}

impl Transfer for DataTransfer {
    fn core(&self) -> &TransferCore {
        &self.0.core
    }
}

impl fmt::Debug for DataTransfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataTransfer")
            .field("id", &self.id())
            .field(
                "is_current_complication_info",
                &self.0.is_current_complication_info,
            )
            .finish_non_exhaustive()
    }
}

struct FileInner {
    core: TransferCore,
    file: FileHandle,
    metadata: Option<Mapping>,
}

/// An outstanding file transfer.
#[derive(Clone)]
pub struct FileTransfer(Arc<FileInner>);

impl FileTransfer {
    /// Create a transfer for a file.
    #[must_use]
    pub fn new(
        file: FileHandle,
        metadata: Option<Mapping>,
        timed_color: TimedColor,
        cancel_hook: Option<CancelHook>,
    ) -> Self {
        Self(Arc::new(FileInner {
            core: TransferCore::new(ChannelKind::TransferFile, timed_color, cancel_hook),
            file,
            metadata,
        }))
    }

    /// The file being transferred.
    #[must_use]
    pub fn file(&self) -> &FileHandle {
        &self.0.file
    }

    /// Metadata sent along with the file.
    #[must_use]
    pub fn metadata(&self) -> Option<&Mapping> {
        self.0.metadata.as_ref()
    }
}

impl Transfer for FileTransfer {
    fn core(&self) -> &TransferCore {
        &self.0.core
    }
}

impl fmt::Debug for FileTransfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileTransfer")
            .field("id", &self.id())
            .field("file", &self.0.file)
            .finish_non_exhaustive()
    }
}

/// Either kind of outstanding transfer.
///
/// Equality is identity: two values are equal only if they refer to the same
/// transport transfer.
#[derive(Debug, Clone)]
pub enum SessionTransfer {
    /// User info or complication info transfer
    Data(DataTransfer),
    /// File transfer
    File(FileTransfer),
}

impl SessionTransfer {
    /// The data transfer, if this is one.
    #[must_use]
    pub fn as_data(&self) -> Option<&DataTransfer> {
        match self {
            Self::Data(data) => Some(data),
            Self::File(_) => None,
        }
    }

    /// The file transfer, if this is one.
    #[must_use]
    pub fn as_file(&self) -> Option<&FileTransfer> {
        match self {
            Self::File(file) => Some(file),
            Self::Data(_) => None,
        }
    }

    /// Whether this is a complication info transfer.
    #[must_use]
    pub fn is_current_complication_info(&self) -> bool {
        self.as_data()
            .is_some_and(DataTransfer::is_current_complication_info)
    }
}

impl Transfer for SessionTransfer {
    fn core(&self) -> &TransferCore {
        match self {
            Self::Data(data) => data.core(),
            Self::File(file) => file.core(),
        }
    }
}

impl PartialEq for SessionTransfer {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for SessionTransfer {}

impl From<DataTransfer> for SessionTransfer {
    fn from(transfer: DataTransfer) -> Self {
        Self::Data(transfer)
    }
}

impl From<FileTransfer> for SessionTransfer {
    fn from(transfer: FileTransfer) -> Self {
        Self::File(transfer)
    }
}
