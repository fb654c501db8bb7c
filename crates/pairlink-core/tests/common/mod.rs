//! Common test utilities for `Pairlink` integration tests.
//!
//! Provides a manually driven [`FakeTransport`] and helpers shared by the
//! integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pairlink_core::config::SessionConfig;
use pairlink_core::transport::EventHandler;
use pairlink_core::{
    ActivationState, ChannelKind, CommandStatus, DataTransfer, FileHandle, FileTransfer,
    LoopbackConfig, Mapping, Payload, Result, SessionCoordinator, SessionTransfer,
    StatusBroadcaster, TimedColor, Transfer, TransferId, Transport, TransportEvent,
};

struct LinkFlags {
    activation: ActivationState,
    reachable: bool,
    complication_enabled: bool,
}

/// A transport whose events are emitted by the test itself.
pub struct FakeTransport {
    flags: Mutex<LinkFlags>,
    sends: Mutex<Vec<(ChannelKind, Payload)>>,
    handler: Mutex<Option<EventHandler>>,
    data: Mutex<Vec<DataTransfer>>,
    files: Mutex<Vec<FileTransfer>>,
    cancel_requests: Arc<Mutex<Vec<TransferId>>>,
}

impl FakeTransport {
    /// An activated transport with a reachable peer.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            flags: Mutex::new(LinkFlags {
                activation: ActivationState::Activated,
                reachable: true,
                complication_enabled: true,
            }),
            sends: Mutex::new(Vec::new()),
            handler: Mutex::new(None),
            data: Mutex::new(Vec::new()),
            files: Mutex::new(Vec::new()),
            cancel_requests: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.flags.lock().unwrap().reachable = reachable;
    }

    pub fn set_activation(&self, activation: ActivationState) {
        self.flags.lock().unwrap().activation = activation;
    }

    pub fn set_complication_enabled(&self, enabled: bool) {
        self.flags.lock().unwrap().complication_enabled = enabled;
    }

    /// Number of payloads handed to [`Transport::send`].
    pub fn send_count(&self) -> usize {
        self.sends.lock().unwrap().len()
    }

    /// Channels of the payloads handed to [`Transport::send`], in order.
    pub fn sent_channels(&self) -> Vec<ChannelKind> {
        self.sends.lock().unwrap().iter().map(|(c, _)| *c).collect()
    }

    /// Transfers whose cancellation reached the transport.
    pub fn cancel_requests(&self) -> Vec<TransferId> {
        self.cancel_requests.lock().unwrap().clone()
    }

    fn hook(&self) -> pairlink_core::transfer::CancelHook {
        let requests = Arc::clone(&self.cancel_requests);
        Arc::new(move |id| requests.lock().unwrap().push(id))
    }

    /// Add an outstanding user info transfer without announcing it.
    pub fn add_user_info(&self) -> SessionTransfer {
        let transfer = DataTransfer::new(
            TimedColor::now().to_mapping(),
            false,
            TimedColor::now(),
            Some(self.hook()),
        );
        self.data.lock().unwrap().push(transfer.clone());
        transfer.into()
    }

    /// Add an outstanding file transfer without announcing it.
    pub fn add_file(&self, path: &Path) -> SessionTransfer {
        let transfer = FileTransfer::new(
            FileHandle::new(path),
            Some(TimedColor::now().to_mapping()),
            TimedColor::now(),
            Some(self.hook()),
        );
        self.files.lock().unwrap().push(transfer.clone());
        transfer.into()
    }

    /// Drop a transfer from the live lists and report its outcome.
    pub fn complete(&self, transfer: &SessionTransfer, error: Option<&str>) {
        let id = transfer.id();
        self.data.lock().unwrap().retain(|t| t.id() != id);
        self.files.lock().unwrap().retain(|t| t.id() != id);
        self.emit(TransportEvent::TransferFinished {
            transfer: transfer.clone(),
            error: error.map(str::to_string),
        });
    }

    /// Deliver an event to the installed handler.
    pub fn emit(&self, event: TransportEvent) {
        let handler = self.handler.lock().unwrap().clone();
        if let Some(handler) = handler {
            handler(event);
        }
    }
}

impl Transport for FakeTransport {
    fn is_reachable(&self) -> bool {
        self.flags.lock().unwrap().reachable
    }

    fn activation_state(&self) -> ActivationState {
        self.flags.lock().unwrap().activation
    }

    fn is_complication_enabled(&self) -> bool {
        self.flags.lock().unwrap().complication_enabled
    }

    fn send(&self, channel: ChannelKind, payload: Payload) -> Result<()> {
        self.sends.lock().unwrap().push((channel, payload));
        Ok(())
    }

    fn outstanding_data_transfers(&self) -> Vec<DataTransfer> {
        self.data.lock().unwrap().clone()
    }

    fn outstanding_file_transfers(&self) -> Vec<FileTransfer> {
        self.files.lock().unwrap().clone()
    }

    fn on_status_event(&self, handler: EventHandler) {
        *self.handler.lock().unwrap() = Some(handler);
    }
}

/// A coordinator driving `fake` with the default session settings.
pub fn coordinator(fake: &Arc<FakeTransport>) -> SessionCoordinator {
    SessionCoordinator::new(
        Arc::clone(fake) as Arc<dyn Transport>,
        &SessionConfig::default(),
    )
}

/// Record every status the broadcaster publishes from now on.
pub fn record_statuses(broadcaster: &StatusBroadcaster) -> Arc<Mutex<Vec<CommandStatus>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    broadcaster.subscribe(move |status: &CommandStatus| sink.lock().unwrap().push(status.clone()));
    seen
}

/// A sample payload mapping carrying a fresh timed color.
pub fn sample_mapping() -> Mapping {
    TimedColor::now().to_mapping()
}

/// Loopback settings that finish quickly.
pub fn fast_loopback() -> LoopbackConfig {
    LoopbackConfig {
        chunk_size: 1024,
        step_interval: Duration::from_millis(1),
        ..LoopbackConfig::default()
    }
}

/// Create a temporary directory for test files.
pub fn create_temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Create a test file of `size` bytes.
pub fn create_test_file(dir: &Path, name: &str, size: usize) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, vec![b'.'; size]).expect("Failed to write test file");
    path
}
