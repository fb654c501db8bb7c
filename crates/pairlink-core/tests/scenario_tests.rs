//! End-to-end session scenarios.
//!
//! Each test drives a [`SessionCoordinator`] through a full exchange, either
//! over the loopback pair or over a [`common::FakeTransport`] whose events
//! the test emits by hand.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pairlink_core::config::SessionConfig;
use pairlink_core::transport::loopback::CANCELLED_MESSAGE;
use pairlink_core::{
    CancelOutcome, ChannelKind, CommandStatus, Error, FileHandle, LoopbackConfig,
    LoopbackTransport, Payload, Phrase, SessionCoordinator, TimedColor, Transfer, TransferFilter,
    TransferObserverSet, TransferState,
};

use common::{coordinator, create_temp_dir, create_test_file, record_statuses, FakeTransport};

fn terminal_count(statuses: &[CommandStatus], transfer: &impl Transfer) -> usize {
    statuses
        .iter()
        .filter(|s| s.phrase.is_terminal())
        .filter(|s| s.transfer.as_ref().is_some_and(|t| t.id() == transfer.id()))
        .count()
}

#[tokio::test]
async fn test_large_file_transfer_reports_progress_and_finishes_once() {
    let dir = create_temp_dir();
    let path = create_test_file(dir.path(), "session.log", 10 * 1024 * 1024);

    let config = LoopbackConfig {
        chunk_size: 1024 * 1024,
        step_interval: Duration::from_millis(5),
        ..LoopbackConfig::default()
    };
    let (phone, _watch) = LoopbackTransport::pair(&config).unwrap();
    phone.activate();
    let session = SessionCoordinator::new(Arc::new(phone.clone()), &SessionConfig::default());
    let statuses = record_statuses(session.broadcaster());
    let mut stream = session.broadcaster().subscribe_stream();

    let color = TimedColor::now();
    session
        .dispatch(
            ChannelKind::TransferFile,
            Payload::File {
                file: FileHandle::new(&path),
                metadata: Some(color.to_mapping()),
            },
        )
        .unwrap();

    let transfer = session.store().get(TransferFilter::Files, 0).unwrap();
    let fractions = Arc::new(Mutex::new(Vec::new()));
    let observers = TransferObserverSet::inline();
    let sink = Arc::clone(&fractions);
    observers.observe(&transfer, move |_, progress| {
        sink.lock().unwrap().push((progress.state, progress.fraction()));
    });

    let finished = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let status = stream.recv().await.unwrap();
            if status.phrase.is_terminal() {
                return status;
            }
        }
    })
    .await
    .expect("transfer did not settle");

    // Nothing may follow the terminal status.
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(finished.channel, ChannelKind::TransferFile);
    assert_eq!(finished.phrase, Phrase::Finished);
    assert_eq!(finished.timed_color, Some(color));
    assert!(finished.error_message.is_none());

    let statuses = statuses.lock().unwrap();
    assert_eq!(statuses[0].phrase, Phrase::Transferring);
    assert_eq!(terminal_count(&statuses, &transfer), 1);

    let fractions = fractions.lock().unwrap();
    assert!(fractions.len() >= 2);
    assert!(fractions.windows(2).all(|w| w[0].1 <= w[1].1));
    assert_eq!(fractions.last().map(|f| f.0), Some(TransferState::Finished));
    assert!((fractions.last().map_or(0.0, |f| f.1) - 1.0).abs() < f64::EPSILON);

    assert_eq!(session.store().count(TransferFilter::All), 0);
    assert_eq!(transfer.progress().state, TransferState::Finished);
}

#[tokio::test]
async fn test_cancelled_loopback_transfer_fails_on_notify_channel() {
    let dir = create_temp_dir();
    let path = create_test_file(dir.path(), "session.log", 64 * 1024);

    let config = LoopbackConfig {
        chunk_size: 1024,
        step_interval: Duration::from_millis(5),
        ..LoopbackConfig::default()
    };
    let (phone, _watch) = LoopbackTransport::pair(&config).unwrap();
    phone.activate();
    let session = SessionCoordinator::new(Arc::new(phone.clone()), &SessionConfig::default());
    let mut stream = session.broadcaster().subscribe_stream();

    session
        .dispatch(
            ChannelKind::TransferFile,
            Payload::File {
                file: FileHandle::new(&path),
                metadata: None,
            },
        )
        .unwrap();
    let outcome = session
        .store()
        .cancel_at(TransferFilter::Files, 0, ChannelKind::SendMessage);
    assert_eq!(outcome, CancelOutcome::Requested);

    let settled = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let status = stream.recv().await.unwrap();
            if status.phrase.is_terminal() {
                return status;
            }
        }
    })
    .await
    .expect("cancelled transfer did not settle");

    assert_eq!(settled.channel, ChannelKind::SendMessage);
    assert_eq!(settled.phrase, Phrase::Failed);
    assert_eq!(settled.error_message.as_deref(), Some(CANCELLED_MESSAGE));
}

#[tokio::test]
async fn test_unreachable_messages_are_refused_without_side_effects() {
    let fake = FakeTransport::new();
    fake.set_reachable(false);
    let session = coordinator(&fake);
    let statuses = record_statuses(session.broadcaster());

    let message = session.dispatch(
        ChannelKind::SendMessage,
        Payload::Message(common::sample_mapping()),
    );
    assert!(matches!(
        message,
        Err(Error::NotReachable(ChannelKind::SendMessage))
    ));

    let bytes = serde_json::to_vec(&common::sample_mapping()).unwrap();
    let data = session.dispatch(ChannelKind::SendMessageData, Payload::MessageData(bytes));
    assert!(matches!(
        data,
        Err(Error::NotReachable(ChannelKind::SendMessageData))
    ));

    assert_eq!(fake.send_count(), 0);
    assert!(statuses.lock().unwrap().is_empty());

    // Durable channels still queue while the peer is away.
    session
        .dispatch(
            ChannelKind::UpdateContext,
            Payload::Context(common::sample_mapping()),
        )
        .unwrap();
    assert_eq!(fake.sent_channels(), vec![ChannelKind::UpdateContext]);
}

#[tokio::test]
async fn test_observers_share_one_finished_status_in_order() {
    let dir = create_temp_dir();
    let path = create_test_file(dir.path(), "report.log", 128);
    let fake = FakeTransport::new();
    let session = coordinator(&fake);

    let log = Arc::new(Mutex::new(Vec::new()));
    for name in ["first", "second"] {
        let log = Arc::clone(&log);
        session
            .broadcaster()
            .subscribe(move |status: &CommandStatus| {
                log.lock().unwrap().push((name, status.clone()));
            });
    }

    let transfer = fake.add_file(&path);
    fake.complete(&transfer, None);
    fake.complete(&transfer, None);

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].0, "first");
    assert_eq!(log[1].0, "second");
    assert_eq!(log[0].1, log[1].1);
    assert_eq!(log[0].1.phrase, Phrase::Finished);
    assert_eq!(log[0].1.channel, ChannelKind::TransferFile);
    assert_eq!(log[0].1.timed_color.as_ref(), Some(transfer.timed_color()));
}

#[tokio::test]
async fn test_cancel_against_a_stale_snapshot_is_harmless() {
    let fake = FakeTransport::new();
    let session = coordinator(&fake);
    let statuses = record_statuses(session.broadcaster());

    for _ in 0..3 {
        fake.add_user_info();
    }
    let snapshot = session.store().snapshot(TransferFilter::All);
    assert_eq!(snapshot.len(), 3);

    let second = snapshot[1].clone();
    fake.complete(&second, None);

    // The frozen row still points at the settled transfer.
    assert_eq!(
        session.cancel(&snapshot[1], ChannelKind::TransferUserInfo),
        CancelOutcome::AlreadySettled
    );
    assert!(fake.cancel_requests().is_empty());

    // A fresh snapshot no longer has a third row.
    assert_eq!(session.store().count(TransferFilter::All), 2);
    assert_eq!(
        session
            .store()
            .cancel_at(TransferFilter::All, 2, ChannelKind::TransferUserInfo),
        CancelOutcome::StaleIndex
    );
    assert!(fake.cancel_requests().is_empty());

    let statuses = statuses.lock().unwrap();
    assert_eq!(terminal_count(&statuses, &second), 1);
    assert!(statuses
        .iter()
        .all(|s| s.phrase != Phrase::Failed || s.transfer.is_some()));
}

#[tokio::test]
async fn test_cancelled_transfer_reports_on_requested_channel() {
    let fake = FakeTransport::new();
    let session = coordinator(&fake);
    let statuses = record_statuses(session.broadcaster());

    let transfer = fake.add_user_info();
    assert_eq!(
        session.cancel(&transfer, ChannelKind::UpdateContext),
        CancelOutcome::Requested
    );
    assert_eq!(fake.cancel_requests(), vec![transfer.id()]);

    fake.complete(&transfer, Some(CANCELLED_MESSAGE));

    let statuses = statuses.lock().unwrap();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].channel, ChannelKind::UpdateContext);
    assert_eq!(statuses[0].phrase, Phrase::Failed);
    assert_eq!(statuses[0].error_message.as_deref(), Some(CANCELLED_MESSAGE));
}

#[tokio::test]
async fn test_recreated_session_shows_last_received_context() {
    let (phone, watch) = LoopbackTransport::pair(&common::fast_loopback()).unwrap();
    phone.activate();
    watch.activate();
    let watch_session = SessionCoordinator::new(Arc::new(watch.clone()), &SessionConfig::default());
    let mut watch_stream = watch_session.broadcaster().subscribe_stream();

    let color = TimedColor::now();
    SessionCoordinator::new(Arc::new(phone.clone()), &SessionConfig::default())
        .dispatch(ChannelKind::UpdateContext, Payload::Context(color.to_mapping()))
        .unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let status = watch_stream.recv().await.unwrap();
            if status.phrase == Phrase::Received {
                return status;
            }
        }
    })
    .await
    .expect("context never arrived");
    drop(watch_session);

    let reopened = SessionCoordinator::new(Arc::new(watch.clone()), &SessionConfig::default());
    assert_eq!(
        reopened.broadcaster().last_status(ChannelKind::UpdateContext),
        Some(received)
    );
    assert_eq!(
        reopened
            .broadcaster()
            .last_status(ChannelKind::UpdateContext)
            .and_then(|s| s.timed_color),
        Some(color)
    );
}
