//! Demo command implementation.
//!
//! Wires a loopback phone/watch pair to two session coordinators, sends a
//! sample payload on each requested channel from the phone, and prints every
//! status both sides observe until each channel has settled.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use pairlink_core::samples::SampleProvider;
use pairlink_core::{
    ChannelKind, CommandStatus, Error, LoopbackTransport, Phrase, SessionCoordinator, Transfer,
    TransferFilter, TransferObserverSet,
};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use super::DemoArgs;
use crate::ui;

#[derive(Serialize)]
struct StatusRecord<'a> {
    device: &'a str,
    #[serde(flatten)]
    status: &'a CommandStatus,
}

fn print_status(device: &str, status: &CommandStatus, json: bool) {
    if json {
        match serde_json::to_string(&StatusRecord { device, status }) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!("Cannot encode status: {}", e),
        }
    } else {
        println!("{}", ui::status_line(device, status));
    }
}

#[derive(Serialize)]
struct RefusalRecord {
    device: &'static str,
    channel: ChannelKind,
    refused: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
}

fn print_refusal(channel: ChannelKind, error: &Error, json: bool) {
    if json {
        let record = RefusalRecord {
            device: "phone",
            channel,
            refused: error.to_string(),
            code: error.code(),
        };
        match serde_json::to_string(&record) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!("Cannot encode refusal: {}", e),
        }
    } else {
        println!("  [phone] ! {channel}...{error}");
    }
}

/// Whether `status` is the last one the phone expects on its channel.
fn settles(status: &CommandStatus, replies: bool) -> bool {
    match (status.channel, status.phrase) {
        (_, Phrase::Failed) | (ChannelKind::UpdateContext, Phrase::Updated) => true,
        (ChannelKind::SendMessage | ChannelKind::SendMessageData, Phrase::Replied) => true,
        (ChannelKind::SendMessage | ChannelKind::SendMessageData, Phrase::Sent) => !replies,
        (channel, Phrase::Finished) => channel.is_transfer(),
        _ => false,
    }
}

/// Run the demo command.
pub async fn run(args: DemoArgs) -> Result<()> {
    let mut config = super::load_config();
    if let Some(step) = &args.step {
        config.loopback.step_interval =
            ui::parse_duration(step).with_context(|| format!("Invalid step: {step}"))?;
    }
    if let Some(chunk_size) = args.chunk_size {
        config.loopback.chunk_size = chunk_size;
    }
    config.validate()?;
    let timeout = ui::parse_duration(&args.timeout)
        .with_context(|| format!("Invalid timeout: {}", args.timeout))?;
    let channels = if args.channels.is_empty() {
        ChannelKind::ALL.to_vec()
    } else {
        args.channels.clone()
    };

    let (phone, watch) = LoopbackTransport::pair(&config.loopback)?;
    let phone_session = SessionCoordinator::new(Arc::new(phone.clone()), &config.session);
    let watch_session = SessionCoordinator::new(Arc::new(watch.clone()), &config.session);

    let json = args.json;
    for (device, session) in [("phone", &phone_session), ("watch", &watch_session)] {
        session
            .broadcaster()
            .subscribe(move |status: &CommandStatus| print_status(device, status, json));
    }
    let mut outcomes = phone_session.broadcaster().subscribe_stream();

    watch.activate();
    if !args.no_activate {
        phone.activate();
    }
    if args.unreachable {
        phone.set_reachable(false);
        watch.set_reachable(false);
    }

    let samples = SampleProvider::from_config(&config.general);
    let mut pending: HashSet<ChannelKind> = HashSet::new();
    for channel in &channels {
        let payload = samples.payload_for(*channel)?;
        match phone_session.dispatch(*channel, payload) {
            Ok(()) => {
                pending.insert(*channel);
            }
            Err(e) if e.is_recoverable() => print_refusal(*channel, &e, json),
            Err(e) => return Err(e).with_context(|| format!("Failed to dispatch {channel}")),
        }
    }

    let progress = TransferObserverSet::new(tokio::runtime::Handle::current());
    for transfer in phone_session.store().snapshot(TransferFilter::All).iter() {
        let channel = transfer.channel();
        progress.observe(transfer, move |_, p| {
            if !json {
                println!("  [phone] {channel} {}", ui::progress_bar(p));
            }
        });
    }

    if args.cancel {
        match phone_session.store().get(TransferFilter::All, 0) {
            Ok(transfer) => {
                let outcome = phone_session.cancel(&transfer, transfer.channel());
                tracing::info!("Cancel of {} transfer: {:?}", transfer.channel(), outcome);
            }
            Err(_) => println!("  No outstanding transfer to cancel"),
        }
    }

    let replies = config.loopback.reply_to_messages;
    let waited = tokio::time::timeout(timeout, async {
        while !pending.is_empty() {
            match outcomes.recv().await {
                Ok(status) => {
                    if settles(&status, replies) {
                        pending.remove(&status.channel);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Status stream lagged, skipped {} statuses", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
    .await;

    if !json {
        println!();
        println!("  Last status per channel:");
        for status in phone_session.broadcaster().last_statuses() {
            println!("{}", ui::status_line("phone", &status));
        }
        println!();
    }

    if waited.is_err() || !pending.is_empty() {
        let mut names: Vec<_> = pending.iter().map(|c| c.as_str()).collect();
        names.sort_unstable();
        bail!(
            "Timed out after {} waiting for: {}",
            args.timeout,
            names.join(", ")
        );
    }
    Ok(())
}
