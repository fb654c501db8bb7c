//! Channels command implementation.

use anyhow::Result;
use pairlink_core::ChannelKind;
use serde::Serialize;

use super::ChannelsArgs;
use crate::ui;

#[derive(Serialize)]
struct ChannelRow {
    channel: ChannelKind,
    name: &'static str,
    durable: bool,
    requires_reachability: bool,
    transfer: bool,
}

/// Run the channels command.
pub fn run(args: &ChannelsArgs) -> Result<()> {
    if args.json {
        let rows: Vec<ChannelRow> = ChannelKind::ALL
            .into_iter()
            .map(|channel| {
                let props = channel.properties();
                ChannelRow {
                    channel,
                    name: channel.as_str(),
                    durable: props.durable,
                    requires_reachability: props.requires_reachability,
                    transfer: channel.is_transfer(),
                }
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        println!();
        print!("{}", ui::channel_table());
        println!();
    }
    Ok(())
}
