//! Pairlink CLI - phone and wearable session layer
//!
//! Exercises the Pairlink session layer against an in-process phone/watch
//! pair.
//!
//! ## Quick Start
//!
//! ```bash
//! # Show the channels
//! pairlink channels
//!
//! # Send a message and a file, cancelling the file transfer
//! pairlink demo -c send-message -c transfer-file --cancel
//! ```

#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::struct_excessive_bools)]

use anyhow::Result;
use clap::Parser;

mod commands;
pub mod ui;

use commands::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Command::Channels(args) => commands::channels::run(&args),
        Command::Demo(args) => commands::demo::run(args).await,
        Command::Config(args) => commands::config::run(args),
        Command::Completions(args) => commands::completions::run(args.action),
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,pairlink=info,pairlink_core=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
