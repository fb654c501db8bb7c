//! Sample payloads for every channel.
//!
//! Each payload carries a freshly stamped [`TimedColor`], so the receiving
//! side can render exactly what the sender rendered.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::channel::ChannelKind;
use crate::color::TimedColor;
use crate::config::GeneralConfig;
use crate::error::Result;
use crate::transfer::FileHandle;
use crate::transport::Payload;

/// File name of the generated sample log.
pub const SAMPLE_FILE_NAME: &str = "pairlink-sample.log";

/// Builds sample payloads, writing sample files under a directory.
#[derive(Debug, Clone)]
pub struct SampleProvider {
    dir: PathBuf,
}

impl SampleProvider {
    /// Create a provider writing sample files under `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Create a provider using the platform data directory, scoped by the
    /// configured shared container id.
    #[must_use]
    pub fn from_config(config: &GeneralConfig) -> Self {
        let base = directories::ProjectDirs::from("com", "pairlink", "Pairlink")
            .map_or_else(std::env::temp_dir, |dirs| dirs.data_dir().to_path_buf());
        let container = config.shared_container_id.as_deref().unwrap_or("samples");
        Self::new(base.join(container))
    }

    /// Directory sample files are written to.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// A sample payload for `channel`.
    ///
    /// # Errors
    ///
    /// Returns an error if the sample file cannot be written.
    pub fn payload_for(&self, channel: ChannelKind) -> Result<Payload> {
        let timed_color = TimedColor::now();
        let mapping = timed_color.to_mapping();
        let payload = match channel {
            ChannelKind::UpdateContext => Payload::Context(mapping),
            ChannelKind::SendMessage => Payload::Message(mapping),
            ChannelKind::SendMessageData => Payload::MessageData(serde_json::to_vec(&mapping)?),
            ChannelKind::TransferUserInfo => Payload::UserInfo(mapping),
            ChannelKind::TransferCurrentComplicationInfo => Payload::ComplicationInfo(mapping),
            ChannelKind::TransferFile => Payload::File {
                file: self.write_sample_file(&timed_color)?,
                metadata: Some(mapping),
            },
        };
        Ok(payload)
    }

    /// Append a line for `timed_color` to the sample log and return it.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn write_sample_file(&self, timed_color: &TimedColor) -> Result<FileHandle> {
        std::fs::create_dir_all(&self.dir)?;

        let path = self.dir.join(SAMPLE_FILE_NAME);
        let mut file = OpenOptions::new().append(true).create(true).open(&path)?;
        writeln!(
            file,
            "{} {}",
            timed_color.instant().to_rfc3339(),
            timed_color.color().to_hex()
        )?;

        tracing::debug!("Wrote sample file {}", path.display());
        Ok(FileHandle::new(path))
    }
}
