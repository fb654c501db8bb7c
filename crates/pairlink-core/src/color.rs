//! Timed colors.
//!
//! Every exchange carries a random color and the moment it was produced.
//! Both peers render the value they were handed instead of computing their
//! own, so two screens showing the same exchange always agree.

use chrono::{DateTime, Local, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::Mapping;

/// An RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[u8; 3]", into = "[u8; 3]")]
pub struct Rgb {
    /// Red component
    pub red: u8,
    /// Green component
    pub green: u8,
    /// Blue component
    pub blue: u8,
}

impl Rgb {
    /// Create a color from its components.
    #[must_use]
    pub const fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }

    /// Pick a random color.
    #[must_use]
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        Self::new(rng.gen(), rng.gen(), rng.gen())
    }

    /// Format as `#rrggbb`.
    #[must_use]
    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.red, self.green, self.blue)
    }
}

impl From<[u8; 3]> for Rgb {
    fn from([red, green, blue]: [u8; 3]) -> Self {
        Self::new(red, green, blue)
    }
}

impl From<Rgb> for [u8; 3] {
    fn from(color: Rgb) -> Self {
        [color.red, color.green, color.blue]
    }
}

/// A color paired with the time it was produced.
///
/// Immutable once built. The formatted time stamp is computed once at
/// construction so every observer displays the same text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedColor {
    #[serde(rename = "colorData")]
    color: Rgb,
    #[serde(rename = "timeStamp")]
    time_stamp: String,
    instant: DateTime<Utc>,
}

impl TimedColor {
    /// A random color stamped with the current time.
    #[must_use]
    pub fn now() -> Self {
        Self::new(Rgb::random(), Utc::now())
    }

    /// Stamp a color with the given instant.
    #[must_use]
    pub fn new(color: Rgb, instant: DateTime<Utc>) -> Self {
        Self {
            color,
            time_stamp: format_time_stamp(instant),
            instant,
        }
    }

    /// The color.
    #[must_use]
    pub fn color(&self) -> Rgb {
        self.color
    }

    /// The formatted time stamp (medium local time, e.g. `3:04:05 PM`).
    #[must_use]
    pub fn time_stamp(&self) -> &str {
        &self.time_stamp
    }

    /// The instant the color was produced.
    #[must_use]
    pub fn instant(&self) -> DateTime<Utc> {
        self.instant
    }

    /// Encode into a payload mapping.
    #[must_use]
    pub fn to_mapping(&self) -> Mapping {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => Mapping::new(),
        }
    }

    /// Recover a timed color from a payload mapping.
    ///
    /// Unrelated keys in the mapping are ignored. Returns `None` when the
    /// mapping does not carry a timed color.
    #[must_use]
    pub fn from_mapping(mapping: &Mapping) -> Option<Self> {
        serde_json::from_value(serde_json::Value::Object(mapping.clone())).ok()
    }
}

fn format_time_stamp(instant: DateTime<Utc>) -> String {
    instant.with_timezone(&Local).format("%-I:%M:%S %p").to_string()
}
