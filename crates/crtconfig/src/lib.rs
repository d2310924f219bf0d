//! Durable, observable settings for the CRT overlay.
//!
//! The crate is split along the persistence boundary:
//! - the record types in this module describe the single logical settings row
//!   (`enabled`, `brightness`, `pixelSize`) and the typed values observers can
//!   write into it;
//! - [`backend`] defines the durable key-value boundary and ships a TOML file
//!   backend plus an in-memory one;
//! - [`store`] owns the published snapshot, runs the persist-then-reload
//!   pipeline on a worker thread, and fans change events out to subscribers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod backend;
pub mod store;

pub use backend::{DurableStore, MemoryStore, StoreError, StoredSettings, TomlFileStore};
pub use store::{
    PendingUpdate, PersistenceFailure, SettingsEvent, SettingsStore, SettingsSubscription,
    Snapshot,
};

pub const DEFAULT_ENABLED: bool = true;
pub const DEFAULT_BRIGHTNESS: f32 = 0.125;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvalidSetting {
    #[error("pixel size must be 1, 2, or 3 (got {0})")]
    PixelSize(i64),
    #[error("brightness must be a finite value in [0, 1] (got {0})")]
    Brightness(f32),
    #[error("unknown setting '{0}'; expected enabled, brightness, or pixelSize")]
    UnknownKey(String),
    #[error("invalid value '{value}' for {key}")]
    Malformed { key: SettingKey, value: String },
}

/// Size multiplier of one simulated phosphor block.
///
/// Only 1, 2, and 3 are representable; the rendered block is `3 * scale`
/// output pixels wide and tall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct PixelScale(u32);

impl PixelScale {
    pub const MIN: u32 = 1;
    pub const MAX: u32 = 3;
    pub const ONE: Self = Self(1);
    pub const ALL: [Self; 3] = [Self(1), Self(2), Self(3)];

    pub fn new(value: u32) -> Result<Self, InvalidSetting> {
        Self::try_from(i64::from(value))
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// Edge length of one block in output pixels.
    pub fn block_size(self) -> u32 {
        self.0 * 3
    }
}

impl Default for PixelScale {
    fn default() -> Self {
        Self::ONE
    }
}

impl TryFrom<i64> for PixelScale {
    type Error = InvalidSetting;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if (i64::from(Self::MIN)..=i64::from(Self::MAX)).contains(&value) {
            Ok(Self(value as u32))
        } else {
            Err(InvalidSetting::PixelSize(value))
        }
    }
}

impl From<PixelScale> for i64 {
    fn from(value: PixelScale) -> Self {
        i64::from(value.0)
    }
}

impl fmt::Display for PixelScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The complete settings row. Every snapshot the store publishes is one of these.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsRecord {
    pub enabled: bool,
    pub brightness: f32,
    pub pixel_size: PixelScale,
}

impl Default for SettingsRecord {
    fn default() -> Self {
        Self {
            enabled: DEFAULT_ENABLED,
            brightness: DEFAULT_BRIGHTNESS,
            pixel_size: PixelScale::ONE,
        }
    }
}

impl SettingsRecord {
    /// Returns a copy of the record with `value` merged in.
    pub fn with(mut self, value: SettingValue) -> Self {
        self.apply(value);
        self
    }

    pub fn apply(&mut self, value: SettingValue) {
        match value {
            SettingValue::Enabled(enabled) => self.enabled = enabled,
            SettingValue::Brightness(brightness) => self.brightness = brightness,
            SettingValue::PixelSize(scale) => self.pixel_size = scale,
        }
    }

    pub fn get(&self, key: SettingKey) -> SettingValue {
        match key {
            SettingKey::Enabled => SettingValue::Enabled(self.enabled),
            SettingKey::Brightness => SettingValue::Brightness(self.brightness),
            SettingKey::PixelSize => SettingValue::PixelSize(self.pixel_size),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    Enabled,
    Brightness,
    PixelSize,
}

impl SettingKey {
    pub const ALL: [SettingKey; 3] = [
        SettingKey::Enabled,
        SettingKey::Brightness,
        SettingKey::PixelSize,
    ];

    /// Name of the key at the durable-store boundary.
    pub fn as_str(self) -> &'static str {
        match self {
            SettingKey::Enabled => "enabled",
            SettingKey::Brightness => "brightness",
            SettingKey::PixelSize => "pixelSize",
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettingKey {
    type Err = InvalidSetting;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace(['-', '_'], "");
        match normalized.as_str() {
            "enabled" | "enable" => Ok(SettingKey::Enabled),
            "brightness" => Ok(SettingKey::Brightness),
            "pixelsize" | "pixelscale" => Ok(SettingKey::PixelSize),
            _ => Err(InvalidSetting::UnknownKey(value.trim().to_string())),
        }
    }
}

/// A single typed field update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SettingValue {
    Enabled(bool),
    Brightness(f32),
    PixelSize(PixelScale),
}

impl SettingValue {
    pub fn key(&self) -> SettingKey {
        match self {
            SettingValue::Enabled(_) => SettingKey::Enabled,
            SettingValue::Brightness(_) => SettingKey::Brightness,
            SettingValue::PixelSize(_) => SettingKey::PixelSize,
        }
    }

    /// Validated brightness; rejects non-finite values and anything outside `[0, 1]`.
    pub fn brightness(value: f32) -> Result<Self, InvalidSetting> {
        if value.is_finite() && (0.0..=1.0).contains(&value) {
            Ok(SettingValue::Brightness(value))
        } else {
            Err(InvalidSetting::Brightness(value))
        }
    }

    /// Parses a textual value for `key`, as typed on a command line.
    pub fn parse(key: SettingKey, raw: &str) -> Result<Self, InvalidSetting> {
        let trimmed = raw.trim();
        let malformed = || InvalidSetting::Malformed {
            key,
            value: trimmed.to_string(),
        };
        match key {
            SettingKey::Enabled => match trimmed.to_ascii_lowercase().as_str() {
                "true" | "on" | "yes" | "1" => Ok(SettingValue::Enabled(true)),
                "false" | "off" | "no" | "0" => Ok(SettingValue::Enabled(false)),
                _ => Err(malformed()),
            },
            SettingKey::Brightness => {
                let value: f32 = trimmed.parse().map_err(|_| malformed())?;
                Self::brightness(value)
            }
            SettingKey::PixelSize => {
                let value: i64 = trimmed.parse().map_err(|_| malformed())?;
                PixelScale::try_from(value).map(SettingValue::PixelSize)
            }
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Enabled(value) => write!(f, "{value}"),
            SettingValue::Brightness(value) => write!(f, "{value}"),
            SettingValue::PixelSize(value) => write!(f, "{value}"),
        }
    }
}
