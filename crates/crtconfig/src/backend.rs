//! Durable key-value boundary for the settings row.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{PixelScale, SettingKey, SettingsRecord, DEFAULT_BRIGHTNESS, DEFAULT_ENABLED};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access settings at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("settings backend unavailable: {0}")]
    Unavailable(String),
}

/// What the backend actually holds. Any field may be missing or hold a value
/// written by an older build, so nothing here is trusted until [`resolve`]d.
///
/// [`resolve`]: StoredSettings::resolve
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Kept as `f64` so the file holds the same decimal the user typed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pixel_size: Option<i64>,
}

impl StoredSettings {
    pub fn from_record(record: &SettingsRecord) -> Self {
        Self {
            enabled: Some(record.enabled),
            brightness: Some(decimal_f64(record.brightness)),
            pixel_size: Some(i64::from(record.pixel_size)),
        }
    }

    /// Keeps only the fields named in `keys`.
    pub fn restrict(mut self, keys: &[SettingKey]) -> Self {
        if !keys.contains(&SettingKey::Enabled) {
            self.enabled = None;
        }
        if !keys.contains(&SettingKey::Brightness) {
            self.brightness = None;
        }
        if !keys.contains(&SettingKey::PixelSize) {
            self.pixel_size = None;
        }
        self
    }

    /// Builds a full record, substituting the default for every field that is
    /// missing or out of range.
    pub fn resolve(&self) -> SettingsRecord {
        let enabled = self.enabled.unwrap_or(DEFAULT_ENABLED);

        let brightness = match self.brightness {
            Some(value) if value.is_finite() => value.clamp(0.0, 1.0) as f32,
            Some(value) => {
                tracing::warn!(value, "stored brightness is not finite; using default");
                DEFAULT_BRIGHTNESS
            }
            None => DEFAULT_BRIGHTNESS,
        };

        let pixel_size = match self.pixel_size {
            Some(raw) => PixelScale::try_from(raw).unwrap_or_else(|err| {
                tracing::warn!(%err, "stored pixel size rejected; using default");
                PixelScale::default()
            }),
            None => PixelScale::default(),
        };

        SettingsRecord {
            enabled,
            brightness,
            pixel_size,
        }
    }
}

/// Widens through the shortest decimal form, so `0.9_f32` becomes `0.9_f64`
/// rather than `0.8999999761581421`.
fn decimal_f64(value: f32) -> f64 {
    value
        .to_string()
        .parse()
        .unwrap_or_else(|_| f64::from(value))
}

/// Asynchronous-in-spirit durable storage. Calls may block; the settings
/// store only ever invokes them from worker threads.
pub trait DurableStore: Send + Sync + 'static {
    fn get(&self, keys: &[SettingKey]) -> Result<StoredSettings, StoreError>;
    fn set(&self, record: &SettingsRecord) -> Result<(), StoreError>;
}

/// Settings persisted as a small TOML document.
#[derive(Debug, Clone)]
pub struct TomlFileStore {
    path: PathBuf,
}

impl TomlFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn temp_path(&self) -> PathBuf {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let sequence = COUNTER.fetch_add(1, Ordering::Relaxed);
        let name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "settings".to_string());
        self.path
            .with_file_name(format!(".{name}.{}.{sequence}.tmp", std::process::id()))
    }
}

impl DurableStore for TomlFileStore {
    fn get(&self, keys: &[SettingKey]) -> Result<StoredSettings, StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(StoredSettings::default());
            }
            Err(err) => return Err(self.io_error(err)),
        };
        let stored: StoredSettings = toml::from_str(&text)?;
        Ok(stored.restrict(keys))
    }

    fn set(&self, record: &SettingsRecord) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| self.io_error(err))?;
            }
        }
        let body = toml::to_string_pretty(&StoredSettings::from_record(record))?;
        let temp = self.temp_path();
        fs::write(&temp, body).map_err(|err| self.io_error(err))?;
        if let Err(err) = fs::rename(&temp, &self.path) {
            let _ = fs::remove_file(&temp);
            return Err(self.io_error(err));
        }
        tracing::debug!(path = %self.path.display(), "persisted settings");
        Ok(())
    }
}

/// Process-local backend, handy for previews and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    stored: Mutex<StoredSettings>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stored(stored: StoredSettings) -> Self {
        Self {
            stored: Mutex::new(stored),
        }
    }

    pub fn stored(&self) -> StoredSettings {
        self.stored
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone()
    }
}

impl DurableStore for MemoryStore {
    fn get(&self, keys: &[SettingKey]) -> Result<StoredSettings, StoreError> {
        Ok(self.stored().restrict(keys))
    }

    fn set(&self, record: &SettingsRecord) -> Result<(), StoreError> {
        *self
            .stored
            .lock()
            .unwrap_or_else(|poison| poison.into_inner()) = StoredSettings::from_record(record);
        Ok(())
    }
}
