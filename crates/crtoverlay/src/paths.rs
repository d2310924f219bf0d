use std::env;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use directories_next::ProjectDirs;

pub const ENV_CONFIG_DIR: &str = "CRTOVERLAY_CONFIG_DIR";

const QUALIFIER: &str = "org";
const ORGANISATION: &str = "CrtOverlay";
const APPLICATION: &str = "crtoverlay";
const SETTINGS_FILE: &str = "settings.toml";

#[derive(Debug, Clone)]
pub struct AppPaths {
    config_dir: PathBuf,
    settings_override: Option<PathBuf>,
}

impl AppPaths {
    /// Resolves the config directory, honouring `CRTOVERLAY_CONFIG_DIR` before
    /// the platform default.
    pub fn discover(settings_override: Option<PathBuf>) -> Result<Self> {
        let config_dir = match env_override(ENV_CONFIG_DIR) {
            Some(dir) => dir,
            None => ProjectDirs::from(QUALIFIER, ORGANISATION, APPLICATION)
                .ok_or_else(|| anyhow!("failed to determine user directories"))?
                .config_dir()
                .to_path_buf(),
        };
        Ok(Self {
            config_dir,
            settings_override,
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn settings_file(&self) -> PathBuf {
        self.settings_override
            .clone()
            .unwrap_or_else(|| self.config_dir.join(SETTINGS_FILE))
    }
}

#[cfg(test)]
impl AppPaths {
    pub fn from_raw(config_dir: PathBuf, settings_override: Option<PathBuf>) -> Self {
        Self {
            config_dir,
            settings_override,
        }
    }
}

fn env_override(name: &str) -> Option<PathBuf> {
    match env::var_os(name) {
        Some(value) if !value.is_empty() => Some(PathBuf::from(value)),
        _ => None,
    }
}
