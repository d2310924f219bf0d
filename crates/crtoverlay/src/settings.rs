use anyhow::{Context, Result};
use crtconfig::{SettingKey, SettingValue, SettingsRecord, SettingsStore};

use crate::cli::SettingsAction;
use crate::paths::AppPaths;
use crate::run::open_store;

pub fn handle(paths: &AppPaths, action: SettingsAction) -> Result<()> {
    match action {
        SettingsAction::Path => {
            println!("{}", paths.settings_file().display());
            Ok(())
        }
        SettingsAction::Show { json } => {
            let store = open_store(paths)?;
            print_settings(&store.values(), json)
        }
        SettingsAction::Set { key, value } => {
            let value = SettingValue::parse(key, &value)
                .with_context(|| format!("rejected value for {key}"))?;
            let store = open_store(paths)?;
            let snapshot = store
                .set_value(value)
                .wait()
                .with_context(|| format!("failed to save {key}"))?;
            if snapshot.get(key) != value {
                println!("Stored {key} was normalized to {}", snapshot.get(key));
            }
            print_settings(&snapshot, false)
        }
        SettingsAction::Reset => {
            let store = open_store(paths)?;
            let snapshot = store
                .set_values(SettingsRecord::default())
                .wait()
                .context("failed to reset settings")?;
            print_settings(&snapshot, false)
        }
    }
}

fn print_settings(record: &SettingsRecord, json: bool) -> Result<()> {
    if json {
        let rendered =
            serde_json::to_string_pretty(record).context("failed to serialise settings")?;
        println!("{rendered}");
    } else {
        for key in SettingKey::ALL {
            println!("{key} = {}", record.get(key));
        }
    }
    Ok(())
}
