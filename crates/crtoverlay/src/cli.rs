use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use crtconfig::SettingKey;
use renderer::PhysicalSize;

#[derive(Parser, Debug)]
#[command(
    name = "crtoverlay",
    author,
    version,
    about = "CRT phosphor overlay for video frames",
    arg_required_else_help = false
)]
pub struct Cli {
    /// Settings file to use instead of the one in the config directory.
    #[arg(long, global = true, value_name = "FILE", env = "CRTOVERLAY_SETTINGS")]
    pub settings: Option<PathBuf>,

    #[command(flatten)]
    pub run: RunArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Still image used as the video frame (a moving test pattern otherwise).
    #[arg(long, value_name = "FILE")]
    pub image: Option<PathBuf>,

    /// Surface size in physical pixels.
    #[arg(
        long,
        value_name = "WIDTHxHEIGHT",
        value_parser = parse_size,
        default_value = "960x540"
    )]
    pub size: PhysicalSize<u32>,

    /// Render on a fixed timer (e.g. `33ms`) instead of every display refresh.
    #[arg(long, value_name = "DURATION", value_parser = parse_tick_interval)]
    pub tick_interval: Option<Duration>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Inspect or change the persisted overlay settings.
    Settings(SettingsCommand),
}

#[derive(Parser, Debug)]
pub struct SettingsCommand {
    #[command(subcommand)]
    pub action: SettingsAction,
}

#[derive(Subcommand, Debug)]
pub enum SettingsAction {
    /// Print the published settings.
    Show {
        /// Emit JSON instead of `key = value` lines.
        #[arg(long)]
        json: bool,
    },
    /// Persist one value (`enabled`, `brightness`, or `pixelSize`).
    Set {
        #[arg(value_name = "KEY", value_parser = parse_key)]
        key: SettingKey,
        #[arg(value_name = "VALUE", allow_hyphen_values = true)]
        value: String,
    },
    /// Restore every setting to its default.
    Reset,
    /// Print the settings file location.
    Path,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_size(value: &str) -> Result<PhysicalSize<u32>, String> {
    let trimmed = value.trim();
    let (w, h) = trimmed
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("invalid size '{trimmed}'; expected WIDTHxHEIGHT"))?;
    let width = w
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid width '{}'", w.trim()))?;
    let height = h
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid height '{}'", h.trim()))?;
    if width == 0 || height == 0 {
        return Err("size must be greater than zero in both dimensions".into());
    }
    Ok(PhysicalSize::new(width, height))
}

pub fn parse_tick_interval(value: &str) -> Result<Duration, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("tick interval must not be empty".to_string());
    }
    let interval = humantime::parse_duration(trimmed)
        .map_err(|err| format!("invalid tick interval '{trimmed}': {err}"))?;
    if interval.is_zero() {
        return Err("tick interval must be greater than zero".to_string());
    }
    Ok(interval)
}

pub fn parse_key(value: &str) -> Result<SettingKey, String> {
    value.parse::<SettingKey>().map_err(|err| {
        format!("{err}; expected one of enabled, brightness, pixelSize")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_sizes() {
        assert_eq!(parse_size("300x150").unwrap(), PhysicalSize::new(300, 150));
        assert_eq!(parse_size(" 1920X1080 ").unwrap(), PhysicalSize::new(1920, 1080));
        assert!(parse_size("300").is_err());
        assert!(parse_size("0x150").is_err());
        assert!(parse_size("wide x 10").is_err());
    }

    #[test]
    fn parses_tick_intervals() {
        assert_eq!(
            parse_tick_interval("33ms").unwrap(),
            Duration::from_millis(33)
        );
        assert_eq!(parse_tick_interval("1s").unwrap(), Duration::from_secs(1));
        assert!(parse_tick_interval("0s").is_err());
        assert!(parse_tick_interval("soon").is_err());
        assert!(parse_tick_interval("").is_err());
    }

    #[test]
    fn parses_setting_keys() {
        assert_eq!(parse_key("pixelSize").unwrap(), SettingKey::PixelSize);
        assert_eq!(parse_key("pixel-size").unwrap(), SettingKey::PixelSize);
        assert_eq!(parse_key("Brightness").unwrap(), SettingKey::Brightness);
        assert!(parse_key("contrast").is_err());
    }

    #[test]
    fn set_accepts_negative_looking_values() {
        let cli = Cli::try_parse_from(["crtoverlay", "settings", "set", "brightness", "-0.5"])
            .unwrap();
        match cli.command {
            Some(Command::Settings(SettingsCommand {
                action: SettingsAction::Set { key, value },
            })) => {
                assert_eq!(key, SettingKey::Brightness);
                assert_eq!(value, "-0.5");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn run_defaults_apply_without_subcommand() {
        let cli = Cli::try_parse_from(["crtoverlay"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.run.size, PhysicalSize::new(960, 540));
        assert!(cli.run.image.is_none());
        assert!(cli.run.tick_interval.is_none());
    }

    #[test]
    fn only_settings_subcommand_is_offered() {
        let names: Vec<String> = Cli::command()
            .get_subcommands()
            .map(|cmd| cmd.get_name().to_string())
            .collect();
        assert_eq!(names, ["settings"]);
        assert!(Cli::try_parse_from(["crtoverlay", "render", "--output", "crt.png"]).is_err());
    }
}
