use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn crtoverlay(config_dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_crtoverlay"))
        .env("CRTOVERLAY_CONFIG_DIR", config_dir)
        .env_remove("CRTOVERLAY_SETTINGS")
        .env("RUST_LOG", "warn")
        .args(args)
        .output()
        .expect("failed to run crtoverlay")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn show_prints_defaults_without_a_settings_file() {
    let root = TempDir::new().unwrap();
    let output = crtoverlay(root.path(), &["settings", "show"]);

    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("enabled = true"), "{text}");
    assert!(text.contains("brightness = 0.125"), "{text}");
    assert!(text.contains("pixelSize = 1"), "{text}");
}

#[test]
fn set_persists_to_settings_toml() {
    let root = TempDir::new().unwrap();
    let output = crtoverlay(root.path(), &["settings", "set", "pixelSize", "3"]);
    assert!(output.status.success(), "{:?}", output);
    assert!(stdout(&output).contains("pixelSize = 3"));

    let stored = fs::read_to_string(root.path().join("settings.toml")).unwrap();
    assert!(stored.contains("pixelSize = 3"), "{stored}");

    let shown = crtoverlay(root.path(), &["settings", "show", "--json"]);
    assert!(shown.status.success());
    let text = stdout(&shown);
    assert!(text.contains("\"pixelSize\": 3"), "{text}");
    assert!(text.contains("\"enabled\": true"), "{text}");
}

#[test]
fn set_brightness_keeps_the_typed_decimal() {
    let root = TempDir::new().unwrap();
    let output = crtoverlay(root.path(), &["settings", "set", "brightness", "0.9"]);
    assert!(output.status.success(), "{:?}", output);

    let stored = fs::read_to_string(root.path().join("settings.toml")).unwrap();
    assert!(stored.contains("brightness = 0.9\n"), "{stored}");

    let shown = stdout(&crtoverlay(root.path(), &["settings", "show"]));
    assert!(shown.contains("brightness = 0.9\n"), "{shown}");
}

#[test]
fn set_rejects_invalid_values() {
    let root = TempDir::new().unwrap();

    let bad_scale = crtoverlay(root.path(), &["settings", "set", "pixelSize", "4"]);
    assert!(!bad_scale.status.success());

    let bad_brightness = crtoverlay(root.path(), &["settings", "set", "brightness", "-0.5"]);
    assert!(!bad_brightness.status.success());

    assert!(!root.path().join("settings.toml").exists());
}

#[test]
fn reset_restores_defaults() {
    let root = TempDir::new().unwrap();
    assert!(crtoverlay(root.path(), &["settings", "set", "enabled", "false"])
        .status
        .success());
    assert!(crtoverlay(root.path(), &["settings", "set", "brightness", "0.9"])
        .status
        .success());

    let reset = crtoverlay(root.path(), &["settings", "reset"]);
    assert!(reset.status.success());
    let text = stdout(&reset);
    assert!(text.contains("enabled = true"), "{text}");
    assert!(text.contains("brightness = 0.125"), "{text}");
}

#[test]
fn explicit_settings_flag_overrides_config_dir() {
    let root = TempDir::new().unwrap();
    let custom = root.path().join("elsewhere/overlay.toml");
    let custom_arg = custom.to_str().unwrap();

    let path = crtoverlay(root.path(), &["--settings", custom_arg, "settings", "path"]);
    assert!(path.status.success());
    assert_eq!(stdout(&path).trim(), custom_arg);

    let set = crtoverlay(
        root.path(),
        &["settings", "--settings", custom_arg, "set", "brightness", "0.5"],
    );
    assert!(set.status.success(), "{:?}", set);
    assert!(custom.exists());
    assert!(!root.path().join("settings.toml").exists());
}
