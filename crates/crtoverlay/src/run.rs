use anyhow::{Context, Result};
use crtconfig::{SettingsStore, TomlFileStore};
use renderer::{PhysicalSize, PreviewOptions, StillFrame, TestPattern, VideoFrameSource};
use tracing_subscriber::EnvFilter;

use crate::cli::RunArgs;
use crate::paths::AppPaths;

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Opens the TOML-backed store and waits for its first load.
pub fn open_store(paths: &AppPaths) -> Result<SettingsStore> {
    let file = paths.settings_file();
    tracing::debug!(
        config = %paths.config_dir().display(),
        settings = %file.display(),
        "resolved crtoverlay paths"
    );
    SettingsStore::open_blocking(TomlFileStore::new(&file))
        .with_context(|| format!("failed to load settings from {}", file.display()))
}

/// Runs the overlay in a preview window until it is closed.
pub fn run(paths: &AppPaths, args: RunArgs) -> Result<()> {
    let store = open_store(paths)?;
    let source = open_source(&args)?;
    let options = PreviewOptions {
        size: args.size,
        tick_interval: args.tick_interval,
        ..PreviewOptions::default()
    };
    tracing::info!(
        width = options.size.width,
        height = options.size.height,
        tick_interval = ?options.tick_interval,
        "starting crtoverlay preview"
    );
    renderer::run_preview(options, store, source)
}

fn open_source(args: &RunArgs) -> Result<Box<dyn VideoFrameSource>> {
    match &args.image {
        Some(path) => {
            let still = StillFrame::open(path)
                .with_context(|| format!("failed to open image {}", path.display()))?;
            tracing::info!(path = %path.display(), "using still image as frame source");
            Ok(Box::new(still))
        }
        None => {
            let PhysicalSize { width, height } = args.size;
            tracing::info!("using generated test pattern as frame source");
            Ok(Box::new(TestPattern::new(width, height)))
        }
    }
}
