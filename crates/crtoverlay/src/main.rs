mod cli;
mod paths;
mod run;
mod settings;

use anyhow::Result;
use cli::Command;
use paths::AppPaths;

fn main() -> Result<()> {
    let cli = cli::parse();
    run::initialise_tracing();

    let paths = AppPaths::discover(cli.settings)?;
    match cli.command {
        Some(Command::Settings(settings_cmd)) => settings::handle(&paths, settings_cmd.action),
        None => run::run(&paths, cli.run),
    }
}
