//! Config subcommand handlers.

use busmod_config::Settings;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;

pub fn handle(args: &ConfigArgs, global: &GlobalOpts, settings: &Settings) -> Result<(), CliError> {
    match &args.command {
        ConfigCommand::Show => {
            print!("{}", settings.to_toml()?);
        }
        ConfigCommand::Path => {
            let path = global.config.clone().unwrap_or_else(busmod_config::config_path);
            println!("{}", path.display());
        }
    }
    Ok(())
}
