//! Configuration inspection

use anyhow::Result;
use ota_engine::prelude::*;

use crate::commands::{ConfigCommands, load_config};
use crate::output;

pub async fn execute(cmd: &ConfigCommands, json: bool) -> Result<()> {
    match cmd {
        ConfigCommands::Show { path } => {
            let config = match path {
                Some(path) => load_config(path).await?,
                None => OtaConfig::default(),
            };
            output::print_config(&config)
        }
        ConfigCommands::Check { path } => {
            let config = load_config(path).await?;
            output::print_config_ok(path, &config, json);
            Ok(())
        }
    }
}
