//! Configuration view and validation commands: `nudge config`.

use std::path::Path;

use anyhow::{Context, Result};
use nudge::config::NudgeConfig;

use super::super::ConfigCommands;

const MASK: &str = "********";

/// Copy of `config` with every secret replaced by a mask.
fn redacted(config: &NudgeConfig) -> NudgeConfig {
    let mask = |v: &Option<String>| v.as_ref().map(|_| MASK.to_string());
    let mut shown = config.clone();
    shown.server.callback_token = mask(&config.server.callback_token);
    shown.slack.signing_secret = mask(&config.slack.signing_secret);
    shown.slack.client_secret = mask(&config.slack.client_secret);
    shown.scheduler.access_token = mask(&config.scheduler.access_token);
    shown
}

pub fn cmd_config(config_path: &Path, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            if config_path.exists() {
                println!("# Config file: {}", config_path.display());
            } else {
                println!("# No {} found, showing defaults", config_path.display());
            }
            println!("# Effective values (with .env and environment overrides)");
            println!();

            let config = NudgeConfig::resolve(config_path)?;
            let rendered = toml::to_string_pretty(&redacted(&config))
                .context("Failed to render configuration")?;
            println!("{}", rendered);
        }
        Some(ConfigCommands::Validate) => {
            let config = NudgeConfig::resolve(config_path)?;
            let errors = config.validate();
            let warnings = config.warnings();

            if !warnings.is_empty() {
                println!("Configuration warnings:");
                for warning in &warnings {
                    println!("  - {}", warning);
                }
                println!();
            }
            if !errors.is_empty() {
                anyhow::bail!("Invalid configuration:\n  - {}", errors.join("\n  - "));
            }
            println!("Configuration is valid.");
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("{} already exists.", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            NudgeConfig::default().save(config_path)?;

            println!("Created {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [windows] remind_after, escalate_after");
            println!("  - [slack] signing_secret, client_id, client_secret");
            println!("  - [scheduler] backend = \"cloud_tasks\" with project and region");
            println!();
        }
    }

    Ok(())
}
