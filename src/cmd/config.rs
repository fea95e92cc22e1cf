//! Configuration view and validation commands: `truthcast config`.

use anyhow::Result;
use std::path::Path;

use truthcast::config::TruthcastToml;

use super::super::{Cli, ConfigCommands};
use super::load_config;

pub fn cmd_config(cli: &Cli, project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    let config_dir = project_dir.join(".truthcast");
    let config_path = config_dir.join("truthcast.toml");

    match command {
        None | Some(ConfigCommands::Show) => {
            let config = load_config(cli, project_dir)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&config.toml)?);
                return Ok(());
            }

            println!();
            println!("Truthcast Configuration");
            println!("=======================");
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No truthcast.toml found at {}", config_path.display());
                println!("Run 'truthcast config init' to create one.");
            }
            println!();
            println!("Effective values (with env/CLI overrides):");
            println!();
            print!("{}", config.toml.to_toml_string()?);
            println!();
            println!("Database: {}", config.db_path().display());
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let config = load_config(cli, project_dir)?;
            let warnings = config.toml.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("truthcast.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }
            std::fs::create_dir_all(&config_dir)?;
            std::fs::write(&config_path, TruthcastToml::default().to_toml_string()?)?;

            println!("Created truthcast.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [api] base_url, timeout_secs, retry_times");
            println!("  - [pipeline] detect_failure_policy, content_enabled");
            println!("  - [simulation] and [content] request defaults");
            println!();
        }
    }

    Ok(())
}
