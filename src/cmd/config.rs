//! Configuration view and validation commands: `papersnipe config`.

use anyhow::Result;

use super::super::ConfigCommands;

fn mask(secret: &str) -> String {
    if secret.is_empty() {
        "(not set)".to_string()
    } else {
        let visible: String = secret.chars().take(4).collect();
        format!("{}****", visible)
    }
}

pub fn cmd_config(
    project_dir: &std::path::Path,
    verbose: bool,
    command: Option<ConfigCommands>,
) -> Result<()> {
    use papersnipe::config::{CONFIG_FILE, Config, SnipeToml};

    let config_path = project_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Papersnipe Configuration");
            println!("========================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No {} found at {}", CONFIG_FILE, config_path.display());
                println!("Using defaults and environment variables.");
            }
            println!();

            let config = Config::load(project_dir, verbose)?;

            println!("[paths]");
            println!("  database = \"{}\"", config.database_path.display());
            println!("  repos = \"{}\"", config.repos_path.display());
            println!();

            println!("[hub]");
            println!("  token = {}", mask(&config.hub.token));
            println!("  username = \"{}\"", config.hub.username);
            println!();

            println!("[claude]");
            match &config.claude.cli_path {
                Some(path) => println!("  cli_path = \"{}\"", path.display()),
                None => println!("  cli_path = (discovered)"),
            }
            println!("  init_enabled = {}", config.claude.init_enabled);
            println!("  auto_approve = {}", config.claude.auto_approve);
            println!("  auto_install = {}", config.claude.auto_install);
            println!("  install_method = \"{}\"", config.claude.install_method);
            match config.claude.init_timeout {
                Some(timeout) => println!("  init_timeout = {}s", timeout.as_secs()),
                None => println!("  init_timeout = none"),
            }
            println!();

            println!("[upload]");
            println!("  enabled = {}", config.hub.upload_enabled);
            println!("  private = {}", config.hub.private);
            println!("  force = {}", config.hub.force);
            println!();

            println!("[pipeline]");
            println!("  auto_retry_failed = {}", config.pipeline.auto_retry_failed);
            println!("  parallel_generation = {}", config.pipeline.parallel_generation);
            println!(
                "  max_concurrent_generations = {}",
                config.pipeline.max_concurrent_generations
            );
            println!();

            if !config_path.exists() {
                println!("Run 'papersnipe config init' to create a {} file.", CONFIG_FILE);
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let config = Config::load(project_dir, verbose)?;
            let warnings = config.validate();

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
                println!("{} already exists at {}", CONFIG_FILE, config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            SnipeToml::starter().save(&config_path)?;

            println!("Created {} at {}", CONFIG_FILE, config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [paths] database, repos");
            println!("  - [hub] username (keep the token in HF_TOKEN or .env)");
            println!("  - [claude] cli_path, init_timeout, install_method");
            println!("  - [upload] and [pipeline] behaviour");
            println!();
        }
    }

    Ok(())
}
