#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Password};

use super::{Config, ConfigError, ServiceNowConfig};
use crate::servicenow::ServiceNowClient;

#[inline]
pub fn run_interactive_config() -> Result<()> {
    eprintln!("{}", style("🔧 ServiceNow MCP Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config()?;

    eprintln!("{}", style("ServiceNow Instance").bold().yellow());
    eprintln!("Configure the instance and the account used for Table API calls.");
    eprintln!();

    configure_servicenow(&mut config.servicenow)?;

    eprintln!();
    eprintln!("{}", style("Testing configuration...").yellow());

    match test_servicenow_connection(&config.servicenow) {
        Ok(()) => eprintln!("{}", style("✓ ServiceNow connection successful!").green()),
        Err(e) => {
            eprintln!(
                "{}",
                style("⚠ Warning: Could not reach ServiceNow").yellow()
            );
            eprintln!("  {}", style(e).dim());
            eprintln!("You can continue, but the server's tools will fail until this is fixed.");
        }
    }

    eprintln!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());
        eprintln!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("ServiceNow Settings:").bold().yellow());
    eprintln!("  Instance: {}", style(display_or_unset(&config.servicenow.instance)).cyan());
    eprintln!("  Username: {}", style(display_or_unset(&config.servicenow.username)).cyan());
    eprintln!("  Password: {}", style(mask_secret(&config.servicenow.password)).cyan());
    eprintln!("  Timeout: {}s", style(config.servicenow.timeout_seconds).cyan());
    eprintln!("  Retry Attempts: {}", style(config.servicenow.retry_attempts).cyan());

    eprintln!();
    eprintln!("{}", style("Listing Tools:").bold().yellow());
    eprintln!("  Default Limit: {}", style(config.server.default_list_limit).cyan());
    eprintln!("  Max Limit: {}", style(config.server.max_list_limit).cyan());

    eprintln!();
    match config.require_credentials() {
        Ok(()) => eprintln!("  Status: {}", style("ready").green()),
        Err(e) => eprintln!("  Status: {} ({})", style("incomplete").red(), e),
    }

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

/// Replace every character of a secret so its length is the only thing shown
pub(crate) fn mask_secret(secret: &str) -> String {
    if secret.is_empty() {
        "(not set)".to_string()
    } else {
        "*".repeat(secret.chars().count())
    }
}

fn display_or_unset(value: &str) -> &str {
    if value.trim().is_empty() {
        "(not set)"
    } else {
        value
    }
}

fn load_existing_config() -> Result<Config> {
    Config::load_file().map_or_else(
        |_| -> Result<Config> {
            eprintln!(
                "{}",
                style("No existing configuration found. Using defaults.").yellow()
            );
            let base_dir = Config::config_dir()?;
            Ok(Config {
                base_dir,
                ..Config::default()
            })
        },
        |config| {
            eprintln!("{}", style("Found existing configuration.").green());
            Ok(config)
        },
    )
}

fn configure_servicenow(servicenow: &mut ServiceNowConfig) -> Result<()> {
    let instance: String = Input::new()
        .with_prompt("Instance URL (e.g. https://dev12345.service-now.com)")
        .with_initial_text(servicenow.instance.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            let temp_config = ServiceNowConfig {
                instance: input.clone(),
                ..ServiceNowConfig::default()
            };
            temp_config.instance_url()?;
            Ok(())
        })
        .interact_text()?;

    let username: String = Input::new()
        .with_prompt("Username")
        .with_initial_text(servicenow.username.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Username cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let keep_existing = !servicenow.password.is_empty();
    let prompt = if keep_existing {
        "Password (leave empty to keep the current one)"
    } else {
        "Password"
    };
    let password = Password::new()
        .with_prompt(prompt)
        .allow_empty_password(keep_existing)
        .interact()?;

    let timeout_seconds: u64 = Input::new()
        .with_prompt("Request timeout in seconds")
        .default(servicenow.timeout_seconds)
        .validate_with(|input: &u64| -> Result<(), &str> {
            if (1..=300).contains(input) {
                Ok(())
            } else {
                Err("Timeout must be between 1 and 300 seconds")
            }
        })
        .interact_text()?;

    servicenow.set_instance(instance)?;
    servicenow.set_username(username)?;
    if !password.is_empty() {
        servicenow.set_password(password)?;
    }
    servicenow.set_timeout_seconds(timeout_seconds)?;

    Ok(())
}

fn test_servicenow_connection(servicenow: &ServiceNowConfig) -> Result<()> {
    let client = ServiceNowClient::new(servicenow)?.with_retry_attempts(1);
    client.ping_blocking()?;
    Ok(())
}
